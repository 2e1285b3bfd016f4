//! HTTP client for a stepsync server.
//!
//! Request/response calls go over JSON HTTP; version subscriptions use the
//! `/docs/{id}/watch` WebSocket, which pushes `{"version": ...}` text frames.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::api::SyncApi;
use super::error::SyncError;
use super::protocol::{
    ClientId, DeleteSnapshotsQuery, DeleteStepsQuery, DocumentQuery, DocumentState, ErrorBody,
    Snapshot, SnapshotBody, Step, StepsQuery, StepsResponse, SubmitSnapshotRequest,
    SubmitStepsRequest, SubmitStepsResult, Version, VersionUpdate,
};

/// Timeout for the first frame on a watch connection.
const WATCH_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// [`SyncApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSyncApi {
    server_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpSyncApi {
    /// Creates a new client with explicit parameters.
    pub fn new(server_url: String, api_key: String) -> Self {
        Self {
            server_url,
            api_key,
            http: reqwest::Client::new(),
        }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Returns the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Checks `/health` and returns the server's version string.
    pub async fn health(&self) -> Result<String, SyncError> {
        #[derive(serde::Deserialize)]
        struct Health {
            version: String,
        }

        let response = self.http.get(self.build_http_url("/health")).send().await?;
        let health: Health = Self::check(response).await?.json().await?;
        Ok(health.version)
    }

    /// Nearest snapshot plus the unapplied steps after it.
    pub async fn get_document(
        &self,
        id: &str,
        query: &DocumentQuery,
    ) -> Result<DocumentState, SyncError> {
        let req = self
            .authed(self.http.get(self.build_http_url(&Self::doc_path(id, ""))))
            .query(query);
        let response = Self::check(req.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Starts deleting a document. The server finishes in the background.
    pub async fn delete_document(&self, id: &str) -> Result<(), SyncError> {
        let req = self.authed(self.http.delete(self.build_http_url(&Self::doc_path(id, ""))));
        Self::check(req.send().await?).await?;
        Ok(())
    }

    /// Starts deleting snapshots strictly between the bounds.
    pub async fn delete_snapshots(
        &self,
        id: &str,
        query: &DeleteSnapshotsQuery,
    ) -> Result<(), SyncError> {
        let req = self
            .authed(
                self.http
                    .delete(self.build_http_url(&Self::doc_path(id, "/snapshots"))),
            )
            .query(query);
        Self::check(req.send().await?).await?;
        Ok(())
    }

    /// Starts deleting old steps.
    pub async fn delete_steps(&self, id: &str, query: &DeleteStepsQuery) -> Result<(), SyncError> {
        let req = self
            .authed(
                self.http
                    .delete(self.build_http_url(&Self::doc_path(id, "/steps"))),
            )
            .query(query);
        Self::check(req.send().await?).await?;
        Ok(())
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn doc_path(id: &str, suffix: &str) -> String {
        format!("/docs/{}{}", urlencoding::encode(id), suffix)
    }

    /// Turns an error status into a [`SyncError`], reading the `{error, message}` body.
    async fn check(response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(SyncError::from_server(
                status.as_u16(),
                &body.error,
                body.message,
            )),
            Err(_) => Err(SyncError::Server {
                status: status.as_u16(),
                code: status
                    .canonical_reason()
                    .unwrap_or("unknown")
                    .to_lowercase(),
                message: text,
            }),
        }
    }

    /// Builds the WebSocket URL for a document's watch endpoint.
    fn build_ws_url(&self, id: &str) -> String {
        // Convert http(s) to ws(s) if needed
        let base_url = if self.server_url.starts_with("http://") {
            self.server_url.replace("http://", "ws://")
        } else if self.server_url.starts_with("https://") {
            self.server_url.replace("https://", "wss://")
        } else if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            format!("ws://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!(
            "{}{}?key={}",
            base_url.trim_end_matches('/'),
            Self::doc_path(id, "/watch"),
            urlencoding::encode(&self.api_key)
        )
    }

    /// Builds an HTTP URL for a given path.
    fn build_http_url(&self, path: &str) -> String {
        // Convert ws(s) to http(s) if needed
        let base_url = if self.server_url.starts_with("ws://") {
            self.server_url.replace("ws://", "http://")
        } else if self.server_url.starts_with("wss://") {
            self.server_url.replace("wss://", "https://")
        } else if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }
}

impl SyncApi for HttpSyncApi {
    async fn get_snapshot(
        &self,
        id: &str,
        version: Option<Version>,
    ) -> Result<Option<Snapshot>, SyncError> {
        let mut req = self
            .http
            .get(self.build_http_url(&Self::doc_path(id, "/snapshot")));
        if let Some(v) = version {
            req = req.query(&[("version", v)]);
        }

        let response = Self::check(self.authed(req).send().await?).await?;
        let body: SnapshotBody = response.json().await?;
        Ok(body.into_snapshot())
    }

    async fn submit_snapshot(
        &self,
        id: &str,
        version: Version,
        content: &str,
    ) -> Result<(), SyncError> {
        let body = SubmitSnapshotRequest {
            version,
            content: content.to_string(),
            prune_snapshots: None,
        };
        let req = self
            .http
            .post(self.build_http_url(&Self::doc_path(id, "/snapshot")))
            .json(&body);

        Self::check(self.authed(req).send().await?).await?;
        tracing::debug!(doc = id, version, "Snapshot submitted");
        Ok(())
    }

    async fn latest_version(&self, id: &str) -> Result<Option<Version>, SyncError> {
        let req = self
            .http
            .get(self.build_http_url(&Self::doc_path(id, "/version")));

        let response = Self::check(self.authed(req).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn get_steps(
        &self,
        id: &str,
        after_version: Version,
        target_version: Option<Version>,
    ) -> Result<StepsResponse, SyncError> {
        let query = StepsQuery {
            after_version,
            target_version,
        };
        let req = self
            .http
            .get(self.build_http_url(&Self::doc_path(id, "/steps")))
            .query(&query);

        let response = Self::check(self.authed(req).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn submit_steps(
        &self,
        id: &str,
        base_version: Version,
        client_id: &ClientId,
        steps: &[Step],
    ) -> Result<SubmitStepsResult, SyncError> {
        let body = SubmitStepsRequest {
            base_version,
            client_id: client_id.clone(),
            steps: steps.to_vec(),
        };
        let req = self
            .http
            .post(self.build_http_url(&Self::doc_path(id, "/steps")))
            .json(&body);

        let response = Self::check(self.authed(req).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn watch_version(
        &self,
        id: &str,
    ) -> Result<watch::Receiver<Option<Version>>, SyncError> {
        let ws_url = self.build_ws_url(id);
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| SyncError::WebSocket(e.to_string()))?;

        let (_sender, mut receiver) = ws_stream.split();

        // The server sends the current version first; wait for it so the
        // receiver never starts with a placeholder.
        let first = timeout(WATCH_HANDSHAKE_TIMEOUT, async {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => return Ok(VersionUpdate::decode(&text)?),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => return Err(SyncError::WebSocket(e.to_string())),
                }
            }
            Err(SyncError::WebSocket(
                "Connection closed before first version".to_string(),
            ))
        })
        .await
        .map_err(|_| SyncError::WebSocket("Timed out waiting for first version".to_string()))??;

        let (tx, rx) = watch::channel(first.version);
        let doc = id.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    msg = receiver.next() => match msg {
                        Some(Ok(Message::Text(text))) => match VersionUpdate::decode(&text) {
                            Ok(update) => {
                                tx.send_replace(update.version);
                            }
                            Err(e) => tracing::warn!(doc = %doc, "Bad watch frame: {}", e),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(doc = %doc, "Watch connection failed: {}", e);
                            break;
                        }
                    },
                }
            }
            tracing::debug!(doc = %doc, "Watch connection closed");
        });

        Ok(rx)
    }
}
