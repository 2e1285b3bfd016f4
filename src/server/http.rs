//! HTTP and WebSocket surface of the sync backend.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET|POST /docs/{id}/snapshot`: nearest snapshot / store a snapshot
//! - `GET /docs/{id}/version`: latest version or `null`
//! - `GET|POST /docs/{id}/steps`: steps after a version / submit steps
//! - `GET /docs/{id}`: snapshot plus unapplied steps
//! - `GET /docs/{id}/watch`: WebSocket of `{"version": ...}` frames
//! - `DELETE /docs/{id}`, `/docs/{id}/snapshots`, `/docs/{id}/steps`: start
//!   pruning; answers `202` and finishes in the background
//!
//! Every `/docs` route needs an API key, as a Bearer token or a `key` query
//! parameter. `GET` needs read access, `POST` write, `DELETE` admin.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, Request, State,
    },
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use stepsync_core::sync::{
    DeleteSnapshotsQuery, DeleteStepsQuery, DocumentQuery, DocumentState, ErrorBody, SnapshotBody,
    StepsQuery, StepsResponse, SubmitSnapshotRequest, SubmitStepsRequest, SubmitStepsResult,
    Version, VersionUpdate,
};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::backend::SyncBackend;
use super::retention::PruneRequest;
use super::storage::{validate_document_id, StoreError};
use crate::config::{Access, ApiKeyEntry};

// ============================================================================
// Errors
// ============================================================================

/// An error response: status plus `{error, message}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let (status, code) = match &e {
            StoreError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            StoreError::MissingSteps { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "missing_steps"),
            StoreError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            StoreError::InvalidDocumentId(_) => (StatusCode::BAD_REQUEST, "invalid_document_id"),
            StoreError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database"),
            StoreError::Corrupt(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database"),
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", e);
        }
        Self::new(status, code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated key info, added to request extensions after auth
#[derive(Debug, Clone)]
pub struct AuthKey {
    pub name: String,
    pub access: Access,
}

/// API key store - maps key -> AuthKey
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthKey>,
}

impl ApiKeyStore {
    pub fn new(entries: &[ApiKeyEntry]) -> Self {
        let keys: HashMap<String, AuthKey> = entries
            .iter()
            .map(|entry| {
                (
                    entry.key.clone(),
                    AuthKey {
                        name: entry.name.clone(),
                        access: entry.access,
                    },
                )
            })
            .collect();
        if keys.is_empty() {
            tracing::warn!("No API keys loaded - all authenticated requests will fail");
        } else {
            tracing::info!("Loaded {} API key(s)", keys.len());
        }
        Self { keys }
    }

    /// Validate an API key and return its info
    fn validate(&self, key: &str) -> Option<AuthKey> {
        self.keys.get(key).cloned()
    }
}

/// Access a request method needs.
fn required_access(method: &Method) -> Access {
    match *method {
        Method::GET | Method::HEAD => Access::Read,
        Method::POST => Access::Write,
        _ => Access::Admin,
    }
}

#[derive(Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub backend: SyncBackend,
    pub api_keys: Arc<ApiKeyStore>,
}

/// Authentication middleware
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Extract Authorization header, falling back to ?key= for WebSockets
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => h[7..].to_string(),
        Some(_) => {
            return ApiError::new(
                StatusCode::UNAUTHORIZED,
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            )
            .into_response();
        }
        None => match Query::<KeyQuery>::try_from_uri(request.uri()) {
            Ok(Query(KeyQuery { key: Some(key) })) => key,
            _ => {
                return ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "missing_auth",
                    "Authorization header required",
                )
                .into_response();
            }
        },
    };

    // Validate API key
    let Some(auth) = state.api_keys.validate(&api_key) else {
        return ApiError::new(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key")
            .into_response();
    };

    let needed = required_access(request.method());
    if auth.access < needed {
        tracing::debug!(key = %auth.name, has = %auth.access, %needed, "Access denied");
        return ApiError::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            format!("This API key does not have {} access", needed),
        )
        .into_response();
    }

    request.extensions_mut().insert(auth);
    next.run(request).await
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct SnapshotQuery {
    version: Option<Version>,
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<SnapshotBody>, ApiError> {
    let snapshot = state.backend.get_snapshot(&id, query.version).await?;
    Ok(Json(SnapshotBody::from(snapshot)))
}

async fn submit_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SubmitSnapshotRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .backend
        .submit_snapshot(&id, body.version, &body.content, body.prune_snapshots)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn latest_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<Version>>, ApiError> {
    Ok(Json(state.backend.latest_version(&id).await?))
}

async fn get_steps(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StepsQuery>,
) -> Result<Json<StepsResponse>, ApiError> {
    let steps = state
        .backend
        .get_steps(&id, query.after_version, query.target_version)
        .await?;
    Ok(Json(steps))
}

async fn submit_steps(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthKey>,
    Path(id): Path<String>,
    Json(body): Json<SubmitStepsRequest>,
) -> Result<Json<SubmitStepsResult>, ApiError> {
    tracing::debug!(doc = %id, key = %auth.name, base = body.base_version, "Submitting steps");
    let result = state
        .backend
        .submit_steps(&id, body.base_version, &body.client_id, &body.steps)
        .await?;
    Ok(Json(result))
}

async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DocumentQuery>,
) -> Result<Json<DocumentState>, ApiError> {
    let doc = state
        .backend
        .get(&id, query.version, query.ignore_steps.unwrap_or(false))
        .await?;
    Ok(Json(doc))
}

/// Validate, then finish the prune on a background task.
fn spawn_prune(state: AppState, request: PruneRequest) -> Result<StatusCode, ApiError> {
    validate_document_id(request.id())?;
    tokio::spawn(async move {
        let id = request.id().to_string();
        if let Err(e) = state.backend.prune(request).await {
            tracing::warn!(doc = %id, "Background prune failed: {}", e);
        }
    });
    Ok(StatusCode::ACCEPTED)
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    spawn_prune(state, PruneRequest::Document { id })
}

async fn delete_snapshots(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteSnapshotsQuery>,
) -> Result<StatusCode, ApiError> {
    spawn_prune(
        state,
        PruneRequest::Snapshots {
            id,
            after_version: query.after_version,
            before_version: query.before_version,
        },
    )
}

async fn delete_steps(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteStepsQuery>,
) -> Result<StatusCode, ApiError> {
    spawn_prune(
        state,
        PruneRequest::Steps {
            id,
            before_ts: query.before_ts,
            after_version: query.after_version,
            delete_newer_than_latest_snapshot: query.delete_newer_than_latest_snapshot,
        },
    )
}

async fn watch_document(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let versions = state.backend.watch(&id).await?;
    Ok(ws.on_upgrade(move |socket| watch_socket(socket, id, versions)))
}

/// Push the current version, then every change, until either side closes.
async fn watch_socket(
    mut socket: WebSocket,
    id: String,
    mut versions: watch::Receiver<Option<Version>>,
) {
    tracing::debug!(doc = %id, "Watch connected");
    let mut send_current = true;
    loop {
        if send_current {
            let version = *versions.borrow_and_update();
            let frame = match (VersionUpdate { version }).encode() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(doc = %id, "Failed to encode version: {}", e);
                    break;
                }
            };
            if socket.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }

        tokio::select! {
            changed = versions.changed() => {
                if changed.is_err() {
                    break;
                }
                send_current = true;
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Client frames carry nothing; keep waiting.
                Some(Ok(_)) => send_current = false,
            },
        }
    }
    tracing::debug!(doc = %id, "Watch disconnected");
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/docs/{id}", get(get_document).delete(delete_document))
        .route(
            "/docs/{id}/snapshot",
            get(get_snapshot).post(submit_snapshot),
        )
        .route("/docs/{id}/snapshots", delete(delete_snapshots))
        .route("/docs/{id}/version", get(latest_version))
        .route(
            "/docs/{id}/steps",
            get(get_steps).post(submit_steps).delete(delete_steps),
        )
        .route("/docs/{id}/watch", get(watch_document))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
