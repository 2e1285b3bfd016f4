//! The HTTP client against a running server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use stepsync::config::{Access, ApiKeyEntry};
use stepsync::db::init_db;
use stepsync::lines::LineLog;
use stepsync::server::{router, ApiKeyStore, AppState, BackendOptions, SyncBackend};
use stepsync_core::sync::{DocumentQuery, SubmitStepsResult};
use stepsync_core::{create, load_latest, transform, ClientId, HttpSyncApi, SyncApi, SyncError};

struct TestServer {
    _dir: TempDir,
    addr: SocketAddr,
}

impl TestServer {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_db(&dir.path().join("stepsync.db")).await.unwrap();
        let keys = [
            ("reader-key", "reader", Access::Read),
            ("writer-key", "writer", Access::Write),
            ("admin-key", "admin", Access::Admin),
        ]
        .map(|(key, name, access)| ApiKeyEntry {
            key: key.to_string(),
            name: name.to_string(),
            access,
        });
        let state = AppState {
            backend: SyncBackend::new(pool, BackendOptions::default()),
            api_keys: Arc::new(ApiKeyStore::new(&keys)),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self { _dir: dir, addr }
    }

    fn client(&self, key: &str) -> HttpSyncApi {
        HttpSyncApi::new(format!("http://{}", self.addr), key.to_string())
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let version = server.client("nobody").health().await.unwrap();
    assert!(!version.is_empty());
}

#[tokio::test]
async fn test_edit_and_read_back() {
    let server = TestServer::start().await;
    let api = server.client("writer-key");
    let me = ClientId::from("cli");

    assert_eq!(api.latest_version("notes").await.unwrap(), None);
    create(&api, "notes", "title").await.unwrap();

    let doc: LineLog = transform(&api, "notes", &me, |doc: &mut LineLog| {
        doc.append("one")?;
        doc.append("two")
    })
    .await
    .unwrap();
    assert_eq!(doc.text(), "title\none\ntwo");

    assert_eq!(api.latest_version("notes").await.unwrap(), Some(3));

    let steps = api.get_steps("notes", 1, Some(2)).await.unwrap();
    assert_eq!(steps.steps, vec!["one".to_string()]);
    assert_eq!(steps.client_ids, vec![me.clone()]);
    assert_eq!(steps.version, 2);

    let read: LineLog = load_latest(&server.client("reader-key"), "notes", &me)
        .await
        .unwrap();
    assert_eq!(read.text(), "title\none\ntwo");

    let state = api
        .get_document(
            "notes",
            &DocumentQuery {
                version: Some(2),
                ignore_steps: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(state.version, Some(2));
}

#[tokio::test]
async fn test_stale_base_needs_rebase() {
    let server = TestServer::start().await;
    let api = server.client("writer-key");
    create(&api, "notes", "").await.unwrap();

    let alice = ClientId::from("alice");
    let bob = ClientId::Int(7);
    let first = api
        .submit_steps("notes", 1, &alice, &["a".to_string()])
        .await
        .unwrap();
    assert!(matches!(first, SubmitStepsResult::Synced));

    match api
        .submit_steps("notes", 1, &bob, &["b".to_string()])
        .await
        .unwrap()
    {
        SubmitStepsResult::NeedsRebase { steps, client_ids } => {
            assert_eq!(steps, vec!["a".to_string()]);
            assert_eq!(client_ids, vec![alice]);
        }
        other => panic!("expected rebase, got {:?}", other),
    }
}

#[tokio::test]
async fn test_errors_cross_the_wire() {
    let server = TestServer::start().await;
    let writer = server.client("writer-key");
    create(&writer, "notes", "").await.unwrap();

    let err = server
        .client("reader-key")
        .submit_steps("notes", 1, &ClientId::from("r"), &["x".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Server { status: 403, .. }), "{:?}", err);

    let err = server
        .client("wrong-key")
        .latest_version("notes")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Server { status: 401, .. }), "{:?}", err);

    let err = writer.get_steps("notes", 0, Some(5)).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidRequest(_)), "{:?}", err);

    let err = writer
        .submit_steps("notes", 1, &ClientId::from("w"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidRequest(_)), "{:?}", err);

    let err = writer.delete_document("notes").await.unwrap_err();
    assert!(matches!(err, SyncError::Server { status: 403, .. }), "{:?}", err);
}

#[tokio::test]
async fn test_watch_follows_writes_and_deletes() {
    let server = TestServer::start().await;
    let api = server.client("writer-key");

    let mut versions = api.watch_version("notes").await.unwrap();
    assert_eq!(*versions.borrow_and_update(), None);

    create(&api, "notes", "").await.unwrap();
    api.submit_steps("notes", 1, &ClientId::from("w"), &["x".to_string()])
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), versions.wait_for(|v| *v == Some(2)))
        .await
        .unwrap()
        .unwrap();

    server
        .client("admin-key")
        .delete_document("notes")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), versions.wait_for(Option::is_none))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(api.latest_version("notes").await.unwrap(), None);
}
