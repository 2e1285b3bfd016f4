//! Several clients editing one document through a real backend.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use stepsync::db::init_db;
use stepsync::lines::LineLog;
use stepsync::server::{BackendOptions, SyncBackend};
use stepsync_core::{
    create, load_latest, ClientId, DocumentModel, SyncApi, SyncOptions, SyncSession,
};

type Session = Arc<SyncSession<SyncBackend, LineLog>>;

async fn open_backend() -> (TempDir, Arc<SyncBackend>) {
    let dir = TempDir::new().unwrap();
    let pool = init_db(&dir.path().join("stepsync.db")).await.unwrap();
    (dir, Arc::new(SyncBackend::new(pool, BackendOptions::default())))
}

async fn open_session(backend: &Arc<SyncBackend>, id: &str, client: &str) -> Session {
    let doc: LineLog = load_latest(&**backend, id, &ClientId::from(client))
        .await
        .unwrap();
    let options = SyncOptions {
        snapshot_debounce: Duration::from_millis(10),
        ..Default::default()
    };
    SyncSession::new(backend.clone(), id, doc, options)
}

fn text(session: &Session) -> String {
    session.with_model(|doc| doc.text())
}

async fn settle(backend: &SyncBackend, sessions: &[&Session]) {
    let latest = backend.latest_version("notes").await.unwrap();
    for session in sessions {
        session.observe_remote_version(latest).await.unwrap();
    }
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let (_dir, backend) = open_backend().await;
    create(&*backend, "notes", "").await.unwrap();

    let alice = open_session(&backend, "notes", "alice").await;
    let bob = open_session(&backend, "notes", "bob").await;
    settle(&backend, &[&alice, &bob]).await;

    let (a, b) = tokio::join!(
        alice.edit(|doc| doc.append("from alice")),
        bob.edit(|doc| doc.append("from bob")),
    );
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    settle(&backend, &[&alice, &bob]).await;

    assert_eq!(text(&alice), text(&bob));
    assert!(alice.with_model(|doc| doc.pending().is_empty()));
    assert!(bob.with_model(|doc| doc.pending().is_empty()));
    assert_eq!(alice.with_model(|doc| doc.version()), 3);

    let server: LineLog = load_latest(&*backend, "notes", &ClientId::from("reader"))
        .await
        .unwrap();
    assert_eq!(server.text(), text(&alice));
}

#[tokio::test]
async fn test_interleaved_bursts_converge() {
    let (_dir, backend) = open_backend().await;
    create(&*backend, "notes", "first").await.unwrap();

    let sessions = vec![
        open_session(&backend, "notes", "a").await,
        open_session(&backend, "notes", "b").await,
        open_session(&backend, "notes", "c").await,
    ];
    let refs: Vec<&Session> = sessions.iter().collect();
    settle(&backend, &refs).await;

    let writers = sessions.iter().enumerate().map(|(n, session)| {
        let session = session.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                session
                    .edit(|doc| doc.append(&format!("{}-{}", n, i)))
                    .await
                    .unwrap()
                    .unwrap();
            }
        })
    });
    for writer in writers.collect::<Vec<_>>() {
        writer.await.unwrap();
    }

    settle(&backend, &refs).await;

    let expected = text(&sessions[0]);
    for session in &sessions {
        assert_eq!(text(session), expected);
    }
    assert_eq!(backend.latest_version("notes").await.unwrap(), Some(31));
    assert_eq!(expected.lines().count(), 31);

    // Every client's own lines keep their relative order.
    for n in 0..3 {
        let own: Vec<&str> = expected
            .lines()
            .filter(|line| line.starts_with(&format!("{}-", n)))
            .collect();
        let wanted: Vec<String> = (0..10).map(|i| format!("{}-{}", n, i)).collect();
        assert_eq!(own, wanted);
    }
}

#[tokio::test]
async fn test_subscriptions_pull_remote_edits() {
    let (_dir, backend) = open_backend().await;
    create(&*backend, "notes", "").await.unwrap();

    let alice = open_session(&backend, "notes", "alice").await;
    let bob = open_session(&backend, "notes", "bob").await;
    alice.start().await.unwrap();
    bob.start().await.unwrap();

    alice.edit(|doc| doc.append("hello")).await.unwrap().unwrap();

    // Nothing is pushed until the subscription has reported a remote version.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !alice.with_model(|doc| doc.pending().is_empty()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            alice.try_sync().await.unwrap();
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while text(&bob) != text(&alice) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // A debounced snapshot eventually covers the synced version.
    let version = alice.with_model(|doc| doc.version());
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = backend.get_snapshot("notes", None).await.unwrap();
            if snapshot.is_some_and(|s| s.version == version) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    alice.close();
    bob.close();
}

#[tokio::test]
async fn test_session_creates_missing_document() {
    let (_dir, backend) = open_backend().await;

    let doc = LineLog::new(stepsync_core::INITIAL_VERSION, ClientId::from("alice"));
    let session = SyncSession::new(backend.clone(), "fresh", doc, SyncOptions::default());
    session.edit(|doc| doc.append("one")).await.unwrap().unwrap();
    session.observe_remote_version(None).await.unwrap();

    assert_eq!(backend.latest_version("fresh").await.unwrap(), Some(2));
    let steps = SyncApi::get_steps(&*backend, "fresh", 1, None).await.unwrap();
    assert_eq!(steps.steps, vec!["one".to_string()]);
    assert!(session.with_model(|doc| doc.pending().is_empty()));
}
