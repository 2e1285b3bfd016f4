//! Client-side reconciliation loop for one open document.
//!
//! A [`SyncSession`] owns the local [`DocumentModel`] and pushes its edits to
//! a [`SyncApi`]. At most one sync round runs at a time; triggers that arrive
//! while a round is running are folded into a single follow-up round.
//!
//! Rounds are started by [`SyncSession::edit`] and by every version observed
//! on the remote subscription (see [`SyncSession::start`]).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::document::INITIAL_VERSION;
use crate::model::{DocumentModel, ModelError};
use crate::sync::{Step, SubmitStepsResult, SyncApi, SyncError, Version};

/// Default delay before a snapshot is uploaded after the last synced edit.
pub const SNAPSHOT_DEBOUNCE: Duration = Duration::from_millis(1000);
/// Default cap on the number of steps sent in one submission.
pub const MAX_STEPS_SYNC: usize = 1000;

/// Callback receiving sync failures: `(document id, error)`.
pub type ErrorHandler = Arc<dyn Fn(&str, &SyncError) + Send + Sync>;

/// Tunables for a [`SyncSession`].
#[derive(Clone)]
pub struct SyncOptions {
    pub snapshot_debounce: Duration,
    pub max_steps_per_submit: usize,
    /// When set, round failures go here and callers see `Ok(())`.
    pub on_sync_error: Option<ErrorHandler>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            snapshot_debounce: SNAPSHOT_DEBOUNCE,
            max_steps_per_submit: MAX_STEPS_SYNC,
            on_sync_error: None,
        }
    }
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("snapshot_debounce", &self.snapshot_debounce)
            .field("max_steps_per_submit", &self.max_steps_per_submit)
            .field("on_sync_error", &self.on_sync_error.is_some())
            .finish()
    }
}

/// What we last heard about the server's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteVersion {
    Unknown,
    Missing,
    Known(Version),
}

type Waiters = Vec<oneshot::Sender<Result<(), SyncError>>>;

struct DocSlot<D> {
    id: String,
    generation: u64,
    /// Version the model had when it was attached.
    initial_version: Version,
    model: D,
}

struct SessionState<D> {
    syncing: bool,
    pending: Option<Waiters>,
    remote: RemoteVersion,
    slot: DocSlot<D>,
    debounce: Option<JoinHandle<()>>,
    subscription: Option<JoinHandle<()>>,
}

/// Why a round stopped early.
enum RoundError {
    /// The open document changed; the result belongs to the old one.
    Stale,
    Failed(SyncError),
}

impl From<SyncError> for RoundError {
    fn from(e: SyncError) -> Self {
        RoundError::Failed(e)
    }
}

impl From<ModelError> for RoundError {
    fn from(e: ModelError) -> Self {
        RoundError::Failed(e.into())
    }
}

/// Synchronizes one local document with a server.
pub struct SyncSession<A, D> {
    api: Arc<A>,
    options: SyncOptions,
    state: Mutex<SessionState<D>>,
}

impl<A, D> SyncSession<A, D>
where
    A: SyncApi + 'static,
    D: DocumentModel + 'static,
{
    pub fn new(api: Arc<A>, id: impl Into<String>, model: D, options: SyncOptions) -> Arc<Self> {
        let initial_version = model.version();
        Arc::new(Self {
            api,
            options,
            state: Mutex::new(SessionState {
                syncing: false,
                pending: None,
                remote: RemoteVersion::Unknown,
                slot: DocSlot {
                    id: id.into(),
                    generation: 0,
                    initial_version,
                    model,
                },
                debounce: None,
                subscription: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock and confirm the slot still holds the round's document.
    fn lock_current(&self, generation: u64) -> Result<MutexGuard<'_, SessionState<D>>, RoundError> {
        let state = self.lock();
        if state.slot.generation != generation {
            tracing::debug!(
                doc = %state.slot.id,
                "Discarding result for a document that is no longer open"
            );
            return Err(RoundError::Stale);
        }
        Ok(state)
    }

    /// ID of the open document.
    pub fn document_id(&self) -> String {
        self.lock().slot.id.clone()
    }

    /// Read the local model.
    pub fn with_model<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&self.lock().slot.model)
    }

    /// Apply a local edit, then sync.
    pub async fn edit<R>(self: &Arc<Self>, f: impl FnOnce(&mut D) -> R) -> Result<R, SyncError> {
        let out = f(&mut self.lock().slot.model);
        self.try_sync().await?;
        Ok(out)
    }

    /// Record the server's latest version (`None` = no such document), then sync.
    pub async fn observe_remote_version(
        self: &Arc<Self>,
        version: Option<Version>,
    ) -> Result<(), SyncError> {
        self.lock().remote = remote_from(version);
        self.try_sync().await
    }

    /// Subscribe to the server's version of the open document.
    ///
    /// Every observed value records the remote version and triggers a sync.
    pub async fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        let (id, generation) = {
            let state = self.lock();
            (state.slot.id.clone(), state.slot.generation)
        };

        let mut rx = self.api.watch_version(&id).await?;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let version = *rx.borrow_and_update();
                match this.lock_current(generation) {
                    Ok(mut state) => state.remote = remote_from(version),
                    Err(_) => return,
                }

                // Detached: aborting the subscription must not cut short a
                // round that other callers are waiting on.
                let session = Arc::clone(&this);
                tokio::spawn(async move {
                    if let Err(e) = session.try_sync().await {
                        tracing::warn!("Sync after remote change failed: {}", e);
                    }
                });

                if rx.changed().await.is_err() {
                    // Closing or switching documents aborts this task, so a
                    // current generation here means the server side went away.
                    if this.lock_current(generation).is_err() {
                        return;
                    }
                    let e = SyncError::WebSocket("version subscription ended".to_string());
                    match &this.options.on_sync_error {
                        Some(handler) => handler(&id, &e),
                        None => tracing::warn!(doc = %id, "{}", e),
                    }
                    return;
                }
            }
        });

        let mut state = self.lock();
        if state.slot.generation != generation {
            handle.abort();
            return Ok(());
        }
        if let Some(old) = state.subscription.replace(handle) {
            old.abort();
        }
        Ok(())
    }

    /// Replace the open document.
    ///
    /// Results of rounds still in flight for the previous document are
    /// discarded. Call [`start`](Self::start) again to subscribe to the new one.
    pub fn switch_document(&self, id: impl Into<String>, model: D) {
        let mut state = self.lock();
        let generation = state.slot.generation + 1;
        state.slot = DocSlot {
            id: id.into(),
            generation,
            initial_version: model.version(),
            model,
        };
        state.remote = RemoteVersion::Unknown;
        stop_tasks(&mut state);
    }

    /// Stop the subscription and any pending snapshot upload.
    pub fn close(&self) {
        stop_tasks(&mut self.lock());
    }

    /// Run a sync round, or join the follow-up round if one is running.
    pub async fn try_sync(self: &Arc<Self>) -> Result<(), SyncError> {
        let waiter = {
            let mut state = self.lock();
            if state.syncing {
                let (tx, rx) = oneshot::channel();
                state.pending.get_or_insert_with(Vec::new).push(tx);
                Some(rx)
            } else {
                state.syncing = true;
                None
            }
        };

        if let Some(rx) = waiter {
            return rx
                .await
                .unwrap_or_else(|_| Err(SyncError::Backend("sync round abandoned".to_string())));
        }

        let outcome = self.run_round().await;

        loop {
            let waiters = {
                let mut state = self.lock();
                match state.pending.take() {
                    Some(waiters) => waiters,
                    None => {
                        state.syncing = false;
                        break;
                    }
                }
            };

            let extra = self.run_round().await;
            for waiter in waiters {
                let _ = waiter.send(extra.clone());
            }
        }

        outcome
    }

    async fn run_round(self: &Arc<Self>) -> Result<(), SyncError> {
        let (id, generation) = {
            let state = self.lock();
            (state.slot.id.clone(), state.slot.generation)
        };

        match self.round(&id, generation).await {
            Ok(()) | Err(RoundError::Stale) => Ok(()),
            Err(RoundError::Failed(e)) => match &self.options.on_sync_error {
                Some(handler) => {
                    handler(&id, &e);
                    Ok(())
                }
                None => Err(e),
            },
        }
    }

    async fn round(self: &Arc<Self>, id: &str, generation: u64) -> Result<(), RoundError> {
        let (remote, local_version, initial_version) = {
            let state = self.lock_current(generation)?;
            (
                state.remote,
                state.slot.model.version(),
                state.slot.initial_version,
            )
        };

        match remote {
            RemoteVersion::Unknown => return Ok(()),
            RemoteVersion::Missing => {
                if initial_version > INITIAL_VERSION {
                    return Err(SyncError::NotFound(format!(
                        "{} is at local version {} but doesn't exist server-side",
                        id, initial_version
                    ))
                    .into());
                }
                let content = self.lock_current(generation)?.slot.model.content()?;
                self.api
                    .submit_snapshot(id, local_version, &content)
                    .await?;
                tracing::info!(doc = id, version = local_version, "Created document on server");

                let mut state = self.lock_current(generation)?;
                if state.remote == RemoteVersion::Missing {
                    state.remote = RemoteVersion::Known(local_version);
                }
            }
            RemoteVersion::Known(remote) if remote > local_version => {
                let pending = self.lock().debounce.take();
                if let Some(handle) = pending {
                    handle.abort();
                }
                self.pull(id, generation, remote).await?;
            }
            RemoteVersion::Known(_) => {}
        }

        if self.push(id, generation).await? {
            self.schedule_snapshot(id.to_string(), generation);
        }
        Ok(())
    }

    /// Fetch and apply remote steps up to `target`.
    async fn pull(&self, id: &str, generation: u64, target: Version) -> Result<(), RoundError> {
        loop {
            let after = self.lock_current(generation)?.slot.model.version();
            if after >= target {
                return Ok(());
            }

            let resp = self.api.get_steps(id, after, None).await;
            let mut state = self.lock_current(generation)?;
            let resp = resp?;
            if resp.steps.is_empty() {
                return Ok(());
            }
            state
                .slot
                .model
                .receive_steps(&resp.steps, &resp.client_ids)?;
            tracing::debug!(doc = id, version = resp.version, "Pulled remote steps");
            if !resp.truncated {
                return Ok(());
            }
        }
    }

    /// Submit local steps until none remain. Returns whether anything was accepted.
    async fn push(&self, id: &str, generation: u64) -> Result<bool, RoundError> {
        let mut submitted = false;

        loop {
            let sendable = self.lock_current(generation)?.slot.model.sendable_steps();
            let Some(sendable) = sendable else {
                return Ok(submitted);
            };

            let steps: Vec<Step> = sendable
                .steps
                .into_iter()
                .take(self.options.max_steps_per_submit.max(1))
                .collect();

            let result = self
                .api
                .submit_steps(id, sendable.version, &sendable.client_id, &steps)
                .await;
            let mut state = self.lock_current(generation)?;

            match result? {
                SubmitStepsResult::Synced => {
                    let own = vec![sendable.client_id.clone(); steps.len()];
                    state.slot.model.receive_steps(&steps, &own)?;
                    submitted = true;

                    let version = state.slot.model.version();
                    if let RemoteVersion::Known(v) = state.remote {
                        state.remote = RemoteVersion::Known(v.max(version));
                    }
                    tracing::debug!(doc = id, version, count = steps.len(), "Steps synced");
                }
                SubmitStepsResult::NeedsRebase { steps, client_ids } => {
                    if steps.is_empty() {
                        return Err(
                            SyncError::Backend("needs-rebase without steps".to_string()).into()
                        );
                    }
                    tracing::debug!(doc = id, behind = steps.len(), "Rebasing onto remote steps");
                    state.slot.model.receive_steps(&steps, &client_ids)?;
                }
            }
        }
    }

    /// (Re)start the timer that uploads a snapshot of the confirmed state.
    fn schedule_snapshot(self: &Arc<Self>, id: String, generation: u64) {
        let this = Arc::clone(self);
        let delay = self.options.snapshot_debounce;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let snapshot = match this.lock_current(generation) {
                Ok(state) => state
                    .slot
                    .model
                    .content()
                    .map(|content| (state.slot.model.version(), content)),
                Err(_) => return,
            };
            let result = match snapshot {
                Ok((version, content)) => this
                    .api
                    .submit_snapshot(&id, version, &content)
                    .await
                    .map(|_| version),
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(version) => tracing::debug!(doc = %id, version, "Snapshot uploaded"),
                Err(e) => match &this.options.on_sync_error {
                    Some(handler) => handler(&id, &e),
                    None => tracing::warn!(doc = %id, "Snapshot upload failed: {}", e),
                },
            }
        });

        let mut state = self.lock();
        if state.slot.generation != generation {
            handle.abort();
            return;
        }
        if let Some(old) = state.debounce.replace(handle) {
            old.abort();
        }
    }
}

fn remote_from(version: Option<Version>) -> RemoteVersion {
    match version {
        Some(v) => RemoteVersion::Known(v),
        None => RemoteVersion::Missing,
    }
}

fn stop_tasks<D>(state: &mut SessionState<D>) {
    if let Some(handle) = state.subscription.take() {
        handle.abort();
    }
    if let Some(handle) = state.debounce.take() {
        handle.abort();
    }
}
