//! In-memory doubles shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Semaphore};

use crate::model::{DocumentModel, ModelError, SendableSteps};
use crate::sync::{
    ClientId, Snapshot, Step, StepsResponse, SubmitStepsResult, SyncApi, SyncError, Version,
};

/// Document whose content is a list of lines; each step appends one line.
#[derive(Debug, Clone)]
pub(crate) struct LineDoc {
    lines: Vec<String>,
    unconfirmed: Vec<String>,
    version: Version,
    client_id: ClientId,
}

impl LineDoc {
    pub(crate) fn new(lines: &[&str], version: Version, client_id: &str) -> Self {
        Self {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            unconfirmed: Vec::new(),
            version,
            client_id: ClientId::from(client_id),
        }
    }

    pub(crate) fn push(&mut self, line: &str) {
        self.unconfirmed.push(line.to_string());
    }

    /// Confirmed lines followed by unconfirmed ones.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .chain(self.unconfirmed.iter())
            .cloned()
            .collect()
    }

    pub(crate) fn unconfirmed(&self) -> usize {
        self.unconfirmed.len()
    }
}

impl DocumentModel for LineDoc {
    fn load(snapshot: &Snapshot, client_id: &ClientId) -> Result<Self, ModelError> {
        let lines: Vec<String> =
            serde_json::from_str(&snapshot.content).map_err(|e| ModelError(e.to_string()))?;
        Ok(Self {
            lines,
            unconfirmed: Vec::new(),
            version: snapshot.version,
            client_id: client_id.clone(),
        })
    }

    fn version(&self) -> Version {
        self.version
    }

    fn sendable_steps(&self) -> Option<SendableSteps> {
        if self.unconfirmed.is_empty() {
            return None;
        }
        Some(SendableSteps {
            version: self.version,
            steps: self.unconfirmed.clone(),
            client_id: self.client_id.clone(),
        })
    }

    fn receive_steps(&mut self, steps: &[Step], client_ids: &[ClientId]) -> Result<(), ModelError> {
        if steps.len() != client_ids.len() {
            return Err(ModelError("steps and client ids differ in length".into()));
        }
        for (step, client_id) in steps.iter().zip(client_ids) {
            if *client_id == self.client_id && self.unconfirmed.first() == Some(step) {
                self.unconfirmed.remove(0);
            }
            self.lines.push(step.clone());
        }
        self.version += steps.len() as Version;
        Ok(())
    }

    fn content(&self) -> Result<String, ModelError> {
        serde_json::to_string(&self.lines).map_err(|e| ModelError(e.to_string()))
    }
}

/// Snapshot content for a [`LineDoc`] with these lines.
pub(crate) fn lines_content(lines: &[&str]) -> String {
    serde_json::to_string(lines).unwrap()
}

#[derive(Default)]
struct FakeDoc {
    snapshots: BTreeMap<Version, String>,
    deltas: Vec<(Version, ClientId, Vec<Step>)>,
}

impl FakeDoc {
    fn latest(&self) -> Option<Version> {
        let snap = self.snapshots.keys().next_back().copied();
        let delta = self.deltas.last().map(|d| d.0);
        snap.max(delta)
    }
}

#[derive(Default)]
struct FakeState {
    docs: HashMap<String, FakeDoc>,
    submit_calls: usize,
    snapshot_calls: Vec<(String, Version)>,
    fail_submits: bool,
}

/// In-memory [`SyncApi`] with a few knobs for driving the session.
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
    watchers: Mutex<HashMap<String, watch::Sender<Option<Version>>>>,
    scan_limit: usize,
    gated: AtomicBool,
    gate: Semaphore,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::with_scan_limit(1000)
    }

    pub(crate) fn with_scan_limit(scan_limit: usize) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            watchers: Mutex::new(HashMap::new()),
            scan_limit,
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    /// Seed a snapshot without counting it as a client call.
    pub(crate) fn seed(&self, id: &str, version: Version, lines: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .docs
            .entry(id.to_string())
            .or_default()
            .snapshots
            .insert(version, lines_content(lines));
        drop(state);
        self.publish(id);
    }

    /// Append steps as another writer would.
    pub(crate) fn append_remote(&self, id: &str, client_id: &str, steps: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let doc = state.docs.entry(id.to_string()).or_default();
        let version = doc.latest().unwrap_or(0) + steps.len() as Version;
        doc.deltas.push((
            version,
            ClientId::from(client_id),
            steps.iter().map(|s| s.to_string()).collect(),
        ));
        drop(state);
        self.publish(id);
    }

    /// Hold every `submit_steps` call until [`FakeApi::release`].
    pub(crate) fn hold_submits(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub(crate) fn fail_submits(&self) {
        self.state.lock().unwrap().fail_submits = true;
    }

    pub(crate) fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }

    pub(crate) fn snapshot_calls(&self) -> Vec<(String, Version)> {
        self.state.lock().unwrap().snapshot_calls.clone()
    }

    pub(crate) fn snapshot(&self, id: &str, version: Version) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.docs.get(id)?.snapshots.get(&version).cloned()
    }

    pub(crate) fn latest(&self, id: &str) -> Option<Version> {
        let state = self.state.lock().unwrap();
        state.docs.get(id).and_then(FakeDoc::latest)
    }

    /// Drop the version channel for `id`, as a lost connection would.
    pub(crate) fn close_watchers(&self, id: &str) {
        self.watchers.lock().unwrap().remove(id);
    }

    fn publish(&self, id: &str) {
        let latest = self.latest(id);
        let watchers = self.watchers.lock().unwrap();
        if let Some(tx) = watchers.get(id) {
            tx.send_replace(latest);
        }
    }
}

impl SyncApi for FakeApi {
    async fn get_snapshot(
        &self,
        id: &str,
        version: Option<Version>,
    ) -> Result<Option<Snapshot>, SyncError> {
        let state = self.state.lock().unwrap();
        let Some(doc) = state.docs.get(id) else {
            return Ok(None);
        };
        let found = doc
            .snapshots
            .range(..=version.unwrap_or(Version::MAX))
            .next_back()
            .map(|(v, c)| Snapshot {
                version: *v,
                content: c.clone(),
            });
        Ok(found)
    }

    async fn submit_snapshot(
        &self,
        id: &str,
        version: Version,
        content: &str,
    ) -> Result<(), SyncError> {
        {
            let mut state = self.state.lock().unwrap();
            state.snapshot_calls.push((id.to_string(), version));
            let doc = state.docs.entry(id.to_string()).or_default();
            match doc.snapshots.get(&version) {
                Some(existing) if existing == content => return Ok(()),
                Some(_) => return Err(SyncError::Conflict(format!("{} v{}", id, version))),
                None => {
                    doc.snapshots.insert(version, content.to_string());
                }
            }
        }
        self.publish(id);
        Ok(())
    }

    async fn latest_version(&self, id: &str) -> Result<Option<Version>, SyncError> {
        Ok(self.latest(id))
    }

    async fn get_steps(
        &self,
        id: &str,
        after_version: Version,
        target_version: Option<Version>,
    ) -> Result<StepsResponse, SyncError> {
        let state = self.state.lock().unwrap();
        let mut resp = StepsResponse {
            version: after_version,
            ..Default::default()
        };
        let Some(doc) = state.docs.get(id) else {
            return Ok(resp);
        };

        let newer: Vec<_> = doc
            .deltas
            .iter()
            .filter(|d| d.0 > after_version)
            .collect();
        let target = target_version.unwrap_or(Version::MAX);
        for (i, (version, client_id, steps)) in newer.iter().enumerate() {
            if i == self.scan_limit {
                resp.truncated = true;
                break;
            }
            let start = version - steps.len() as Version;
            for (offset, step) in steps.iter().enumerate() {
                let step_version = start + offset as Version + 1;
                if step_version > after_version && step_version <= target {
                    resp.steps.push(step.clone());
                    resp.client_ids.push(client_id.clone());
                    resp.version = step_version;
                }
            }
        }
        Ok(resp)
    }

    async fn submit_steps(
        &self,
        id: &str,
        base_version: Version,
        client_id: &ClientId,
        steps: &[Step],
    ) -> Result<SubmitStepsResult, SyncError> {
        if self.gated.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(|e| SyncError::Backend(e.to_string()))?
                .forget();
        }

        let result = {
            let mut state = self.state.lock().unwrap();
            state.submit_calls += 1;
            if state.fail_submits {
                return Err(SyncError::Http("connection refused".into()));
            }
            let doc = state.docs.entry(id.to_string()).or_default();
            let newer: Vec<_> = doc
                .deltas
                .iter()
                .filter(|d| d.0 > base_version)
                .collect();
            if newer.is_empty() {
                doc.deltas.push((
                    base_version + steps.len() as Version,
                    client_id.clone(),
                    steps.to_vec(),
                ));
                SubmitStepsResult::Synced
            } else {
                let mut rebase_steps = Vec::new();
                let mut client_ids = Vec::new();
                for (_, c, s) in newer {
                    rebase_steps.extend(s.iter().cloned());
                    client_ids.extend(std::iter::repeat(c.clone()).take(s.len()));
                }
                SubmitStepsResult::NeedsRebase {
                    steps: rebase_steps,
                    client_ids,
                }
            }
        };
        if result == SubmitStepsResult::Synced {
            self.publish(id);
        }
        Ok(result)
    }

    async fn watch_version(
        &self,
        id: &str,
    ) -> Result<watch::Receiver<Option<Version>>, SyncError> {
        let latest = self.latest(id);
        let mut watchers = self.watchers.lock().unwrap();
        let tx = watchers
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(latest).0);
        Ok(tx.subscribe())
    }
}

/// Shared handle, as sessions hold their API behind an `Arc`.
pub(crate) fn fake_api() -> Arc<FakeApi> {
    Arc::new(FakeApi::new())
}
