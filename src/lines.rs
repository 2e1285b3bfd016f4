//! Append-only text document used by the CLI.
//!
//! Content is plain text, one entry per line, and every step appends one
//! line. Appends commute, so rebasing only has to drop the local steps the
//! server has confirmed.

use stepsync_core::{ClientId, DocumentModel, ModelError, SendableSteps, Snapshot, Step, Version};

#[derive(Debug, Clone)]
pub struct LineLog {
    confirmed: Vec<String>,
    unconfirmed: Vec<String>,
    version: Version,
    client_id: ClientId,
}

impl LineLog {
    /// An empty log at `version`.
    pub fn new(version: Version, client_id: ClientId) -> Self {
        Self {
            confirmed: Vec::new(),
            unconfirmed: Vec::new(),
            version,
            client_id,
        }
    }

    /// Queue a line for sending.
    pub fn append(&mut self, line: &str) -> Result<(), ModelError> {
        if line.contains('\n') {
            return Err(ModelError("a line cannot contain a newline".to_string()));
        }
        self.unconfirmed.push(line.to_string());
        Ok(())
    }

    pub fn confirmed(&self) -> &[String] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[String] {
        &self.unconfirmed
    }

    /// Everything, local lines last.
    pub fn text(&self) -> String {
        self.confirmed
            .iter()
            .chain(&self.unconfirmed)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DocumentModel for LineLog {
    fn load(snapshot: &Snapshot, client_id: &ClientId) -> Result<Self, ModelError> {
        let confirmed = if snapshot.content.is_empty() {
            Vec::new()
        } else {
            snapshot.content.split('\n').map(str::to_string).collect()
        };
        Ok(Self {
            confirmed,
            unconfirmed: Vec::new(),
            version: snapshot.version,
            client_id: client_id.clone(),
        })
    }

    fn version(&self) -> Version {
        self.version
    }

    fn sendable_steps(&self) -> Option<SendableSteps> {
        (!self.unconfirmed.is_empty()).then(|| SendableSteps {
            version: self.version,
            steps: self.unconfirmed.clone(),
            client_id: self.client_id.clone(),
        })
    }

    fn receive_steps(&mut self, steps: &[Step], client_ids: &[ClientId]) -> Result<(), ModelError> {
        if steps.len() != client_ids.len() {
            return Err(ModelError(format!(
                "{} steps but {} client ids",
                steps.len(),
                client_ids.len()
            )));
        }
        for (line, author) in steps.iter().zip(client_ids) {
            if *author == self.client_id && self.unconfirmed.first() == Some(line) {
                self.unconfirmed.remove(0);
            }
            self.confirmed.push(line.clone());
            self.version += 1;
        }
        Ok(())
    }

    fn content(&self) -> Result<String, ModelError> {
        Ok(self.confirmed.join("\n"))
    }
}
