//! Rebuilding "the document as of version V" from snapshots and deltas.
//!
//! Nothing here applies steps. Callers get the nearest snapshot and the raw
//! steps that lead from it to the requested version, and replay them with
//! their own document model.

use stepsync_core::sync::{DocumentState, StepsResponse, Version};

use super::storage::{validate_document_id, Delta, DocumentStore, StoreError, StoreReader};

/// Read side of the sync protocol.
#[derive(Clone)]
pub struct Reconstructor {
    store: DocumentStore,
    scan_limit: usize,
}

impl Reconstructor {
    pub fn new(store: DocumentStore, scan_limit: usize) -> Self {
        Self {
            store,
            scan_limit: scan_limit.max(1),
        }
    }

    /// Steps after `after_version`, up to `target_version` if given.
    ///
    /// With a target, exactly `target - after` steps are returned or the call
    /// fails. Without one, everything up to the scan limit is returned and
    /// `truncated` is set if more remains.
    pub async fn get_steps(
        &self,
        id: &str,
        after_version: Version,
        target_version: Option<Version>,
    ) -> Result<StepsResponse, StoreError> {
        validate_document_id(id)?;
        if let Some(target) = target_version {
            if target < after_version {
                return Err(StoreError::InvalidArgument(format!(
                    "target version {} is before {}",
                    target, after_version
                )));
            }
            if target == after_version {
                return Ok(empty_at(after_version));
            }
        }

        let mut reader = self.store.reader().await?;
        let result = self
            .collect(&mut reader, id, after_version, target_version)
            .await;
        reader.finish().await?;
        result
    }

    /// Nearest snapshot at or below `version` plus the steps after it.
    ///
    /// Without a snapshot the result has no content, steps or version.
    pub async fn get(
        &self,
        id: &str,
        version: Option<Version>,
        ignore_steps: bool,
    ) -> Result<DocumentState, StoreError> {
        validate_document_id(id)?;

        let mut reader = self.store.reader().await?;
        let result = self.get_in(&mut reader, id, version, ignore_steps).await;
        reader.finish().await?;
        result
    }

    async fn get_in(
        &self,
        reader: &mut StoreReader,
        id: &str,
        version: Option<Version>,
        ignore_steps: bool,
    ) -> Result<DocumentState, StoreError> {
        let Some(snapshot) = reader.get_snapshot(id, version).await? else {
            return Ok(DocumentState::default());
        };

        let steps = if ignore_steps || version == Some(snapshot.version) {
            empty_at(snapshot.version)
        } else {
            self.collect(reader, id, snapshot.version, version).await?
        };

        Ok(DocumentState {
            content: Some(snapshot.content),
            steps: Some(steps.steps),
            client_ids: Some(steps.client_ids),
            version: Some(steps.version),
            truncated: steps.truncated,
        })
    }

    async fn collect(
        &self,
        reader: &mut StoreReader,
        id: &str,
        after: Version,
        target: Option<Version>,
    ) -> Result<StepsResponse, StoreError> {
        if let Some(target) = target {
            let latest = reader.latest_version(id).await?.unwrap_or(0);
            if target > latest {
                return Err(StoreError::InvalidArgument(format!(
                    "version {} is ahead of {} (at {})",
                    target, id, latest
                )));
            }
        }

        let mut out = empty_at(after);
        let deltas = reader.deltas_after(id, after, self.scan_limit).await?;
        let capped = deltas.len() >= self.scan_limit;
        take_steps(&mut out, id, deltas, target)?;

        match target {
            Some(target) if out.version < target => {
                if capped {
                    let next = reader.deltas_after(id, out.version, 1).await?;
                    take_steps(&mut out, id, next, Some(target))?;
                }
                if out.version < target {
                    return Err(StoreError::MissingSteps {
                        id: id.to_string(),
                        expected: out.version + 1,
                        found: None,
                    });
                }
            }
            None if capped => {
                if !reader.deltas_after(id, out.version, 1).await?.is_empty() {
                    tracing::warn!(
                        doc = id,
                        after,
                        version = out.version,
                        limit = self.scan_limit,
                        "Step scan hit its limit; returning a partial result"
                    );
                    out.truncated = true;
                }
            }
            _ => {}
        }

        Ok(out)
    }
}

fn empty_at(version: Version) -> StepsResponse {
    StepsResponse {
        version,
        ..Default::default()
    }
}

/// Append the steps of `deltas` that come after `out.version`, stopping at
/// `target`. A delta starting past `out.version` is a gap.
fn take_steps(
    out: &mut StepsResponse,
    id: &str,
    deltas: Vec<Delta>,
    target: Option<Version>,
) -> Result<(), StoreError> {
    for delta in deltas {
        if target.is_some_and(|t| out.version >= t) {
            break;
        }

        let start = delta.start();
        if start > out.version {
            return Err(StoreError::MissingSteps {
                id: id.to_string(),
                expected: out.version + 1,
                found: Some(start + 1),
            });
        }

        // Overlap: the first delta may begin before the requested version.
        let skip = (out.version - start) as usize;
        for step in delta.steps.into_iter().skip(skip) {
            if target.is_some_and(|t| out.version >= t) {
                break;
            }
            out.steps.push(step);
            out.client_ids.push(delta.client_id.clone());
            out.version += 1;
        }
    }
    Ok(())
}
