//! Durable storage for document snapshots and step batches.
//!
//! Two tables hold everything (see `migrations/`):
//! ```text
//! snapshots(id, version, content, created_at)
//! deltas(id, version, client_id, steps, created_at)
//! ```
//!
//! A delta's `version` is the document version *after* its steps, so a
//! delta covers versions `version - steps.len() + 1 ..= version`. A document
//! has no row of its own; it exists while it has snapshots or deltas.
//!
//! Writes to one document are serialized by an in-process lock held for the
//! duration of their transaction. Writes to different documents never wait
//! on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use stepsync_core::sync::{ClientId, Snapshot, Step, Version};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Longest accepted document ID, in bytes.
pub const MAX_DOCUMENT_ID_LEN: usize = 256;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StoreError {
    /// SQLite failed.
    Database(sqlx::Error),
    /// A snapshot with different content already exists at this version.
    Conflict { id: String, version: Version },
    /// The delta log has a gap where steps were expected.
    MissingSteps {
        id: String,
        /// First version that should have been covered.
        expected: Version,
        /// Start of the delta found instead, if any.
        found: Option<Version>,
    },
    /// Empty, too long, or containing control characters.
    InvalidDocumentId(String),
    InvalidArgument(String),
    /// A stored row could not be decoded.
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Conflict { id, version } => write!(
                f,
                "Snapshot for {} at version {} already exists with different content",
                id, version
            ),
            StoreError::MissingSteps {
                id,
                expected,
                found: Some(found),
            } => write!(
                f,
                "Missing steps for {}: expected version {} but the next delta starts at {}",
                id, expected, found
            ),
            StoreError::MissingSteps {
                id,
                expected,
                found: None,
            } => write!(
                f,
                "Missing steps for {}: no delta covers version {}",
                id, expected
            ),
            StoreError::InvalidDocumentId(id) => write!(f, "Invalid document ID: {:?}", id),
            StoreError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "Corrupt row: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

/// Reject IDs that are empty, longer than [`MAX_DOCUMENT_ID_LEN`] bytes, or
/// contain control characters.
pub fn validate_document_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() || id.len() > MAX_DOCUMENT_ID_LEN || id.chars().any(char::is_control) {
        return Err(StoreError::InvalidDocumentId(id.to_string()));
    }
    Ok(())
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Version as stored; rejects values SQLite cannot hold.
fn to_db(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::InvalidArgument(format!("version {} out of range", version)))
}

/// Version used as a query bound; saturates instead of failing.
fn bound(version: Version) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn from_db(version: i64) -> Result<Version, StoreError> {
    Version::try_from(version)
        .map_err(|_| StoreError::Corrupt(format!("negative version {}", version)))
}

/// A stored batch of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Document version after applying `steps`.
    pub version: Version,
    pub client_id: ClientId,
    pub steps: Vec<Step>,
}

impl Delta {
    /// Version the batch was based on.
    pub fn start(&self) -> Version {
        self.version.saturating_sub(self.steps.len() as Version)
    }
}

/// Snapshot metadata, without content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub version: Version,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Content length in bytes.
    pub size: i64,
}

/// Summary of a document's delta log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    pub deltas: i64,
    pub steps: i64,
    pub min_version: Option<Version>,
    pub max_version: Option<Version>,
    pub oldest_created_at: Option<i64>,
    pub newest_created_at: Option<i64>,
}

/// Result of [`DocumentStore::put_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotWrite {
    Inserted,
    /// Identical content was already stored.
    Unchanged,
}

/// Result of [`DocumentStore::compare_and_append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The batch was stored; the document is now at `version`.
    Appended { version: Version },
    /// Deltas newer than the base exist (at most the scan limit of them).
    Rejected(Vec<Delta>),
}

/// Which deltas a step-pruning batch may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaCutoff {
    /// Only deltas created strictly before this time (ms since epoch).
    pub before_ts: i64,
    /// Only deltas with a version strictly above this one.
    pub after_version: Option<Version>,
    /// Also require `version <= latest snapshot version` and clamp
    /// `before_ts` to the latest snapshot's creation time. With no snapshot
    /// nothing is eligible.
    pub keep_after_latest_snapshot: bool,
}

/// Rows removed by one bounded delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteBatch {
    pub deleted: u64,
    /// Highest version removed in this batch.
    pub last_version: Option<Version>,
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    version: i64,
    content: String,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            version: from_db(self.version)?,
            content: self.content,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotMetaRow {
    version: i64,
    created_at: i64,
    size: i64,
}

#[derive(sqlx::FromRow)]
struct DeltaRow {
    version: i64,
    client_id: String,
    steps: String,
}

impl DeltaRow {
    fn into_delta(self) -> Result<Delta, StoreError> {
        let client_id = ClientId::from_json(&self.client_id).map_err(|e| {
            StoreError::Corrupt(format!("client_id at version {}: {}", self.version, e))
        })?;
        let steps: Vec<Step> = serde_json::from_str(&self.steps)
            .map_err(|e| StoreError::Corrupt(format!("steps at version {}: {}", self.version, e)))?;
        Ok(Delta {
            version: from_db(self.version)?,
            client_id,
            steps,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeltaStatsRow {
    deltas: i64,
    steps: Option<i64>,
    min_version: Option<i64>,
    max_version: Option<i64>,
    oldest_created_at: Option<i64>,
    newest_created_at: Option<i64>,
}

/// Per-document async locks, dropped once nobody holds them.
#[derive(Default)]
pub struct DocumentLocks {
    locks: StdMutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `id`.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            match locks.get(id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    locks.retain(|_, weak| weak.strong_count() > 0);
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(id.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Number of documents with a live lock.
    pub fn len(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Queries shared by readers and writers
// ============================================================================

/// The newer deltas trimmed to start exactly at `base`.
///
/// A writer applies these on top of `base`, so they must cover every version
/// after it without a hole.
fn rebase_from(id: &str, base: Version, deltas: Vec<Delta>) -> Result<Vec<Delta>, StoreError> {
    let mut next = base;
    let mut out = Vec::with_capacity(deltas.len());
    for mut delta in deltas {
        let start = delta.start();
        if start > next {
            return Err(StoreError::MissingSteps {
                id: id.to_string(),
                expected: next + 1,
                found: Some(start + 1),
            });
        }
        if start < next {
            delta.steps.drain(..(next - start) as usize);
        }
        next = delta.version;
        out.push(delta);
    }
    Ok(out)
}

async fn select_snapshot(
    conn: &mut SqliteConnection,
    id: &str,
    version: Option<Version>,
) -> Result<Option<Snapshot>, StoreError> {
    let row: Option<SnapshotRow> = sqlx::query_as(
        "SELECT version, content FROM snapshots WHERE id = ? AND version <= ? ORDER BY version DESC LIMIT 1",
    )
    .bind(id)
    .bind(version.map(bound).unwrap_or(i64::MAX))
    .fetch_optional(&mut *conn)
    .await?;

    row.map(SnapshotRow::into_snapshot).transpose()
}

async fn select_latest_snapshot(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<SnapshotMeta>, StoreError> {
    let row: Option<SnapshotMetaRow> = sqlx::query_as(
        "SELECT version, created_at, LENGTH(content) AS size FROM snapshots WHERE id = ? ORDER BY version DESC LIMIT 1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|r| {
        Ok(SnapshotMeta {
            version: from_db(r.version)?,
            created_at: r.created_at,
            size: r.size,
        })
    })
    .transpose()
}

async fn select_latest_version(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Version>, StoreError> {
    let (latest,): (Option<i64>,) = sqlx::query_as(
        r#"
        SELECT MAX(v) FROM (
            SELECT MAX(version) AS v FROM snapshots WHERE id = ?
            UNION ALL
            SELECT MAX(version) AS v FROM deltas WHERE id = ?
        )
        "#,
    )
    .bind(id)
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    latest.map(from_db).transpose()
}

async fn select_deltas_after(
    conn: &mut SqliteConnection,
    id: &str,
    after: Version,
    limit: usize,
) -> Result<Vec<Delta>, StoreError> {
    let rows: Vec<DeltaRow> = sqlx::query_as(
        "SELECT version, client_id, steps FROM deltas WHERE id = ? AND version > ? ORDER BY version ASC LIMIT ?",
    )
    .bind(id)
    .bind(bound(after))
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(DeltaRow::into_delta).collect()
}

/// A consistent read-only view, backed by one transaction.
pub struct StoreReader {
    tx: Transaction<'static, Sqlite>,
}

impl StoreReader {
    /// Nearest snapshot at or below `version`, or the latest if `None`.
    pub async fn get_snapshot(
        &mut self,
        id: &str,
        version: Option<Version>,
    ) -> Result<Option<Snapshot>, StoreError> {
        select_snapshot(&mut self.tx, id, version).await
    }

    pub async fn latest_version(&mut self, id: &str) -> Result<Option<Version>, StoreError> {
        select_latest_version(&mut self.tx, id).await
    }

    /// Up to `limit` deltas with `version > after`, oldest first.
    pub async fn deltas_after(
        &mut self,
        id: &str,
        after: Version,
        limit: usize,
    ) -> Result<Vec<Delta>, StoreError> {
        select_deltas_after(&mut self.tx, id, after, limit).await
    }

    /// End the read.
    pub async fn finish(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Snapshot and delta storage backed by SQLite.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    locks: Arc<DocumentLocks>,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(DocumentLocks::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a consistent read.
    pub async fn reader(&self) -> Result<StoreReader, StoreError> {
        Ok(StoreReader {
            tx: self.pool.begin().await?,
        })
    }

    /// Store a snapshot.
    ///
    /// Identical content at the same version is a no-op; different content
    /// is a [`StoreError::Conflict`]. With `prune`, snapshots strictly
    /// between the document's earliest snapshot and this one are deleted in
    /// the same transaction.
    pub async fn put_snapshot(
        &self,
        id: &str,
        version: Version,
        content: &str,
        prune: bool,
    ) -> Result<SnapshotWrite, StoreError> {
        validate_document_id(id)?;
        let db_version = to_db(version)?;

        let _guard = self.locks.lock(id).await;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT content FROM snapshots WHERE id = ? AND version = ?")
                .bind(id)
                .bind(db_version)
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            Some((stored,)) if stored == content => return Ok(SnapshotWrite::Unchanged),
            Some(_) => {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    version,
                })
            }
            None => {}
        }

        sqlx::query("INSERT INTO snapshots (id, version, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(db_version)
            .bind(content)
            .bind(now_ms())
            .execute(&mut *tx)
            .await?;

        if prune {
            let pruned = sqlx::query(
                r#"
                DELETE FROM snapshots
                WHERE id = ?
                  AND version < ?
                  AND version > (SELECT MIN(version) FROM snapshots WHERE id = ?)
                "#,
            )
            .bind(id)
            .bind(db_version)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            if pruned.rows_affected() > 0 {
                tracing::debug!(
                    doc = id,
                    version,
                    pruned = pruned.rows_affected(),
                    "Pruned intermediate snapshots"
                );
            }
        }

        tx.commit().await?;
        Ok(SnapshotWrite::Inserted)
    }

    /// Nearest snapshot at or below `version`, or the latest if `None`.
    pub async fn get_snapshot(
        &self,
        id: &str,
        version: Option<Version>,
    ) -> Result<Option<Snapshot>, StoreError> {
        validate_document_id(id)?;
        let mut conn = self.pool.acquire().await?;
        select_snapshot(&mut conn, id, version).await
    }

    /// Version and creation time of the latest snapshot.
    pub async fn latest_snapshot(&self, id: &str) -> Result<Option<SnapshotMeta>, StoreError> {
        validate_document_id(id)?;
        let mut conn = self.pool.acquire().await?;
        select_latest_snapshot(&mut conn, id).await
    }

    /// Highest version across snapshots and deltas; `None` if the document
    /// does not exist.
    pub async fn latest_version(&self, id: &str) -> Result<Option<Version>, StoreError> {
        validate_document_id(id)?;
        let mut conn = self.pool.acquire().await?;
        select_latest_version(&mut conn, id).await
    }

    /// Up to `limit` deltas with `version > after`, oldest first.
    pub async fn deltas_after(
        &self,
        id: &str,
        after: Version,
        limit: usize,
    ) -> Result<Vec<Delta>, StoreError> {
        validate_document_id(id)?;
        let mut conn = self.pool.acquire().await?;
        select_deltas_after(&mut conn, id, after, limit).await
    }

    /// Append `steps` on top of `base` unless something newer exists.
    ///
    /// The scan for newer deltas and the insert run in one transaction under
    /// the document's write lock. A rejection carries at most `scan_limit`
    /// of the newer deltas.
    pub async fn compare_and_append(
        &self,
        id: &str,
        base: Version,
        client_id: &ClientId,
        steps: &[Step],
        scan_limit: usize,
    ) -> Result<AppendOutcome, StoreError> {
        validate_document_id(id)?;
        if steps.is_empty() {
            return Err(StoreError::InvalidArgument(
                "cannot submit an empty batch of steps".to_string(),
            ));
        }
        let version = base
            .checked_add(steps.len() as Version)
            .ok_or_else(|| StoreError::InvalidArgument(format!("version {} out of range", base)))?;
        let db_version = to_db(version)?;
        let encoded_steps = serde_json::to_string(steps)
            .map_err(|e| StoreError::InvalidArgument(format!("unencodable steps: {}", e)))?;

        let _guard = self.locks.lock(id).await;
        let mut tx = self.pool.begin().await?;

        let newer = select_deltas_after(&mut tx, id, base, scan_limit.max(1)).await?;
        if !newer.is_empty() {
            return Ok(AppendOutcome::Rejected(rebase_from(id, base, newer)?));
        }

        let latest = select_latest_version(&mut tx, id).await?.unwrap_or(0);
        if base > latest {
            return Err(StoreError::InvalidArgument(format!(
                "base version {} is ahead of {} (at {})",
                base, id, latest
            )));
        }
        if base < latest {
            // Only a snapshot is ahead of the base; the steps in between
            // have been pruned, so there is nothing to rebase onto.
            return Err(StoreError::MissingSteps {
                id: id.to_string(),
                expected: base + 1,
                found: None,
            });
        }

        sqlx::query(
            "INSERT INTO deltas (id, version, client_id, steps, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(db_version)
        .bind(client_id.to_json())
        .bind(&encoded_steps)
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AppendOutcome::Appended { version })
    }

    /// Delete up to `limit` snapshots with `after < version < before`,
    /// lowest versions first.
    pub async fn delete_snapshots_between(
        &self,
        id: &str,
        after: Option<Version>,
        before: Option<Version>,
        limit: usize,
    ) -> Result<DeleteBatch, StoreError> {
        validate_document_id(id)?;
        let low = after.map(bound).unwrap_or(-1);
        let high = before.map(bound).unwrap_or(i64::MAX);

        let _guard = self.locks.lock(id).await;
        let mut tx = self.pool.begin().await?;

        let versions: Vec<(i64,)> = sqlx::query_as(
            "SELECT version FROM snapshots WHERE id = ? AND version > ? AND version < ? ORDER BY version ASC LIMIT ?",
        )
        .bind(id)
        .bind(low)
        .bind(high)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        let Some(&(last,)) = versions.last() else {
            return Ok(DeleteBatch::default());
        };

        let result = sqlx::query(
            "DELETE FROM snapshots WHERE id = ? AND version > ? AND version <= ? AND version < ?",
        )
        .bind(id)
        .bind(low)
        .bind(last)
        .bind(high)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(DeleteBatch {
            deleted: result.rows_affected(),
            last_version: Some(from_db(last)?),
        })
    }

    /// Delete up to `limit` deltas allowed by `cutoff`, lowest versions first.
    pub async fn delete_deltas_before(
        &self,
        id: &str,
        cutoff: DeltaCutoff,
        limit: usize,
    ) -> Result<DeleteBatch, StoreError> {
        validate_document_id(id)?;

        let _guard = self.locks.lock(id).await;
        let mut tx = self.pool.begin().await?;

        let (before_ts, max_version) = if cutoff.keep_after_latest_snapshot {
            match select_latest_snapshot(&mut tx, id).await? {
                Some(snapshot) => (
                    cutoff.before_ts.min(snapshot.created_at),
                    bound(snapshot.version),
                ),
                None => return Ok(DeleteBatch::default()),
            }
        } else {
            (cutoff.before_ts, i64::MAX)
        };
        let low = cutoff.after_version.map(bound).unwrap_or(-1);

        let versions: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT version FROM deltas
            WHERE id = ? AND created_at < ? AND version > ? AND version <= ?
            ORDER BY version ASC LIMIT ?
            "#,
        )
        .bind(id)
        .bind(before_ts)
        .bind(low)
        .bind(max_version)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        let Some(&(last,)) = versions.last() else {
            return Ok(DeleteBatch::default());
        };

        let result = sqlx::query(
            "DELETE FROM deltas WHERE id = ? AND created_at < ? AND version > ? AND version <= ?",
        )
        .bind(id)
        .bind(before_ts)
        .bind(low)
        .bind(last)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(DeleteBatch {
            deleted: result.rows_affected(),
            last_version: Some(from_db(last)?),
        })
    }

    /// All snapshots of a document, oldest first.
    pub async fn snapshot_versions(&self, id: &str) -> Result<Vec<SnapshotMeta>, StoreError> {
        validate_document_id(id)?;
        let rows: Vec<SnapshotMetaRow> = sqlx::query_as(
            "SELECT version, created_at, LENGTH(content) AS size FROM snapshots WHERE id = ? ORDER BY version ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(SnapshotMeta {
                    version: from_db(r.version)?,
                    created_at: r.created_at,
                    size: r.size,
                })
            })
            .collect()
    }

    /// Counts and bounds of a document's delta log.
    pub async fn delta_stats(&self, id: &str) -> Result<DeltaStats, StoreError> {
        validate_document_id(id)?;
        let row: DeltaStatsRow = sqlx::query_as(
            r#"
            SELECT COUNT(*) AS deltas,
                   SUM(json_array_length(steps)) AS steps,
                   MIN(version) AS min_version,
                   MAX(version) AS max_version,
                   MIN(created_at) AS oldest_created_at,
                   MAX(created_at) AS newest_created_at
            FROM deltas WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(DeltaStats {
            deltas: row.deltas,
            steps: row.steps.unwrap_or(0),
            min_version: row.min_version.map(from_db).transpose()?,
            max_version: row.max_version.map(from_db).transpose()?,
            oldest_created_at: row.oldest_created_at,
            newest_created_at: row.newest_created_at,
        })
    }

    /// IDs of every stored document.
    pub async fn document_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM snapshots UNION SELECT id FROM deltas ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    #[cfg(test)]
    pub(crate) async fn set_delta_created_at(&self, id: &str, version: Version, at: i64) {
        sqlx::query("UPDATE deltas SET created_at = ? WHERE id = ? AND version = ?")
            .bind(at)
            .bind(id)
            .bind(bound(version))
            .execute(&self.pool)
            .await
            .unwrap();
    }

    #[cfg(test)]
    pub(crate) async fn set_snapshot_created_at(&self, id: &str, version: Version, at: i64) {
        sqlx::query("UPDATE snapshots SET created_at = ? WHERE id = ? AND version = ?")
            .bind(at)
            .bind(id)
            .bind(bound(version))
            .execute(&self.pool)
            .await
            .unwrap();
    }
}
