//! Session store
//!
//! Each (user, source) session is persisted in the cache as one metadata
//! entry plus one entry per snapshot:
//!
//! ```text
//! studio:<user>:<source>:meta          JSON SessionMeta (history + cursor)
//! studio:<user>:<source>:snap:<uuid7>  Arrow IPC stream of one table
//! ```
//!
//! Writing the metadata is the commit point of every mutation. A new
//! snapshot blob is written before the metadata that names it, so a failure
//! part way leaves the previous history intact. All operations on one
//! session are serialized through `KeyLocks`.

use crate::artifact::{ArtifactRecord, ArtifactRequest, ArtifactSink};
use crate::cache::CacheStore;
use crate::codec::{decode_batch, encode_batch};
use crate::config::StudioConfig;
use crate::error::{LoadError, Result, StudioError};
use crate::history::{HistoryEntry, OperationRecord, SessionInfo, SessionMeta, SnapshotMeta};
use crate::loader::{SourceCatalog, TableLoader};
use crate::lock::KeyLocks;
use crate::ops::{self, ApplyContext, Operation};
use crate::table::{self, ColumnProfile, TablePreview};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;

/// Identity of a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user: String,
    pub source: String,
}

fn escape(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

impl SessionKey {
    pub fn new<U: Into<String>, S: Into<String>>(user: U, source: S) -> Self {
        Self {
            user: user.into(),
            source: source.into(),
        }
    }

    fn prefix(&self) -> String {
        format!("studio:{}:{}", escape(&self.user), escape(&self.source))
    }

    pub fn meta_key(&self) -> String {
        format!("{}:meta", self.prefix())
    }

    pub fn snapshot_key(&self, id: &str) -> String {
        format!("{}:snap:{}", self.prefix(), id)
    }

    fn not_found(&self) -> StudioError {
        StudioError::NotFound {
            user: self.user.clone(),
            source_id: self.source.clone(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user, self.source)
    }
}

/// The current table of a session along with its summary
#[derive(Debug, Clone)]
pub struct SessionView {
    pub info: SessionInfo,
    pub batch: RecordBatch,
}

pub struct SessionStore {
    cache: Arc<dyn CacheStore>,
    catalog: Arc<dyn SourceCatalog>,
    loader: Arc<dyn TableLoader>,
    artifacts: Option<Arc<dyn ArtifactSink>>,
    config: StudioConfig,
    locks: KeyLocks,
}

impl SessionStore {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        catalog: Arc<dyn SourceCatalog>,
        loader: Arc<dyn TableLoader>,
        config: StudioConfig,
    ) -> Self {
        Self {
            cache,
            catalog,
            loader,
            artifacts: None,
            config,
            locks: KeyLocks::new(),
        }
    }

    #[must_use]
    pub fn with_artifacts(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = Some(sink);
        self
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    /// Number of sessions with an operation in flight
    pub fn active_locks(&self) -> usize {
        self.locks.active()
    }

    /// Load the source and start a session at its original snapshot
    ///
    /// A live session for the same key is never replaced: the call fails
    /// with `AlreadyInitialized` and the existing history is left as is.
    pub async fn initialize(&self, user: &str, source: &str) -> Result<SessionView> {
        let key = SessionKey::new(user, source);
        let _guard = self.locks.lock(&key.meta_key()).await;

        if self.cache.get(&key.meta_key()).await?.is_some() {
            return Err(StudioError::AlreadyInitialized {
                user: key.user.clone(),
                source_id: key.source.clone(),
            });
        }

        let batch = self.load_source(source).await?;
        let id = uuid7::uuid7().to_string();
        let snapshot = SnapshotMeta {
            id: id.clone(),
            rows: batch.num_rows(),
            columns: batch.num_columns(),
            record: None,
        };
        let meta = SessionMeta::new(
            user,
            source,
            snapshot,
            self.config.session_ttl_secs,
            Utc::now(),
        );

        self.write_snapshot(&key, &id, &batch).await?;
        if let Err(e) = self.write_meta(&key, &meta).await {
            self.discard_blobs(&key, &[id]).await;
            return Err(e);
        }

        diagnostics::info!(
            "Initialized session {key} with {rows} rows, {columns} columns",
            key: key.to_string(),
            rows: batch.num_rows(),
            columns: batch.num_columns()
        );
        Ok(SessionView {
            info: meta.info()?,
            batch,
        })
    }

    pub async fn status(&self, user: &str, source: &str) -> Result<SessionInfo> {
        let key = SessionKey::new(user, source);
        let _guard = self.locks.lock(&key.meta_key()).await;
        let mut meta = self.read_meta(&key).await?;
        self.touch(&key, &mut meta).await?;
        meta.info()
    }

    pub async fn current(&self, user: &str, source: &str) -> Result<SessionView> {
        let key = SessionKey::new(user, source);
        let _guard = self.locks.lock(&key.meta_key()).await;
        let mut meta = self.read_meta(&key).await?;
        let batch = self.read_snapshot(&key, &meta.current()?.id).await?;
        self.touch(&key, &mut meta).await?;
        Ok(SessionView {
            info: meta.info()?,
            batch,
        })
    }

    /// Apply `operation` to the current snapshot and make the result current
    ///
    /// Any redo tail is discarded. If the operation fails the session is
    /// left exactly as it was.
    pub async fn apply(&self, user: &str, source: &str, operation: Operation) -> Result<SessionView> {
        let key = SessionKey::new(user, source);
        let _guard = self.locks.lock(&key.meta_key()).await;
        let mut meta = self.read_meta(&key).await?;
        let current = self.read_snapshot(&key, &meta.current()?.id).await?;

        let ctx = ApplyContext::from(&self.config);
        let op = operation.clone();
        let batch = tokio::task::spawn_blocking(move || ops::apply(&current, &op, &ctx))
            .await
            .map_err(|e| StudioError::invalid_operation(format!("operation aborted: {}", e)))??;

        let id = uuid7::uuid7().to_string();
        let record = OperationRecord::new(operation, Utc::now());
        diagnostics::debug!(
            "Applying {description} to {key}",
            description: record.description.clone(),
            key: key.to_string()
        );
        // Snapshots that survive the push; extended before the commit.
        self.refresh_snapshots(&key, &meta.snapshots[..=meta.cursor]).await?;
        meta.last_access = Utc::now();
        let discarded = meta.push(SnapshotMeta {
            id: id.clone(),
            rows: batch.num_rows(),
            columns: batch.num_columns(),
            record: Some(record),
        });

        self.write_snapshot(&key, &id, &batch).await?;
        if let Err(e) = self.write_meta(&key, &meta).await {
            self.discard_blobs(&key, &[id]).await;
            return Err(e);
        }

        let discarded: Vec<String> = discarded.into_iter().map(|s| s.id).collect();
        self.discard_blobs(&key, &discarded).await;

        Ok(SessionView {
            info: meta.info()?,
            batch,
        })
    }

    pub async fn undo(&self, user: &str, source: &str) -> Result<SessionView> {
        self.navigate(user, source, SessionMeta::undo).await
    }

    pub async fn redo(&self, user: &str, source: &str) -> Result<SessionView> {
        self.navigate(user, source, SessionMeta::redo).await
    }

    /// Move the cursor; snapshot blobs are untouched
    async fn navigate(
        &self,
        user: &str,
        source: &str,
        step: fn(&mut SessionMeta) -> Result<()>,
    ) -> Result<SessionView> {
        let key = SessionKey::new(user, source);
        let _guard = self.locks.lock(&key.meta_key()).await;
        let mut meta = self.read_meta(&key).await?;
        step(&mut meta)?;
        let batch = self.read_snapshot(&key, &meta.current()?.id).await?;
        self.touch(&key, &mut meta).await?;
        diagnostics::debug!("Moved {key} to snapshot {cursor}", key: key.to_string(), cursor: meta.cursor);
        Ok(SessionView {
            info: meta.info()?,
            batch,
        })
    }

    /// Remove the session; returns whether one existed
    pub async fn clear(&self, user: &str, source: &str) -> Result<bool> {
        let key = SessionKey::new(user, source);
        let _guard = self.locks.lock(&key.meta_key()).await;
        self.clear_locked(&key).await
    }

    async fn clear_locked(&self, key: &SessionKey) -> Result<bool> {
        let meta = match self.cache.get(&key.meta_key()).await? {
            Some(bytes) => serde_json::from_slice::<SessionMeta>(&bytes).ok(),
            None => return Ok(false),
        };
        let _ = self.cache.delete(&key.meta_key()).await?;
        if let Some(meta) = meta {
            let ids: Vec<String> = meta.snapshots.into_iter().map(|s| s.id).collect();
            self.discard_blobs(key, &ids).await;
        }
        diagnostics::info!("Cleared session {key}", key: key.to_string());
        Ok(true)
    }

    pub async fn history(&self, user: &str, source: &str) -> Result<Vec<HistoryEntry>> {
        let key = SessionKey::new(user, source);
        let _guard = self.locks.lock(&key.meta_key()).await;
        let mut meta = self.read_meta(&key).await?;
        self.touch(&key, &mut meta).await?;
        Ok(meta.entries())
    }

    pub async fn preview(
        &self,
        user: &str,
        source: &str,
        offset: usize,
        limit: usize,
    ) -> Result<TablePreview> {
        let view = self.current(user, source).await?;
        table::preview(&view.batch, offset, limit)
    }

    pub async fn profile(&self, user: &str, source: &str) -> Result<Vec<ColumnProfile>> {
        let view = self.current(user, source).await?;
        table::profile(&view.batch)
    }

    /// Persist the current snapshot as an artifact and end the session
    ///
    /// If the sink fails the session is kept so the caller can retry.
    pub async fn save(
        &self,
        user: &str,
        source: &str,
        name: &str,
        description: &str,
    ) -> Result<ArtifactRecord> {
        let sink = self
            .artifacts
            .clone()
            .ok_or_else(|| StudioError::Artifact("no artifact sink configured".to_string()))?;

        let key = SessionKey::new(user, source);
        let _guard = self.locks.lock(&key.meta_key()).await;
        let mut meta = self.read_meta(&key).await?;
        let batch = self.read_snapshot(&key, &meta.current()?.id).await?;

        let request = ArtifactRequest {
            name: name.to_string(),
            description: description.to_string(),
            user: user.to_string(),
            source: source.to_string(),
            lineage: meta.lineage(),
            batch,
        };
        let record = match sink.persist(request).await {
            Ok(record) => record,
            Err(e) => {
                self.touch(&key, &mut meta).await?;
                return Err(e);
            }
        };

        let _ = self.clear_locked(&key).await?;
        Ok(record)
    }

    async fn load_source(&self, source: &str) -> Result<RecordBatch> {
        let data_source = self.catalog.resolve(source)?;
        let loader = self.loader.clone();
        let path = data_source.path.clone();
        tokio::task::spawn_blocking(move || loader.load(&data_source))
            .await
            .map_err(|e| {
                StudioError::Load(LoadError::Corrupt {
                    path,
                    message: format!("loader task failed: {}", e),
                })
            })?
            .map_err(StudioError::from)
    }

    async fn read_meta(&self, key: &SessionKey) -> Result<SessionMeta> {
        let bytes = self
            .cache
            .get(&key.meta_key())
            .await?
            .ok_or_else(|| key.not_found())?;
        let meta: SessionMeta = serde_json::from_slice(&bytes)
            .map_err(|e| StudioError::CorruptSession(format!("unreadable metadata: {}", e)))?;
        meta.validate()?;
        Ok(meta)
    }

    async fn write_meta(&self, key: &SessionKey, meta: &SessionMeta) -> Result<()> {
        let json = serde_json::to_vec(meta)
            .map_err(|e| StudioError::CorruptSession(format!("cannot encode metadata: {}", e)))?;
        self.cache
            .set(&key.meta_key(), Bytes::from(json), self.config.session_ttl())
            .await?;
        Ok(())
    }

    async fn read_snapshot(&self, key: &SessionKey, id: &str) -> Result<RecordBatch> {
        let bytes = self
            .cache
            .get(&key.snapshot_key(id))
            .await?
            .ok_or_else(|| {
                StudioError::CorruptSession(format!("snapshot {} is missing from the store", id))
            })?;
        decode_batch(&bytes)
    }

    async fn write_snapshot(&self, key: &SessionKey, id: &str, batch: &RecordBatch) -> Result<()> {
        let blob = encode_batch(batch)?;
        diagnostics::debug!(
            "Writing snapshot {id} for {key}: {size} bytes",
            id: id,
            key: key.to_string(),
            size: blob.len()
        );
        self.cache
            .set(&key.snapshot_key(id), Bytes::from(blob), self.config.session_ttl())
            .await?;
        Ok(())
    }

    /// Best-effort removal; leftovers expire with their TTL
    async fn discard_blobs(&self, key: &SessionKey, ids: &[String]) {
        for id in ids {
            if let Err(e) = self.cache.delete(&key.snapshot_key(id)).await {
                diagnostics::warn!(
                    "Could not delete snapshot {id} of {key}: {error}",
                    id: id.as_str(),
                    key: key.to_string(),
                    error: e.to_string()
                );
            }
        }
    }

    /// Sliding expiration: extend every snapshot, then record the access
    ///
    /// The metadata write comes last; once it succeeds nothing else can fail,
    /// so an error always means the stored session is unchanged.
    async fn touch(&self, key: &SessionKey, meta: &mut SessionMeta) -> Result<()> {
        self.refresh_snapshots(key, &meta.snapshots).await?;
        meta.last_access = Utc::now();
        meta.ttl_secs = self.config.session_ttl_secs;
        self.write_meta(key, meta).await
    }

    async fn refresh_snapshots(&self, key: &SessionKey, snapshots: &[SnapshotMeta]) -> Result<()> {
        let ttl = self.config.session_ttl();
        for snapshot in snapshots {
            if !self.cache.expire(&key.snapshot_key(&snapshot.id), ttl).await? {
                diagnostics::warn!(
                    "Snapshot {id} of {key} expired before its session",
                    id: snapshot.id.as_str(),
                    key: key.to_string()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_escape_separators() {
        let key = SessionKey::new("a:b", "data/100%.csv");
        assert_eq!(key.meta_key(), "studio:a%3Ab:data/100%25.csv:meta");
        assert_eq!(key.snapshot_key("x"), "studio:a%3Ab:data/100%25.csv:snap:x");

        // Distinct identities never share a key.
        let left = SessionKey::new("a:b", "c");
        let right = SessionKey::new("a", "b:c");
        assert_ne!(left.meta_key(), right.meta_key());
    }
}
