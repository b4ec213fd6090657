//! Session metadata and linear history navigation
//!
//! A session is a list of snapshots plus a cursor. The list is never empty
//! and `cursor < snapshots.len()` always holds. Snapshot tables live in the
//! cache under their own keys; this metadata only names them.

use crate::error::{Result, StudioError};
use crate::ops::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a snapshot was derived from its predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation: Operation,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(operation: Operation, applied_at: DateTime<Utc>) -> Self {
        Self {
            description: operation.describe(),
            operation,
            applied_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    pub rows: usize,
    pub columns: usize,
    /// `None` only for the original load at index 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<OperationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub user: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub ttl_secs: u64,
    pub cursor: usize,
    pub snapshots: Vec<SnapshotMeta>,
}

impl SessionMeta {
    pub fn new(
        user: &str,
        source: &str,
        original: SnapshotMeta,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user: user.to_string(),
            source: source.to_string(),
            created_at: now,
            last_access: now,
            ttl_secs,
            cursor: 0,
            snapshots: vec![original],
        }
    }

    /// Check the structural invariants of a session read back from the cache
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.snapshots.first() else {
            return Err(StudioError::CorruptSession(
                "session has no snapshots".to_string(),
            ));
        };
        if self.cursor >= self.snapshots.len() {
            return Err(StudioError::CorruptSession(format!(
                "cursor {} outside history of {} snapshots",
                self.cursor,
                self.snapshots.len()
            )));
        }
        if first.record.is_some() {
            return Err(StudioError::CorruptSession(
                "original snapshot carries an operation".to_string(),
            ));
        }
        if let Some(index) = self.snapshots[1..].iter().position(|s| s.record.is_none()) {
            return Err(StudioError::CorruptSession(format!(
                "snapshot {} has no operation",
                index + 1
            )));
        }
        Ok(())
    }

    pub fn current(&self) -> Result<&SnapshotMeta> {
        self.snapshots.get(self.cursor).ok_or_else(|| {
            StudioError::CorruptSession(format!("cursor {} outside history", self.cursor))
        })
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }

    /// Append a snapshot after the cursor, discarding the redo tail
    ///
    /// Returns the discarded snapshots so their blobs can be deleted.
    pub fn push(&mut self, snapshot: SnapshotMeta) -> Vec<SnapshotMeta> {
        let discarded = self.snapshots.split_off(self.cursor + 1);
        self.snapshots.push(snapshot);
        self.cursor = self.snapshots.len() - 1;
        discarded
    }

    pub fn undo(&mut self) -> Result<()> {
        if !self.can_undo() {
            return Err(StudioError::NothingToUndo);
        }
        self.cursor -= 1;
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        if !self.can_redo() {
            return Err(StudioError::NothingToRedo);
        }
        self.cursor += 1;
        Ok(())
    }

    pub fn info(&self) -> Result<SessionInfo> {
        let current = self.current()?;
        Ok(SessionInfo {
            user: self.user.clone(),
            source: self.source.clone(),
            history_len: self.snapshots.len(),
            cursor: self.cursor,
            rows: current.rows,
            columns: current.columns,
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            current_operation: current.record.as_ref().map(|r| r.description.clone()),
            created_at: self.created_at,
            last_access: self.last_access,
            ttl_secs: self.ttl_secs,
        })
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.snapshots
            .iter()
            .enumerate()
            .map(|(index, snapshot)| HistoryEntry {
                index,
                description: snapshot
                    .record
                    .as_ref()
                    .map_or_else(|| "Original data".to_string(), |r| r.description.clone()),
                operation: snapshot.record.as_ref().map(|r| r.operation.clone()),
                applied_at: snapshot.record.as_ref().map(|r| r.applied_at),
                rows: snapshot.rows,
                columns: snapshot.columns,
                is_current: index == self.cursor,
            })
            .collect()
    }

    /// Descriptions of the operations leading to the current snapshot
    pub fn lineage(&self) -> Vec<String> {
        self.snapshots
            .iter()
            .take(self.cursor + 1)
            .filter_map(|s| s.record.as_ref().map(|r| r.description.clone()))
            .collect()
    }
}

/// Summary of a session returned by every API call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub user: String,
    pub source: String,
    pub history_len: usize,
    pub cursor: usize,
    pub rows: usize,
    pub columns: usize,
    pub can_undo: bool,
    pub can_redo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_operation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub index: usize,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    pub rows: usize,
    pub columns: usize,
    pub is_current: bool,
}
