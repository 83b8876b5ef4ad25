use super::document::{HistoryDocument, HistoryRecord};
use crate::errors::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const DESCRIPTOR_SUFFIX: &str = ".tx.json";
const PENDING_SUFFIX: &str = ".history.json";
const BACKUP_SUFFIX: &str = ".backup";

/// Lifecycle of a [`Transaction`].
///
/// ```text
/// Initial  -> Prepared | Failed
/// Prepared -> Committed | RolledBack | Failed
/// ```
/// `Committed`, `RolledBack` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Initial,
    Prepared,
    Committed,
    RolledBack,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }

    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Initial, Prepared)
                | (Initial, Failed)
                | (Prepared, Committed)
                | (Prepared, RolledBack)
                | (Prepared, Failed)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the transaction does to the history document.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Adds a record; the affected path is the file being trashed.
    Move,
    /// Drops a record; the affected path is the payload being restored.
    Restore,
    /// Drops a record; the affected path is the payload being purged.
    Remove,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Restore => "restore",
            Self::Remove => "remove",
        }
    }

    /// The document as it should look once the transaction commits.
    pub(crate) fn apply(&self, document: &HistoryDocument, record: &HistoryRecord) -> HistoryDocument {
        match self {
            Self::Move => document.with_record(record),
            Self::Restore | Self::Remove => document.without_record(record),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Files that exist only while the transaction is in flight.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct StagingPaths {
    pub descriptor: PathBuf,
    pub pending_document: PathBuf,
    pub backup: PathBuf,
}

impl StagingPaths {
    pub(crate) fn new(staging_dir: &Path, id: &str) -> Self {
        Self {
            descriptor: staging_dir.join(format!("{id}{DESCRIPTOR_SUFFIX}")),
            pending_document: staging_dir.join(format!("{id}{PENDING_SUFFIX}")),
            backup: staging_dir.join(format!("{id}{BACKUP_SUFFIX}")),
        }
    }
}

/// A staged mutation of the history document.
///
/// Only the [`Journal`](super::Journal) changes a transaction's state.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    pub record: HistoryRecord,
    /// File or directory backed up before the payload operation.
    pub affected: PathBuf,
    pub metadata: TransactionMetadata,
    pub staging: StagingPaths,
}

impl Transaction {
    pub(crate) fn new(
        id: String,
        kind: TransactionKind,
        record: HistoryRecord,
        affected: PathBuf,
        staging_dir: &Path,
        now: DateTime<Utc>,
    ) -> Self {
        let staging = StagingPaths::new(staging_dir, &id);
        Self {
            id,
            kind,
            record,
            affected,
            metadata: TransactionMetadata {
                state: TransactionState::Initial,
                created_at: now,
                updated_at: now,
            },
            staging,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.metadata.state
    }

    /// Rejects any call against a transaction in a terminal state.
    pub fn ensure_active(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(CoreError::TransactionAlreadyCompleted {
                id: self.id.clone(),
                state: self.state().to_string(),
            });
        }
        Ok(())
    }

    /// Checks a transition without applying it.
    pub fn check_transition(&self, next: TransactionState) -> Result<()> {
        self.ensure_active()?;
        if !self.state().can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.state().to_string(),
                to: next.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn transition(&mut self, next: TransactionState, now: DateTime<Utc>) -> Result<()> {
        self.check_transition(next)?;
        self.metadata.state = next;
        self.metadata.updated_at = now;
        Ok(())
    }

    /// True when the last update is at least `threshold` old.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now) >= threshold
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.metadata.updated_at)
            .to_std()
            .unwrap_or_default()
    }
}
