//! Types for the sync orchestrator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::backup::BackupError;
use crate::cache::CacheError;
use crate::catalog::{CatalogError, CollectionKind};
use crate::matcher::MatchError;

/// Errors that stop an operation. Per-collection failures are reported in
/// [`CollectionReport`] instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("match cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("no {0} provider configured")]
    ProviderNotConfigured(&'static str),
}

impl From<MatchError> for SyncError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Catalog(e) => SyncError::Catalog(e),
            MatchError::Cache(e) => SyncError::Cache(e),
        }
    }
}

impl SyncError {
    /// Whether the whole run must stop rather than just this collection.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Catalog(e) => e.is_fatal(),
            SyncError::Cache(_) | SyncError::Backup(_) | SyncError::ProviderNotConfigured(_) => {
                true
            }
        }
    }
}

/// Per-collection state machine stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    FetchingSource,
    Resolving,
    FetchingDestination,
    Diffing,
    Applying,
    Done,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStage::FetchingSource => "fetching source",
            SyncStage::Resolving => "resolving",
            SyncStage::FetchingDestination => "fetching destination",
            SyncStage::Diffing => "diffing",
            SyncStage::Applying => "applying",
            SyncStage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Which parts of the library a full sync, export or import covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub playlists: bool,
    pub favorites: bool,
    pub albums: bool,
    pub artists: bool,
}

impl Default for Selection {
    fn default() -> Self {
        Self::all()
    }
}

impl Selection {
    pub fn all() -> Self {
        Self {
            playlists: true,
            favorites: true,
            albums: true,
            artists: true,
        }
    }

    pub fn none() -> Self {
        Self {
            playlists: false,
            favorites: false,
            albums: false,
            artists: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectionStatus {
    Synced,
    Failed { stage: SyncStage, reason: String },
    Skipped { reason: String },
}

/// A source item with no destination counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedItem {
    pub source_id: String,
    pub name: String,
    /// Best rejected score.
    pub best_confidence: f64,
}

/// A source item whose resolution failed after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErroredItem {
    pub source_id: String,
    pub name: String,
    pub reason: String,
}

/// A source entry that could not be synced at all, e.g. a backup track
/// without an ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub name: String,
    pub kind: CollectionKind,
    /// Destination collection ID, when one exists or was created.
    pub destination_id: Option<String>,
    #[serde(flatten)]
    pub status: CollectionStatus,
    pub total: usize,
    pub matched: usize,
    pub unmatched: Vec<UnresolvedItem>,
    pub errored: Vec<ErroredItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedItem>,
    pub added: usize,
    pub removed: usize,
    pub rebuilt: bool,
}

impl CollectionReport {
    pub fn new(name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            destination_id: None,
            status: CollectionStatus::Synced,
            total: 0,
            matched: 0,
            unmatched: Vec::new(),
            errored: Vec::new(),
            skipped: Vec::new(),
            added: 0,
            removed: 0,
            rebuilt: false,
        }
    }

    pub fn failed(mut self, stage: SyncStage, reason: impl fmt::Display) -> Self {
        self.status = CollectionStatus::Failed {
            stage,
            reason: reason.to_string(),
        };
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = CollectionStatus::Skipped {
            reason: reason.into(),
        };
        self
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, CollectionStatus::Failed { .. })
    }

    /// Nothing was or would be written.
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub collections: Vec<CollectionReport>,
}

impl SyncReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            collections: Vec::new(),
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn has_failures(&self) -> bool {
        self.collections.iter().any(CollectionReport::is_failed)
    }

    pub fn total_matched(&self) -> usize {
        self.collections.iter().map(|c| c.matched).sum()
    }

    pub fn total_unmatched(&self) -> usize {
        self.collections.iter().map(|c| c.unmatched.len()).sum()
    }

    pub fn total_errored(&self) -> usize {
        self.collections.iter().map(|c| c.errored.len()).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.collections.iter().map(|c| c.skipped.len()).sum()
    }
}
