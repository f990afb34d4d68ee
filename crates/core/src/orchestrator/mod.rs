//! Sync orchestrator - drives each collection from source fetch to applied
//! destination changes.
//!
//! - **Resolution**: concurrent, bounded by `sync.max_concurrency`, one lookup
//!   per fingerprint
//! - **Collections**: sequential, so playlist insert positions stay valid
//! - **Retries**: bounded exponential backoff on transient provider errors

mod retry;
mod runner;
mod types;

pub use retry::{backoff_delay, retry_with_backoff, Retryable};
pub use runner::SyncOrchestrator;
pub use types::{
    CollectionReport, CollectionStatus, ErroredItem, Selection, SkippedItem, SyncError, SyncReport,
    SyncStage, UnresolvedItem,
};
