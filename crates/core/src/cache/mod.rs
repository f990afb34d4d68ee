//! Match cache - persisted fingerprint -> resolution mapping.
//!
//! Every resolution (including NoMatch) is stored so a fingerprint is looked
//! up against the destination at most once. Entries only go away on an
//! explicit clear.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryMatchCache;
pub use sqlite::SqliteMatchCache;
pub use types::*;

/// Trait for match cache storage.
///
/// Implementations are shared between resolution workers and must be safe
/// for concurrent use.
pub trait MatchCache: Send + Sync {
    /// Look up a previous resolution.
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<MatchResult>, CacheError>;

    /// Record a resolution. Replaces any entry under the same fingerprint.
    fn put(&self, result: MatchResult) -> Result<(), CacheError>;

    /// Persist pending writes. Returns the number of entries written.
    fn flush(&self) -> Result<usize, CacheError>;

    /// Drop every entry, persisted or pending.
    fn clear(&self) -> Result<(), CacheError>;

    fn stats(&self) -> Result<CacheStats, CacheError>;
}
