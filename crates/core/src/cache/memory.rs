//! Non-persistent match cache.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::sqlite::stats_of;
use super::{CacheEntry, CacheError, CacheStats, Fingerprint, MatchCache, MatchResult};

/// In-memory match cache. `flush` is a no-op.
#[derive(Default)]
pub struct MemoryMatchCache {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

impl MemoryMatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MatchCache for MemoryMatchCache {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<MatchResult>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.get(fingerprint).map(|e| e.result.clone()))
    }

    fn put(&self, result: MatchResult) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::LockPoisoned)?;
        entries.insert(
            result.fingerprint.clone(),
            CacheEntry {
                result,
                resolved_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn flush(&self) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?
            .clear();
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(stats_of(entries.values(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MatchMethod;
    use crate::catalog::ItemKind;

    #[test]
    fn test_memory_cache() {
        let cache = MemoryMatchCache::new();
        assert!(cache.is_empty());

        let fp = Fingerprint::from_raw("artist:abc");
        cache
            .put(MatchResult::matched(
                fp.clone(),
                "a1",
                ItemKind::Artist,
                "b1",
                1.0,
                MatchMethod::FuzzyText,
            ))
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fp).unwrap().unwrap().destination_id(), Some("b1"));
        assert_eq!(cache.stats().unwrap().matched, 1);

        cache.clear().unwrap();
        assert!(cache.get(&fp).unwrap().is_none());
    }
}
