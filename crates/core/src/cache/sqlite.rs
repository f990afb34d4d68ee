//! SQLite-backed match cache.
//!
//! All rows are loaded into memory on open. Reads never touch the database;
//! writes are buffered and persisted in a single transaction on flush.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use super::{
    CacheEntry, CacheError, CacheStats, Fingerprint, MatchCache, MatchMethod, MatchOutcome,
    MatchResult,
};
use crate::catalog::ItemKind;

struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    dirty: HashSet<Fingerprint>,
    puts_since_flush: usize,
}

/// SQLite-backed match cache.
pub struct SqliteMatchCache {
    conn: Mutex<Connection>,
    state: Mutex<CacheState>,
    /// Automatic flush after this many puts (0 disables).
    flush_every: usize,
}

impl SqliteMatchCache {
    /// Open (or create) the cache database and load all entries.
    pub fn open(path: &Path, flush_every: usize) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Database(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| CacheError::Database(e.to_string()))?;
        Self::from_connection(conn, flush_every)
    }

    /// Create an in-memory cache (useful for testing).
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CacheError::Database(e.to_string()))?;
        Self::from_connection(conn, 0)
    }

    fn from_connection(conn: Connection, flush_every: usize) -> Result<Self, CacheError> {
        Self::initialize_schema(&conn)?;
        let entries = Self::load_entries(&conn)?;
        debug!("Match cache loaded {} entries", entries.len());

        Ok(Self {
            conn: Mutex::new(conn),
            state: Mutex::new(CacheState {
                entries,
                dirty: HashSet::new(),
                puts_since_flush: 0,
            }),
            flush_every,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CacheError> {
        conn.execute_batch(
            r#"
            -- One row per resolved fingerprint; NULL destination_id = NoMatch
            CREATE TABLE IF NOT EXISTS match_cache (
                fingerprint TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                source_id TEXT NOT NULL,
                destination_id TEXT,
                confidence REAL NOT NULL,
                method TEXT NOT NULL,
                resolved_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_match_cache_resolved_at ON match_cache(resolved_at);
            "#,
        )
        .map_err(|e| CacheError::Database(e.to_string()))?;

        Ok(())
    }

    fn load_entries(conn: &Connection) -> Result<HashMap<Fingerprint, CacheEntry>, CacheError> {
        let mut stmt = conn
            .prepare(
                "SELECT fingerprint, kind, source_id, destination_id, confidence, method, resolved_at
                 FROM match_cache",
            )
            .map_err(|e| CacheError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawRow {
                    fingerprint: row.get(0)?,
                    kind: row.get(1)?,
                    source_id: row.get(2)?,
                    destination_id: row.get(3)?,
                    confidence: row.get(4)?,
                    method: row.get(5)?,
                    resolved_at: row.get(6)?,
                })
            })
            .map_err(|e| CacheError::Database(e.to_string()))?;

        let mut entries = HashMap::new();
        for row in rows {
            let raw = row.map_err(|e| CacheError::Database(e.to_string()))?;
            match raw.into_entry() {
                Ok(entry) => {
                    entries.insert(entry.result.fingerprint.clone(), entry);
                }
                // unreadable rows are re-resolved and overwritten
                Err(e) => warn!("Skipping cache row: {}", e),
            }
        }
        Ok(entries)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, CacheState>, CacheError> {
        self.state.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Write dirty entries. Caller holds the state lock.
    fn write_dirty(&self, state: &mut CacheState) -> Result<usize, CacheError> {
        if state.dirty.is_empty() {
            state.puts_since_flush = 0;
            return Ok(0);
        }

        let mut conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
        let tx = conn
            .transaction()
            .map_err(|e| CacheError::Database(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO match_cache
                     (fingerprint, kind, source_id, destination_id, confidence, method, resolved_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| CacheError::Database(e.to_string()))?;

            for fingerprint in &state.dirty {
                let Some(entry) = state.entries.get(fingerprint) else {
                    continue;
                };
                let result = &entry.result;
                stmt.execute(params![
                    result.fingerprint.as_str(),
                    kind_to_str(result.kind),
                    result.source_id,
                    result.destination_id(),
                    result.confidence,
                    result.method.as_str(),
                    entry.resolved_at.to_rfc3339(),
                ])
                .map_err(|e| CacheError::Database(e.to_string()))?;
            }
        }
        tx.commit()
            .map_err(|e| CacheError::Database(e.to_string()))?;

        let written = state.dirty.len();
        state.dirty.clear();
        state.puts_since_flush = 0;
        debug!("Match cache flushed {} entries", written);
        Ok(written)
    }
}

impl MatchCache for SqliteMatchCache {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<MatchResult>, CacheError> {
        let state = self.lock_state()?;
        Ok(state.entries.get(fingerprint).map(|e| e.result.clone()))
    }

    fn put(&self, result: MatchResult) -> Result<(), CacheError> {
        let mut state = self.lock_state()?;
        let fingerprint = result.fingerprint.clone();
        state.entries.insert(
            fingerprint.clone(),
            CacheEntry {
                result,
                resolved_at: Utc::now(),
            },
        );
        state.dirty.insert(fingerprint);
        state.puts_since_flush += 1;

        if self.flush_every > 0 && state.puts_since_flush >= self.flush_every {
            self.write_dirty(&mut state)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<usize, CacheError> {
        let mut state = self.lock_state()?;
        self.write_dirty(&mut state)
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.lock_state()?;
        let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;

        conn.execute("DELETE FROM match_cache", [])
            .map_err(|e| CacheError::Database(e.to_string()))?;

        state.entries.clear();
        state.dirty.clear();
        state.puts_since_flush = 0;
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let state = self.lock_state()?;
        Ok(stats_of(state.entries.values(), state.dirty.len()))
    }
}

/// Compute stats over a set of entries.
pub(super) fn stats_of<'a>(
    entries: impl Iterator<Item = &'a CacheEntry>,
    pending: usize,
) -> CacheStats {
    let mut stats = CacheStats {
        pending_writes: pending as u64,
        ..Default::default()
    };
    for entry in entries {
        stats.entries += 1;
        if entry.result.is_match() {
            stats.matched += 1;
        } else {
            stats.no_match += 1;
        }
        let at = entry.resolved_at;
        stats.oldest_entry = Some(stats.oldest_entry.map_or(at, |o| o.min(at)));
        stats.newest_entry = Some(stats.newest_entry.map_or(at, |n| n.max(at)));
    }
    stats
}

struct RawRow {
    fingerprint: String,
    kind: String,
    source_id: String,
    destination_id: Option<String>,
    confidence: f64,
    method: String,
    resolved_at: String,
}

impl RawRow {
    fn into_entry(self) -> Result<CacheEntry, CacheError> {
        let corrupt = |reason: String| CacheError::Corrupt {
            fingerprint: self.fingerprint.clone(),
            reason,
        };

        let kind = kind_from_str(&self.kind)
            .ok_or_else(|| corrupt(format!("unknown kind '{}'", self.kind)))?;
        let method = MatchMethod::parse(&self.method)
            .ok_or_else(|| corrupt(format!("unknown method '{}'", self.method)))?;
        let resolved_at = DateTime::parse_from_rfc3339(&self.resolved_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("bad timestamp: {}", e)))?;

        let outcome = match self.destination_id {
            Some(destination_id) => MatchOutcome::Matched { destination_id },
            None => MatchOutcome::NoMatch,
        };

        Ok(CacheEntry {
            result: MatchResult {
                fingerprint: Fingerprint::from_raw(self.fingerprint),
                source_id: self.source_id,
                kind,
                outcome,
                confidence: self.confidence,
                method,
            },
            resolved_at,
        })
    }
}

fn kind_to_str(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Track => "track",
        ItemKind::Album => "album",
        ItemKind::Artist => "artist",
    }
}

fn kind_from_str(s: &str) -> Option<ItemKind> {
    match s {
        "track" => Some(ItemKind::Track),
        "album" => Some(ItemKind::Album),
        "artist" => Some(ItemKind::Artist),
        _ => None,
    }
}
