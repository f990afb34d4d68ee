//! Types for the match cache.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::ItemKind;

/// Deterministic cache key for a source item.
///
/// Prefixed by how it was derived: `isrc:`, `upc:`, `track:`, `album:` or
/// `artist:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed key (e.g. read back from storage).
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key was derived from a global identifier.
    pub fn is_identifier(&self) -> bool {
        self.0.starts_with("isrc:") || self.0.starts_with("upc:")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a match was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// ISRC (tracks) or UPC (albums) lookup.
    Identifier,
    /// Weighted text similarity over search candidates.
    FuzzyText,
    /// Configured override.
    ManualOverride,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Identifier => "identifier",
            MatchMethod::FuzzyText => "fuzzy_text",
            MatchMethod::ManualOverride => "manual_override",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identifier" => Some(MatchMethod::Identifier),
            "fuzzy_text" => Some(MatchMethod::FuzzyText),
            "manual_override" => Some(MatchMethod::ManualOverride),
            _ => None,
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one source item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { destination_id: String },
    NoMatch,
}

/// Result of resolving one source item against the destination catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub fingerprint: Fingerprint,
    /// Native ID in the source catalog.
    pub source_id: String,
    pub kind: ItemKind,
    pub outcome: MatchOutcome,
    /// Score in [0, 1]. For `NoMatch` this is the best rejected score.
    pub confidence: f64,
    pub method: MatchMethod,
}

impl MatchResult {
    pub fn matched(
        fingerprint: Fingerprint,
        source_id: impl Into<String>,
        kind: ItemKind,
        destination_id: impl Into<String>,
        confidence: f64,
        method: MatchMethod,
    ) -> Self {
        Self {
            fingerprint,
            source_id: source_id.into(),
            kind,
            outcome: MatchOutcome::Matched {
                destination_id: destination_id.into(),
            },
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }

    pub fn no_match(
        fingerprint: Fingerprint,
        source_id: impl Into<String>,
        kind: ItemKind,
        best_score: f64,
        method: MatchMethod,
    ) -> Self {
        Self {
            fingerprint,
            source_id: source_id.into(),
            kind,
            outcome: MatchOutcome::NoMatch,
            confidence: best_score.clamp(0.0, 1.0),
            method,
        }
    }

    pub fn destination_id(&self) -> Option<&str> {
        match &self.outcome {
            MatchOutcome::Matched { destination_id } => Some(destination_id),
            MatchOutcome::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self.outcome, MatchOutcome::Matched { .. })
    }

    /// Same resolution re-keyed for another source item sharing the
    /// fingerprint.
    pub fn for_source(&self, source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            ..self.clone()
        }
    }
}

/// A stored cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: MatchResult,
    pub resolved_at: DateTime<Utc>,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total entries (persisted and pending).
    pub entries: u64,
    /// Entries resolving to a destination ID.
    pub matched: u64,
    /// Entries recorded as NoMatch.
    pub no_match: u64,
    /// Entries not yet written to storage.
    pub pending_writes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_entry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Errors for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt cache entry {fingerprint}: {reason}")]
    Corrupt { fingerprint: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}
