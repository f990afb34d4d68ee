use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::differ::PlaylistOrdering;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub source: Option<ProviderConfig>,
    #[serde(default)]
    pub destination: Option<ProviderConfig>,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Manual matches: source native ID -> destination ID.
    /// An empty destination ID forces a NoMatch.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

/// Available catalog backends
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Spotify,
    Tidal,
}

/// One side of the migration (source or destination)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Catalog backend type
    pub provider: ProviderKind,
    /// Spotify-specific configuration (required when provider = "spotify")
    #[serde(default)]
    pub spotify: Option<SpotifyConfig>,
    /// Tidal-specific configuration (required when provider = "tidal")
    #[serde(default)]
    pub tidal: Option<TidalConfig>,
}

/// Spotify Web API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpotifyConfig {
    /// OAuth bearer token with library read/modify scopes
    pub access_token: String,
    /// Market used for search (e.g., "US")
    #[serde(default)]
    pub market: Option<String>,
    /// API base URL (default: https://api.spotify.com/v1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Request budget per minute
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

/// Tidal API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TidalConfig {
    /// OAuth bearer token
    pub access_token: String,
    /// Numeric Tidal user ID owning the collections
    pub user_id: String,
    /// Country code used for catalog lookups (default: "US")
    #[serde(default = "default_country_code")]
    pub country_code: String,
    /// API base URL (default: https://api.tidal.com/v1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Request budget per minute
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_requests_per_minute() -> u32 {
    180
}

fn default_timeout() -> u32 {
    30
}

fn default_country_code() -> String {
    "US".to_string()
}

/// Matcher tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatcherConfig {
    /// Minimum weighted score (0.0-1.0) for a fuzzy candidate to be accepted
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Maximum duration difference in seconds
    #[serde(default = "default_duration_tolerance")]
    pub duration_tolerance_secs: u32,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_artist_weight")]
    pub artist_weight: f64,
    #[serde(default = "default_duration_weight")]
    pub duration_weight: f64,
    /// Candidates requested per search
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

fn default_threshold() -> f64 {
    0.75
}

fn default_duration_tolerance() -> u32 {
    3
}

fn default_title_weight() -> f64 {
    0.5
}

fn default_artist_weight() -> f64 {
    0.3
}

fn default_duration_weight() -> f64 {
    0.2
}

fn default_search_limit() -> u32 {
    10
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            duration_tolerance_secs: default_duration_tolerance(),
            title_weight: default_title_weight(),
            artist_weight: default_artist_weight(),
            duration_weight: default_duration_weight(),
            search_limit: default_search_limit(),
        }
    }
}

/// Match cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Flush to disk after this many new entries (0 = only on explicit flush)
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            flush_every: default_flush_every(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("tunebridge-cache.db")
}

fn default_flush_every() -> usize {
    100
}

/// Sync behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Maximum concurrent item resolutions
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Remove destination items that are absent from the source
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub playlist_ordering: PlaylistOrdering,
    /// Compute and report plans without applying them
    #[serde(default)]
    pub dry_run: bool,
    /// Source playlist IDs or names skipped during a full sync
    #[serde(default)]
    pub excluded_playlists: Vec<String>,
    /// Explicit playlist mappings. When set, a full sync only covers these.
    #[serde(default)]
    pub playlists: Vec<PlaylistMapping>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            mirror: false,
            playlist_ordering: PlaylistOrdering::default(),
            dry_run: false,
            excluded_playlists: Vec::new(),
            playlists: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}

/// Source playlist -> destination playlist mapping
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlaylistMapping {
    /// Source playlist ID or URI
    pub source: String,
    /// Destination playlist ID (looked up by name or created when absent)
    #[serde(default)]
    pub destination: Option<String>,
}

/// Retry policy for transient provider failures
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

/// Sanitized config for display (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SanitizedProviderConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<SanitizedProviderConfig>,
    pub matcher: MatcherConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub override_count: usize,
}

/// Sanitized provider config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub provider: String,
    pub access_token_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub requests_per_minute: u32,
}

impl From<&ProviderConfig> for SanitizedProviderConfig {
    fn from(config: &ProviderConfig) -> Self {
        match config.provider {
            ProviderKind::Spotify => Self {
                provider: "spotify".to_string(),
                access_token_configured: config
                    .spotify
                    .as_ref()
                    .is_some_and(|s| !s.access_token.is_empty()),
                base_url: config.spotify.as_ref().and_then(|s| s.base_url.clone()),
                requests_per_minute: config
                    .spotify
                    .as_ref()
                    .map(|s| s.requests_per_minute)
                    .unwrap_or_else(default_requests_per_minute),
            },
            ProviderKind::Tidal => Self {
                provider: "tidal".to_string(),
                access_token_configured: config
                    .tidal
                    .as_ref()
                    .is_some_and(|t| !t.access_token.is_empty()),
                base_url: config.tidal.as_ref().and_then(|t| t.base_url.clone()),
                requests_per_minute: config
                    .tidal
                    .as_ref()
                    .map(|t| t.requests_per_minute)
                    .unwrap_or_else(default_requests_per_minute),
            },
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            source: config.source.as_ref().map(SanitizedProviderConfig::from),
            destination: config.destination.as_ref().map(SanitizedProviderConfig::from),
            matcher: config.matcher.clone(),
            cache: config.cache.clone(),
            sync: config.sync.clone(),
            override_count: config.overrides.len(),
        }
    }
}
