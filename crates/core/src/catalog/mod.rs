//! Catalog providers - uniform read/write access to a streaming catalog.
//!
//! The sync core only talks to [`CatalogProvider`]; the concrete Spotify
//! and Tidal clients live behind it and are chosen once at startup from
//! configuration.

mod http;
mod rate_limiter;
mod spotify;
mod tidal;
mod types;

pub use rate_limiter::{RateLimitStatus, RequestPacer, TokenBucket};
pub use spotify::{parse_playlist_id, SpotifyClient};
pub use tidal::TidalClient;
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};

/// Errors that can occur when talking to a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Token rejected or expired.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Token valid but not allowed to touch this resource, e.g. a playlist
    /// owned by someone else.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Provider asked us to slow down.
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Connection, DNS or timeout failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Provider returned a 5xx status.
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Resource not found (404).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Provider rejected the request for another reason.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a response body.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Operation not available on this provider.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Provider section missing or incomplete.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl CatalogError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CatalogError::RateLimited { .. } | CatalogError::Network(_) | CatalogError::Server { .. }
        )
    }

    /// Whether the whole run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatalogError::Unauthorized(_))
    }

    /// Server-requested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CatalogError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CatalogError::Parse(e.to_string())
        } else {
            CatalogError::Network(e.to_string())
        }
    }
}

/// Uniform access to one streaming catalog.
///
/// Implementations must be usable both as a sync source (read side) and as
/// a destination (search and write side).
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Short provider name, e.g. "spotify".
    fn name(&self) -> &str;

    /// Whether `lookup_isrc` / `lookup_upc` are meaningful.
    fn supports_identifier_lookup(&self) -> bool;

    // Search

    async fn search_tracks(&self, query: &TrackQuery) -> Result<Vec<TrackRef>, CatalogError>;

    /// Tracks carrying exactly this ISRC.
    async fn lookup_isrc(&self, isrc: &str) -> Result<Vec<TrackRef>, CatalogError>;

    async fn search_albums(&self, query: &AlbumQuery) -> Result<Vec<AlbumRef>, CatalogError>;

    /// Albums carrying exactly this UPC.
    async fn lookup_upc(&self, upc: &str) -> Result<Vec<AlbumRef>, CatalogError>;

    async fn search_artists(&self, name: &str, limit: u32)
        -> Result<Vec<ArtistRef>, CatalogError>;

    // Collections

    /// Playlists owned or followed by the current user (metadata only).
    async fn list_playlists(&self) -> Result<Vec<CollectionRef>, CatalogError>;

    /// Fetch one playlist by native ID or share URI/URL.
    async fn get_playlist(&self, id_or_uri: &str) -> Result<Collection, CatalogError>;

    /// Fetch the current contents of any collection.
    async fn get_collection(&self, reference: &CollectionRef) -> Result<Collection, CatalogError>;

    async fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<CollectionRef, CatalogError>;

    /// Add items to a collection. `position` is only honored for playlists;
    /// `None` appends.
    async fn add_items(
        &self,
        reference: &CollectionRef,
        ids: &[String],
        position: Option<usize>,
    ) -> Result<(), CatalogError>;

    async fn remove_items(&self, reference: &CollectionRef, ids: &[String])
        -> Result<(), CatalogError>;

    /// Identifier of the authenticated user.
    async fn current_user(&self) -> Result<String, CatalogError>;
}

/// Build the provider client described by a `[source]` / `[destination]`
/// section.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn CatalogProvider>, CatalogError> {
    match config.provider {
        ProviderKind::Spotify => {
            let spotify = config
                .spotify
                .clone()
                .ok_or_else(|| CatalogError::NotConfigured("missing [spotify] section".into()))?;
            Ok(Arc::new(SpotifyClient::new(spotify)?))
        }
        ProviderKind::Tidal => {
            let tidal = config
                .tidal
                .clone()
                .ok_or_else(|| CatalogError::NotConfigured("missing [tidal] section".into()))?;
            Ok(Arc::new(TidalClient::new(tidal)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(CatalogError::RateLimited { retry_after: None }.is_transient());
        assert!(CatalogError::Network("reset".into()).is_transient());
        assert!(CatalogError::Server {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!CatalogError::NotFound("x".into()).is_transient());

        let auth = CatalogError::Unauthorized("expired".into());
        assert!(auth.is_fatal());
        assert!(!auth.is_transient());

        let forbidden = CatalogError::Forbidden("not the owner".into());
        assert!(!forbidden.is_fatal());
        assert!(!forbidden.is_transient());
    }

    #[test]
    fn test_retry_after() {
        let err = CatalogError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(CatalogError::Network("x".into()).retry_after(), None);
    }

    #[test]
    fn test_build_provider_missing_section() {
        let config = ProviderConfig {
            provider: ProviderKind::Tidal,
            spotify: None,
            tidal: None,
        };
        let result = build_provider(&config);
        assert!(matches!(result, Err(CatalogError::NotConfigured(_))));
    }
}
