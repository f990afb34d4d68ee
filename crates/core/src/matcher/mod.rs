//! Matcher - resolves source items to destination catalog IDs.
//!
//! Resolution order for every item:
//! 1. configured override
//! 2. match cache
//! 3. exact identifier lookup (ISRC for tracks, UPC for albums)
//! 4. fuzzy text search with weighted scoring
//! 5. NoMatch
//!
//! Every outcome except an error is written to the cache.

mod fingerprint;
pub mod normalize;
pub mod scoring;

pub use fingerprint::{album_fingerprint, artist_fingerprint, fingerprint, track_fingerprint};

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheError, MatchCache, MatchMethod, MatchResult};
use crate::catalog::{
    AlbumQuery, AlbumRef, ArtistRef, CatalogError, CatalogProvider, ItemKind, SourceItem,
    TrackQuery, TrackRef,
};
use crate::config::MatcherConfig;
use scoring::{rank_albums, rank_artists, rank_tracks, Scored};

/// Errors that prevent a resolution. Never cached.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Destination lookup failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Match cache failed: {0}")]
    Cache(#[from] CacheError),
}

impl MatchError {
    /// Whether retrying the resolution later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MatchError::Catalog(e) => e.is_transient(),
            MatchError::Cache(_) => false,
        }
    }

    /// Whether the whole run must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            MatchError::Catalog(e) => e.is_fatal(),
            MatchError::Cache(_) => true,
        }
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            MatchError::Catalog(e) => e.retry_after(),
            MatchError::Cache(_) => None,
        }
    }
}

/// Resolves source items against a destination catalog.
pub struct Matcher {
    config: MatcherConfig,
    cache: Arc<dyn MatchCache>,
    /// Source native ID -> destination ID; empty string forces NoMatch.
    overrides: HashMap<String, String>,
}

impl Matcher {
    pub fn new(config: MatcherConfig, cache: Arc<dyn MatchCache>) -> Self {
        Self {
            config,
            cache,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn cache(&self) -> &Arc<dyn MatchCache> {
        &self.cache
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn has_override(&self, source_id: &str) -> bool {
        self.overrides.contains_key(source_id)
    }

    /// Resolve one source item.
    pub async fn resolve(
        &self,
        item: &SourceItem,
        destination: &dyn CatalogProvider,
    ) -> Result<MatchResult, MatchError> {
        let fp = fingerprint(item);

        if let Some(target) = self.overrides.get(item.id()) {
            let result = if target.is_empty() {
                MatchResult::no_match(fp, item.id(), item.kind(), 1.0, MatchMethod::ManualOverride)
            } else {
                MatchResult::matched(
                    fp,
                    item.id(),
                    item.kind(),
                    target.clone(),
                    1.0,
                    MatchMethod::ManualOverride,
                )
            };
            debug!("Override for {}: {:?}", item.display_name(), result.outcome);
            self.cache.put(result.clone())?;
            return Ok(result);
        }

        if let Some(cached) = self.cache.get(&fp)? {
            debug!("Cache hit for {} ({})", item.display_name(), fp);
            return Ok(cached.for_source(item.id()));
        }

        let result = match item {
            SourceItem::Track(track) => self.resolve_track(track, destination).await?,
            SourceItem::Album(album) => self.resolve_album(album, destination).await?,
            SourceItem::Artist(artist) => self.resolve_artist(artist, destination).await?,
        };

        debug!(
            "Resolved {} via {} -> {:?} (confidence {:.2})",
            item.display_name(),
            result.method,
            result.outcome,
            result.confidence
        );
        self.cache.put(result.clone())?;
        Ok(result)
    }

    async fn resolve_track(
        &self,
        track: &TrackRef,
        destination: &dyn CatalogProvider,
    ) -> Result<MatchResult, MatchError> {
        let fp = track_fingerprint(track);

        if let Some(isrc) = track.isrc().filter(|_| destination.supports_identifier_lookup()) {
            let hits = destination.lookup_isrc(isrc).await?;
            // several releases of one recording: pick the closest, no threshold
            let chosen = match hits.len() {
                0 => None,
                1 => Some(0),
                _ => rank_tracks(track, &hits, &self.config, false)
                    .first()
                    .map(|s| s.rank),
            };
            if let Some(index) = chosen {
                return Ok(MatchResult::matched(
                    fp,
                    &track.id,
                    ItemKind::Track,
                    hits[index].id.clone(),
                    1.0,
                    MatchMethod::Identifier,
                ));
            }
            debug!("ISRC {} not found in {}, falling back to search", isrc, destination.name());
        }

        let query = TrackQuery {
            title: normalize::search_title(&track.title),
            artist: track.primary_artist().map(normalize::fold_accents),
            duration_secs: track.duration_secs(),
            limit: self.config.search_limit,
        };
        let candidates = destination.search_tracks(&query).await?;
        let ranked = rank_tracks(track, &candidates, &self.config, true);

        Ok(self.pick(fp, &track.id, ItemKind::Track, &ranked, |i| {
            candidates[i].id.clone()
        }))
    }

    async fn resolve_album(
        &self,
        album: &AlbumRef,
        destination: &dyn CatalogProvider,
    ) -> Result<MatchResult, MatchError> {
        let fp = album_fingerprint(album);

        if let Some(upc) = album.upc().filter(|_| destination.supports_identifier_lookup()) {
            let hits = destination.lookup_upc(upc).await?;
            let chosen = match hits.len() {
                0 => None,
                1 => Some(0),
                _ => rank_albums(album, &hits).first().map(|s| s.rank),
            };
            if let Some(index) = chosen {
                return Ok(MatchResult::matched(
                    fp,
                    &album.id,
                    ItemKind::Album,
                    hits[index].id.clone(),
                    1.0,
                    MatchMethod::Identifier,
                ));
            }
        }

        let query = AlbumQuery {
            title: normalize::search_title(&album.title),
            artist: album.primary_artist().map(normalize::fold_accents),
            limit: self.config.search_limit,
        };
        let candidates = destination.search_albums(&query).await?;
        let ranked = rank_albums(album, &candidates);

        Ok(self.pick(fp, &album.id, ItemKind::Album, &ranked, |i| {
            candidates[i].id.clone()
        }))
    }

    async fn resolve_artist(
        &self,
        artist: &ArtistRef,
        destination: &dyn CatalogProvider,
    ) -> Result<MatchResult, MatchError> {
        let fp = artist_fingerprint(artist);
        let candidates = destination
            .search_artists(&artist.name, self.config.search_limit)
            .await?;
        let ranked = rank_artists(artist, &candidates);

        Ok(self.pick(fp, &artist.id, ItemKind::Artist, &ranked, |i| {
            candidates[i].id.clone()
        }))
    }

    /// Accept the best ranked candidate if it clears the threshold.
    fn pick(
        &self,
        fp: crate::cache::Fingerprint,
        source_id: &str,
        kind: ItemKind,
        ranked: &[Scored],
        id_of: impl Fn(usize) -> String,
    ) -> MatchResult {
        match ranked.first() {
            Some(best) if best.score >= self.config.threshold => MatchResult::matched(
                fp,
                source_id,
                kind,
                id_of(best.rank),
                best.score,
                MatchMethod::FuzzyText,
            ),
            best => MatchResult::no_match(
                fp,
                source_id,
                kind,
                best.map(|b| b.score).unwrap_or(0.0),
                MatchMethod::FuzzyText,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MatchOutcome, MemoryMatchCache};
    use crate::testing::MockCatalog;

    fn track(id: &str, title: &str, artist: &str, secs: u64, isrc: Option<&str>) -> TrackRef {
        let mut t = TrackRef::new(id, title, vec![artist.to_string()]);
        t.duration_ms = Some(secs * 1000);
        t.isrc = isrc.map(str::to_string);
        t
    }

    fn matcher() -> Matcher {
        Matcher::new(MatcherConfig::default(), Arc::new(MemoryMatchCache::new()))
    }

    #[tokio::test]
    async fn test_isrc_match_skips_search() {
        let destination = MockCatalog::new("dest");
        destination.add_track(track("d1", "Song A", "Artist X", 201, Some("US1234567890")));

        let matcher = matcher();
        let item = SourceItem::Track(track("s1", "Song A", "Artist X", 200, Some("US1234567890")));
        let result = matcher.resolve(&item, &destination).await.unwrap();

        assert_eq!(result.destination_id(), Some("d1"));
        assert_eq!(result.method, MatchMethod::Identifier);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(destination.search_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_isrc_hits_pick_closest() {
        let destination = MockCatalog::new("dest");
        destination.add_track(track("d-compilation", "Song A", "Various", 230, Some("US1")));
        destination.add_track(track("d-album", "Song A", "Artist X", 200, Some("US1")));

        let item = SourceItem::Track(track("s1", "Song A", "Artist X", 200, Some("US1")));
        let result = matcher().resolve(&item, &destination).await.unwrap();
        assert_eq!(result.destination_id(), Some("d-album"));
        assert_eq!(result.method, MatchMethod::Identifier);
    }

    #[tokio::test]
    async fn test_unknown_isrc_falls_back_to_fuzzy() {
        let destination = MockCatalog::new("dest");
        destination.add_track(track("d1", "Song A", "Artist X", 200, None));

        let item = SourceItem::Track(track("s1", "Song A", "Artist X", 200, Some("US999")));
        let result = matcher().resolve(&item, &destination).await.unwrap();
        assert_eq!(result.destination_id(), Some("d1"));
        assert_eq!(result.method, MatchMethod::FuzzyText);
        assert_eq!(destination.search_count(), 1);
    }

    #[tokio::test]
    async fn test_live_version_is_no_match() {
        let destination = MockCatalog::new("dest");
        destination.add_track(track("d1", "Song B", "Artist Y", 200, None));

        let item = SourceItem::Track(track("s1", "Song B (Live)", "Artist Y", 240, None));
        let result = matcher().resolve(&item, &destination).await.unwrap();
        assert_eq!(result.outcome, MatchOutcome::NoMatch);
        assert_eq!(result.method, MatchMethod::FuzzyText);
    }

    #[tokio::test]
    async fn test_no_match_is_cached() {
        let destination = MockCatalog::new("dest");
        let matcher = matcher();
        let item = SourceItem::Track(track("s1", "Obscure", "Nobody", 100, None));

        let first = matcher.resolve(&item, &destination).await.unwrap();
        assert!(!first.is_match());
        let second = matcher.resolve(&item, &destination).await.unwrap();
        assert!(!second.is_match());
        assert_eq!(destination.search_count(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let destination = MockCatalog::new("dest");
        destination.fail_next_searches(1, || CatalogError::Network("reset".into()));
        destination.add_track(track("d1", "Song A", "Artist X", 200, None));

        let matcher = matcher();
        let item = SourceItem::Track(track("s1", "Song A", "Artist X", 200, None));

        let err = matcher.resolve(&item, &destination).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(matcher.cache().stats().unwrap().entries, 0);

        let result = matcher.resolve(&item, &destination).await.unwrap();
        assert_eq!(result.destination_id(), Some("d1"));
    }

    #[tokio::test]
    async fn test_override_wins() {
        let destination = MockCatalog::new("dest");
        destination.add_track(track("d1", "Song A", "Artist X", 200, Some("US1")));

        let overrides = HashMap::from([
            ("s1".to_string(), "forced".to_string()),
            ("s2".to_string(), String::new()),
        ]);
        let matcher = matcher().with_overrides(overrides);

        let item = SourceItem::Track(track("s1", "Song A", "Artist X", 200, Some("US1")));
        let result = matcher.resolve(&item, &destination).await.unwrap();
        assert_eq!(result.destination_id(), Some("forced"));
        assert_eq!(result.method, MatchMethod::ManualOverride);

        let item = SourceItem::Track(track("s2", "Song A", "Artist X", 200, None));
        let result = matcher.resolve(&item, &destination).await.unwrap();
        assert!(!result.is_match());
        assert_eq!(destination.search_count(), 0);
    }

    #[tokio::test]
    async fn test_album_and_artist_resolution() {
        let destination = MockCatalog::new("dest");
        let mut album = AlbumRef::new("da", "Abbey Road", vec!["The Beatles".into()]);
        album.upc = Some("0094638246824".into());
        destination.add_album(album);
        destination.add_artist(ArtistRef::new("dx", "Bjork"));

        let matcher = matcher();

        let mut source_album = AlbumRef::new("sa", "Abbey Road (Remastered)", vec!["The Beatles".into()]);
        source_album.upc = Some("0094638246824".into());
        let result = matcher
            .resolve(&SourceItem::Album(source_album), &destination)
            .await
            .unwrap();
        assert_eq!(result.destination_id(), Some("da"));
        assert_eq!(result.method, MatchMethod::Identifier);

        let result = matcher
            .resolve(&SourceItem::Artist(ArtistRef::new("sx", "Björk")), &destination)
            .await
            .unwrap();
        assert_eq!(result.destination_id(), Some("dx"));
        assert_eq!(result.method, MatchMethod::FuzzyText);
    }

    #[tokio::test]
    async fn test_fatal_error_classification() {
        let destination = MockCatalog::new("dest");
        destination.fail_next_searches(1, || CatalogError::Unauthorized("expired".into()));

        let item = SourceItem::Artist(ArtistRef::new("sx", "Someone"));
        let err = matcher().resolve(&item, &destination).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }
}
