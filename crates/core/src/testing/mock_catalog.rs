//! In-memory catalog provider for tests.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::catalog::{
    AlbumQuery, AlbumRef, ArtistRef, CatalogError, CatalogProvider, Collection, CollectionKind,
    CollectionRef, ItemKind, SourceItem, TrackQuery, TrackRef,
};
use crate::matcher::normalize::{fold_accents, normalize_text};

type ErrorFactory = Box<dyn Fn() -> CatalogError + Send + Sync>;

/// A write made against the mock, recorded for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    CreatePlaylist {
        name: String,
    },
    Add {
        collection: String,
        ids: Vec<String>,
        position: Option<usize>,
    },
    Remove {
        collection: String,
        ids: Vec<String>,
    },
}

#[derive(Default)]
struct MockState {
    tracks: Vec<TrackRef>,
    albums: Vec<AlbumRef>,
    artists: Vec<ArtistRef>,
    /// Playlist IDs in listing order.
    playlist_order: Vec<String>,
    collections: HashMap<String, Collection>,
    calls: Vec<RecordedCall>,
    created: usize,
}

struct FailurePlan {
    /// Calls let through before failures start.
    skip: usize,
    remaining: usize,
    factory: ErrorFactory,
}

/// Mock implementation of [`CatalogProvider`].
///
/// Searchable items are registered with `add_track` / `add_album` /
/// `add_artist`; user collections with `add_playlist` and `set_collection`.
/// Searches match on shared title tokens, which is enough for the scorer to
/// do the real work.
///
/// ```rust,ignore
/// use tunebridge_core::testing::{fixtures, MockCatalog};
///
/// let destination = MockCatalog::new("dest");
/// destination.add_track(fixtures::track("d1", "Song A", "Artist X", 200, Some("US1")));
/// destination.fail_next_searches(1, || CatalogError::Network("reset".into()));
/// ```
pub struct MockCatalog {
    name: String,
    identifier_lookup: AtomicBool,
    state: Mutex<MockState>,
    searches: AtomicUsize,
    search_failures: Mutex<Option<FailurePlan>>,
    read_failures: Mutex<Option<FailurePlan>>,
    write_failures: Mutex<Option<FailurePlan>>,
    /// Items committed per write request; 0 writes a call in one request.
    write_batch: AtomicUsize,
}

impl std::fmt::Debug for MockCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCatalog")
            .field("name", &self.name)
            .field("searches", &self.search_count())
            .finish()
    }
}

impl MockCatalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier_lookup: AtomicBool::new(true),
            state: Mutex::new(MockState::default()),
            searches: AtomicUsize::new(0),
            search_failures: Mutex::new(None),
            read_failures: Mutex::new(None),
            write_failures: Mutex::new(None),
            write_batch: AtomicUsize::new(0),
        }
    }

    /// Behave like a catalog without ISRC/UPC lookup.
    pub fn without_identifier_lookup(self) -> Self {
        self.identifier_lookup.store(false, Ordering::SeqCst);
        self
    }

    /// Commit adds and removes in requests of `size` items, the way real
    /// catalogs cap request bodies. Injected write failures apply per request.
    pub fn with_write_batch(self, size: usize) -> Self {
        self.write_batch.store(size, Ordering::SeqCst);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test poisons the lock; later asserts should still see state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Catalog contents
    // ========================================================================

    pub fn add_track(&self, track: TrackRef) {
        self.state().tracks.push(track);
    }

    pub fn add_album(&self, album: AlbumRef) {
        self.state().albums.push(album);
    }

    pub fn add_artist(&self, artist: ArtistRef) {
        self.state().artists.push(artist);
    }

    // ========================================================================
    // User collections
    // ========================================================================

    /// Register a playlist owned by the mock user.
    pub fn add_playlist(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        items: Vec<SourceItem>,
    ) -> CollectionRef {
        let reference = CollectionRef::playlist(id, name);
        let mut state = self.state();
        state.playlist_order.push(reference.id.clone());
        state
            .collections
            .insert(reference.id.clone(), Collection::new(reference.clone(), items));
        reference
    }

    /// Replace the contents of any collection, typically a library one.
    pub fn set_collection(&self, reference: CollectionRef, items: Vec<SourceItem>) {
        let mut state = self.state();
        if reference.kind == CollectionKind::Playlist && !state.playlist_order.contains(&reference.id) {
            state.playlist_order.push(reference.id.clone());
        }
        state
            .collections
            .insert(reference.id.clone(), Collection::new(reference, items));
    }

    /// Current item IDs of a collection; empty when unknown.
    pub fn collection_ids(&self, id: &str) -> Vec<String> {
        self.state()
            .collections
            .get(id)
            .map(Collection::item_ids)
            .unwrap_or_default()
    }

    /// Find a playlist by name.
    pub fn playlist_named(&self, name: &str) -> Option<CollectionRef> {
        let state = self.state();
        state
            .playlist_order
            .iter()
            .filter_map(|id| state.collections.get(id))
            .map(|c| c.reference.clone())
            .find(|r| r.name == name)
    }

    // ========================================================================
    // Assertions and failure injection
    // ========================================================================

    /// Number of text searches made (identifier lookups excluded).
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Number of add/remove/create calls made.
    pub fn write_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Fail the next `n` searches and identifier lookups.
    pub fn fail_next_searches<F>(&self, n: usize, factory: F)
    where
        F: Fn() -> CatalogError + Send + Sync + 'static,
    {
        Self::plan_failures(&self.search_failures, 0, n, factory);
    }

    /// Fail the next `n` playlist and collection reads.
    pub fn fail_next_reads<F>(&self, n: usize, factory: F)
    where
        F: Fn() -> CatalogError + Send + Sync + 'static,
    {
        Self::plan_failures(&self.read_failures, 0, n, factory);
    }

    /// Fail the next `n` write requests.
    pub fn fail_next_writes<F>(&self, n: usize, factory: F)
    where
        F: Fn() -> CatalogError + Send + Sync + 'static,
    {
        Self::plan_failures(&self.write_failures, 0, n, factory);
    }

    /// Let `skip` write requests succeed, then fail the following `n`.
    pub fn fail_writes_after<F>(&self, skip: usize, n: usize, factory: F)
    where
        F: Fn() -> CatalogError + Send + Sync + 'static,
    {
        Self::plan_failures(&self.write_failures, skip, n, factory);
    }

    fn plan_failures<F>(plan: &Mutex<Option<FailurePlan>>, skip: usize, n: usize, factory: F)
    where
        F: Fn() -> CatalogError + Send + Sync + 'static,
    {
        *plan.lock().unwrap_or_else(|e| e.into_inner()) = Some(FailurePlan {
            skip,
            remaining: n,
            factory: Box::new(factory),
        });
    }

    fn injected(plan: &Mutex<Option<FailurePlan>>) -> Result<(), CatalogError> {
        let mut guard = plan.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = guard.as_mut() {
            if p.skip > 0 {
                p.skip -= 1;
            } else if p.remaining > 0 {
                p.remaining -= 1;
                return Err((p.factory)());
            }
        }
        Ok(())
    }

    fn write_chunks<'a>(&self, ids: &'a [String]) -> Vec<&'a [String]> {
        match self.write_batch.load(Ordering::SeqCst) {
            0 => vec![ids],
            size => ids.chunks(size).collect(),
        }
    }

    /// Look up an item by destination ID, falling back to a bare placeholder.
    fn item_for(state: &MockState, id: &str, kind: ItemKind) -> SourceItem {
        match kind {
            ItemKind::Track => state
                .tracks
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .map(SourceItem::Track)
                .unwrap_or_else(|| SourceItem::Track(TrackRef::new(id, id, Vec::new()))),
            ItemKind::Album => state
                .albums
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .map(SourceItem::Album)
                .unwrap_or_else(|| SourceItem::Album(AlbumRef::new(id, id, Vec::new()))),
            ItemKind::Artist => state
                .artists
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .map(SourceItem::Artist)
                .unwrap_or_else(|| SourceItem::Artist(ArtistRef::new(id, id))),
        }
    }
}

fn tokens(s: &str) -> BTreeSet<String> {
    normalize_text(&fold_accents(s))
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn shares_token(query: &BTreeSet<String>, candidate: &str) -> bool {
    !query.is_empty() && tokens(candidate).intersection(query).next().is_some()
}

#[async_trait]
impl CatalogProvider for MockCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_identifier_lookup(&self) -> bool {
        self.identifier_lookup.load(Ordering::SeqCst)
    }

    async fn search_tracks(&self, query: &TrackQuery) -> Result<Vec<TrackRef>, CatalogError> {
        Self::injected(&self.search_failures)?;
        self.searches.fetch_add(1, Ordering::SeqCst);
        let wanted = tokens(&query.title);
        Ok(self
            .state()
            .tracks
            .iter()
            .filter(|t| shares_token(&wanted, &t.title))
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn lookup_isrc(&self, isrc: &str) -> Result<Vec<TrackRef>, CatalogError> {
        Self::injected(&self.search_failures)?;
        Ok(self
            .state()
            .tracks
            .iter()
            .filter(|t| t.isrc().is_some_and(|i| i.eq_ignore_ascii_case(isrc)))
            .cloned()
            .collect())
    }

    async fn search_albums(&self, query: &AlbumQuery) -> Result<Vec<AlbumRef>, CatalogError> {
        Self::injected(&self.search_failures)?;
        self.searches.fetch_add(1, Ordering::SeqCst);
        let wanted = tokens(&query.title);
        Ok(self
            .state()
            .albums
            .iter()
            .filter(|a| shares_token(&wanted, &a.title))
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn lookup_upc(&self, upc: &str) -> Result<Vec<AlbumRef>, CatalogError> {
        Self::injected(&self.search_failures)?;
        Ok(self
            .state()
            .albums
            .iter()
            .filter(|a| a.upc() == Some(upc))
            .cloned()
            .collect())
    }

    async fn search_artists(&self, name: &str, limit: u32) -> Result<Vec<ArtistRef>, CatalogError> {
        Self::injected(&self.search_failures)?;
        self.searches.fetch_add(1, Ordering::SeqCst);
        let wanted = tokens(name);
        Ok(self
            .state()
            .artists
            .iter()
            .filter(|a| shares_token(&wanted, &a.name))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_playlists(&self) -> Result<Vec<CollectionRef>, CatalogError> {
        let state = self.state();
        Ok(state
            .playlist_order
            .iter()
            .filter_map(|id| state.collections.get(id))
            .map(|c| c.reference.clone())
            .collect())
    }

    async fn get_playlist(&self, id_or_uri: &str) -> Result<Collection, CatalogError> {
        Self::injected(&self.read_failures)?;
        let id = id_or_uri.rsplit(':').next().unwrap_or(id_or_uri);
        self.state()
            .collections
            .get(id)
            .filter(|c| c.reference.kind == CollectionKind::Playlist)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("playlist {}", id_or_uri)))
    }

    async fn get_collection(&self, reference: &CollectionRef) -> Result<Collection, CatalogError> {
        Self::injected(&self.read_failures)?;
        match self.state().collections.get(&reference.id) {
            Some(collection) => Ok(collection.clone()),
            None if reference.kind == CollectionKind::Playlist => Err(CatalogError::NotFound(
                format!("playlist {}", reference.id),
            )),
            None => Ok(Collection::new(reference.clone(), Vec::new())),
        }
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<CollectionRef, CatalogError> {
        Self::injected(&self.write_failures)?;
        let mut state = self.state();
        state.created += 1;
        let mut reference = CollectionRef::playlist(format!("{}-pl-{}", self.name, state.created), name);
        if let Some(d) = description {
            reference = reference.with_description(d);
        }
        state.playlist_order.push(reference.id.clone());
        state
            .collections
            .insert(reference.id.clone(), Collection::new(reference.clone(), Vec::new()));
        state.calls.push(RecordedCall::CreatePlaylist {
            name: name.to_string(),
        });
        Ok(reference)
    }

    async fn add_items(
        &self,
        reference: &CollectionRef,
        ids: &[String],
        position: Option<usize>,
    ) -> Result<(), CatalogError> {
        let mut offset = 0;
        for chunk in self.write_chunks(ids) {
            Self::injected(&self.write_failures)?;
            let mut state = self.state();
            let kind = reference.kind.item_kind();
            let items: Vec<SourceItem> =
                chunk.iter().map(|id| Self::item_for(&state, id, kind)).collect();

            let collection = state
                .collections
                .entry(reference.id.clone())
                .or_insert_with(|| Collection::new(reference.clone(), Vec::new()));
            let position = position.map(|p| p + offset);
            let at = match position {
                Some(p) if reference.kind == CollectionKind::Playlist => {
                    p.min(collection.items.len())
                }
                _ => collection.items.len(),
            };
            collection.items.splice(at..at, items);

            state.calls.push(RecordedCall::Add {
                collection: reference.id.clone(),
                ids: chunk.to_vec(),
                position,
            });
            offset += chunk.len();
        }
        Ok(())
    }

    async fn remove_items(
        &self,
        reference: &CollectionRef,
        ids: &[String],
    ) -> Result<(), CatalogError> {
        for chunk in self.write_chunks(ids) {
            Self::injected(&self.write_failures)?;
            let mut state = self.state();
            if let Some(collection) = state.collections.get_mut(&reference.id) {
                collection.items.retain(|item| !chunk.iter().any(|id| id == item.id()));
            }
            state.calls.push(RecordedCall::Remove {
                collection: reference.id.clone(),
                ids: chunk.to_vec(),
            });
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<String, CatalogError> {
        Ok(format!("{}-user", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_positional_add_and_remove() {
        let mock = MockCatalog::new("m");
        let playlist = mock.add_playlist("p1", "Mix", fixtures::track_items(&["a", "c"]));

        mock.add_items(&playlist, &["b".to_string()], Some(1)).await.unwrap();
        mock.add_items(&playlist, &["d".to_string()], None).await.unwrap();
        assert_eq!(mock.collection_ids("p1"), vec!["a", "b", "c", "d"]);

        mock.remove_items(&playlist, &["a".to_string(), "d".to_string()])
            .await
            .unwrap();
        assert_eq!(mock.collection_ids("p1"), vec!["b", "c"]);
        assert_eq!(mock.write_count(), 3);
    }

    #[tokio::test]
    async fn test_library_collections_default_to_empty() {
        let mock = MockCatalog::new("m");
        let favorites = mock
            .get_collection(&CollectionRef::favorite_tracks())
            .await
            .unwrap();
        assert!(favorites.items.is_empty());
        assert!(matches!(
            mock.get_playlist("missing").await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_batched_writes_fail_part_way() {
        let mock = MockCatalog::new("m").with_write_batch(2);
        let playlist = mock.add_playlist("p1", "Mix", Vec::new());
        mock.fail_writes_after(1, 1, || CatalogError::Network("reset".into()));

        let ids: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert!(mock.add_items(&playlist, &ids, Some(0)).await.is_err());
        assert_eq!(mock.collection_ids("p1"), vec!["a", "b"]);

        mock.add_items(&playlist, &ids[2..], Some(2)).await.unwrap();
        assert_eq!(mock.collection_ids("p1"), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let mock = MockCatalog::new("m");
        mock.fail_next_writes(1, || CatalogError::Network("reset".into()));
        let created = mock.create_playlist("A", None).await;
        assert!(created.is_err());
        let created = mock.create_playlist("A", None).await.unwrap();
        assert_eq!(mock.playlist_named("A"), Some(created));
    }
}
