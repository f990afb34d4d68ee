//! Testing utilities: an in-memory catalog provider and fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! use tunebridge_core::testing::{fixtures, MockCatalog};
//!
//! let source = MockCatalog::new("source");
//! source.add_playlist("p1", "Road trip", vec![fixtures::track_item("s1", "Song A", "Artist X", 200, None)]);
//!
//! let destination = MockCatalog::new("dest");
//! destination.add_track(fixtures::track("d1", "Song A", "Artist X", 201, None));
//! ```

mod mock_catalog;

pub use mock_catalog::{MockCatalog, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::catalog::{AlbumRef, ArtistRef, SourceItem, TrackRef};

    /// A track with a single credited artist.
    pub fn track(id: &str, title: &str, artist: &str, secs: u64, isrc: Option<&str>) -> TrackRef {
        let mut track = TrackRef::new(id, title, vec![artist.to_string()]);
        track.duration_ms = Some(secs * 1000);
        track.isrc = isrc.map(str::to_string);
        track
    }

    pub fn track_item(
        id: &str,
        title: &str,
        artist: &str,
        secs: u64,
        isrc: Option<&str>,
    ) -> SourceItem {
        SourceItem::Track(track(id, title, artist, secs, isrc))
    }

    /// Placeholder tracks whose title equals their ID.
    pub fn track_items(ids: &[&str]) -> Vec<SourceItem> {
        ids.iter()
            .map(|id| SourceItem::Track(TrackRef::new(*id, *id, Vec::new())))
            .collect()
    }

    pub fn album(id: &str, title: &str, artist: &str, upc: Option<&str>) -> AlbumRef {
        let mut album = AlbumRef::new(id, title, vec![artist.to_string()]);
        album.upc = upc.map(str::to_string);
        album
    }

    pub fn artist(id: &str, name: &str) -> ArtistRef {
        ArtistRef::new(id, name)
    }
}
