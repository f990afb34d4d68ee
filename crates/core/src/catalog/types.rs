//! Provider-independent catalog entities.

use serde::{Deserialize, Serialize};

/// A track as read from a catalog.
///
/// Used both for source items and for destination search candidates; in the
/// latter case `id` is a destination ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackRef {
    /// Provider-native track ID.
    pub id: String,
    /// Track title as published.
    pub title: String,
    /// Artist names, primary artist first.
    #[serde(default)]
    pub artists: Vec<String>,
    /// Album name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// International Standard Recording Code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    /// Position on its album.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
}

impl TrackRef {
    /// Create a track with only the mandatory fields set.
    pub fn new(id: impl Into<String>, title: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists,
            album: None,
            duration_ms: None,
            isrc: None,
            track_number: None,
        }
    }

    /// Duration rounded to whole seconds.
    pub fn duration_secs(&self) -> Option<u32> {
        self.duration_ms.map(|ms| ((ms + 500) / 1000) as u32)
    }

    /// First listed artist.
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(String::as_str)
    }

    /// ISRC when present and non-blank.
    pub fn isrc(&self) -> Option<&str> {
        self.isrc.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// An album as read from a catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlbumRef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    /// Universal Product Code (barcode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upc: Option<String>,
}

impl AlbumRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists,
            upc: None,
        }
    }

    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(String::as_str)
    }

    pub fn upc(&self) -> Option<&str> {
        self.upc.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// An artist as read from a catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

impl ArtistRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Kind of entity held by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Track,
    Album,
    Artist,
}

/// Any item a collection can hold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceItem {
    Track(TrackRef),
    Album(AlbumRef),
    Artist(ArtistRef),
}

impl SourceItem {
    /// Provider-native ID of the item.
    pub fn id(&self) -> &str {
        match self {
            SourceItem::Track(t) => &t.id,
            SourceItem::Album(a) => &a.id,
            SourceItem::Artist(a) => &a.id,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            SourceItem::Track(_) => ItemKind::Track,
            SourceItem::Album(_) => ItemKind::Album,
            SourceItem::Artist(_) => ItemKind::Artist,
        }
    }

    /// Short human description for reports and logs.
    pub fn display_name(&self) -> String {
        match self {
            SourceItem::Track(t) => match t.primary_artist() {
                Some(artist) => format!("{} - {}", artist, t.title),
                None => t.title.clone(),
            },
            SourceItem::Album(a) => match a.primary_artist() {
                Some(artist) => format!("{} - {}", artist, a.title),
                None => a.title.clone(),
            },
            SourceItem::Artist(a) => a.name.clone(),
        }
    }
}

/// Kind of library collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// User playlist (ordered).
    Playlist,
    /// Liked songs.
    FavoriteTracks,
    /// Saved albums.
    SavedAlbums,
    /// Followed artists.
    FollowedArtists,
}

impl CollectionKind {
    /// Whether item order is meaningful.
    pub fn is_ordered(&self) -> bool {
        matches!(self, CollectionKind::Playlist)
    }

    /// Kind of items this collection holds.
    pub fn item_kind(&self) -> ItemKind {
        match self {
            CollectionKind::Playlist | CollectionKind::FavoriteTracks => ItemKind::Track,
            CollectionKind::SavedAlbums => ItemKind::Album,
            CollectionKind::FollowedArtists => ItemKind::Artist,
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CollectionKind::Playlist => "playlist",
            CollectionKind::FavoriteTracks => "favorite tracks",
            CollectionKind::SavedAlbums => "saved albums",
            CollectionKind::FollowedArtists => "followed artists",
        };
        write!(f, "{}", s)
    }
}

/// Identity of a collection within one catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionRef {
    /// Provider-native ID (playlists) or a fixed well-known ID (library sets).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: CollectionKind,
}

impl CollectionRef {
    pub fn playlist(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            kind: CollectionKind::Playlist,
        }
    }

    pub fn favorite_tracks() -> Self {
        Self::library(CollectionKind::FavoriteTracks, "favorites:tracks", "Favorites")
    }

    pub fn saved_albums() -> Self {
        Self::library(CollectionKind::SavedAlbums, "favorites:albums", "Saved albums")
    }

    pub fn followed_artists() -> Self {
        Self::library(
            CollectionKind::FollowedArtists,
            "favorites:artists",
            "Followed artists",
        )
    }

    fn library(kind: CollectionKind, id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            kind,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A collection snapshot: identity plus items in provider order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collection {
    pub reference: CollectionRef,
    pub items: Vec<SourceItem>,
}

impl Collection {
    pub fn new(reference: CollectionRef, items: Vec<SourceItem>) -> Self {
        Self { reference, items }
    }

    /// Native IDs of all items, in order.
    pub fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id().to_string()).collect()
    }
}

/// Text query for a track search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackQuery {
    pub title: String,
    pub artist: Option<String>,
    pub duration_secs: Option<u32>,
    pub limit: u32,
}

/// Text query for an album search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumQuery {
    pub title: String,
    pub artist: Option<String>,
    pub limit: u32,
}
