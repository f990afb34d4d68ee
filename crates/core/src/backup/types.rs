//! Backup document model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{MatchMethod, MatchOutcome, MatchResult};
use crate::catalog::{AlbumRef, ArtistRef, CollectionRef, SourceItem, TrackRef};

/// Format version written by this crate. Version 1 documents carry only
/// playlists and favorites.
pub const BACKUP_VERSION: u64 = 2;

/// Provider-independent snapshot of a music library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: u64,
    #[serde(default)]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_provider: Option<String>,
    #[serde(default, alias = "spotify_user")]
    pub source_user: Option<String>,
    /// Provider the `resolved` blocks refer to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_provider: Option<String>,
    pub playlists: Vec<BackupPlaylist>,
    #[serde(default)]
    pub favorites: Vec<BackupTrack>,
    #[serde(default)]
    pub albums: Vec<BackupAlbum>,
    #[serde(default)]
    pub artists: Vec<BackupArtist>,
}

impl BackupDocument {
    pub fn new(source_provider: impl Into<String>, source_user: impl Into<String>) -> Self {
        Self {
            version: BACKUP_VERSION,
            exported_at: Some(Utc::now()),
            source_provider: Some(source_provider.into()),
            source_user: Some(source_user.into()),
            destination_provider: None,
            playlists: Vec::new(),
            favorites: Vec::new(),
            albums: Vec::new(),
            artists: Vec::new(),
        }
    }

    /// Tracks across all playlists plus favorites.
    pub fn track_count(&self) -> usize {
        self.playlists.iter().map(|p| p.tracks.len()).sum::<usize>() + self.favorites.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupPlaylist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tracks: Vec<BackupTrack>,
}

impl BackupPlaylist {
    pub fn reference(&self) -> CollectionRef {
        let reference = CollectionRef::playlist(&self.id, &self.name);
        if self.description.is_empty() {
            reference
        } else {
            reference.with_description(&self.description)
        }
    }

    /// Tracks usable as source items, in playlist order.
    pub fn items(&self) -> Vec<SourceItem> {
        self.tracks
            .iter()
            .filter_map(BackupTrack::to_track)
            .map(SourceItem::Track)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntry {
    pub name: String,
}

fn names(entries: &[NamedEntry]) -> Vec<String> {
    entries.iter().map(|e| e.name.clone()).collect()
}

fn entries(names: &[String]) -> Vec<NamedEntry> {
    names
        .iter()
        .map(|name| NamedEntry { name: name.clone() })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTrackAlbum {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artists: Vec<NamedEntry>,
}

/// Resolution copied from the match cache at export time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    /// `None` records a NoMatch.
    pub destination_id: Option<String>,
    pub method: MatchMethod,
    pub confidence: f64,
}

impl From<&MatchResult> for Resolved {
    fn from(result: &MatchResult) -> Self {
        Self {
            destination_id: result.destination_id().map(str::to_string),
            method: result.method,
            confidence: result.confidence,
        }
    }
}

impl Resolved {
    pub fn outcome(&self) -> MatchOutcome {
        match &self.destination_id {
            Some(id) => MatchOutcome::Matched {
                destination_id: id.clone(),
            },
            None => MatchOutcome::NoMatch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupTrack {
    /// Local files have no catalog ID; such tracks are skipped on import.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub external_ids: ExternalIds,
    #[serde(default)]
    pub artists: Vec<NamedEntry>,
    #[serde(default)]
    pub album: BackupTrackAlbum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Resolved>,
}

impl BackupTrack {
    pub fn from_track(track: &TrackRef) -> Self {
        Self {
            id: Some(track.id.clone()),
            name: track.title.clone(),
            duration_ms: track.duration_ms,
            track_number: track.track_number,
            external_ids: ExternalIds {
                isrc: track.isrc.clone(),
                upc: None,
            },
            artists: entries(&track.artists),
            album: BackupTrackAlbum {
                name: track.album.clone(),
                artists: Vec::new(),
            },
            resolved: None,
        }
    }

    pub fn to_track(&self) -> Option<TrackRef> {
        let id = self.id.as_deref().filter(|id| !id.is_empty())?;
        let mut track = TrackRef::new(id, &self.name, names(&self.artists));
        track.album = self.album.name.clone();
        track.duration_ms = self.duration_ms;
        track.isrc = self.external_ids.isrc.clone();
        track.track_number = self.track_number;
        Some(track)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupAlbum {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<NamedEntry>,
    #[serde(default)]
    pub external_ids: ExternalIds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Resolved>,
}

impl BackupAlbum {
    pub fn from_album(album: &AlbumRef) -> Self {
        Self {
            id: album.id.clone(),
            name: album.title.clone(),
            artists: entries(&album.artists),
            external_ids: ExternalIds {
                isrc: None,
                upc: album.upc.clone(),
            },
            resolved: None,
        }
    }

    pub fn to_album(&self) -> AlbumRef {
        let mut album = AlbumRef::new(&self.id, &self.name, names(&self.artists));
        album.upc = self.external_ids.upc.clone();
        album
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupArtist {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Resolved>,
}

impl BackupArtist {
    pub fn from_artist(artist: &ArtistRef) -> Self {
        Self {
            id: artist.id.clone(),
            name: artist.name.clone(),
            resolved: None,
        }
    }

    pub fn to_artist(&self) -> ArtistRef {
        ArtistRef::new(&self.id, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_shape_matches_export_format() {
        let mut track = TrackRef::new("track123", "Test Song", vec!["Artist One".into()]);
        track.duration_ms = Some(180_000);
        track.track_number = Some(5);
        track.isrc = Some("USABC1234567".into());
        track.album = Some("Test Album".into());

        let json = serde_json::to_value(BackupTrack::from_track(&track)).unwrap();
        assert_eq!(json["id"], "track123");
        assert_eq!(json["name"], "Test Song");
        assert_eq!(json["duration_ms"], 180_000);
        assert_eq!(json["external_ids"]["isrc"], "USABC1234567");
        assert_eq!(json["artists"][0]["name"], "Artist One");
        assert_eq!(json["album"]["name"], "Test Album");
        assert!(json.get("resolved").is_none());
    }

    #[test]
    fn test_track_without_id_is_not_importable() {
        let json = r#"{"id": null, "name": "Local file", "artists": [], "album": {"name": "x", "artists": []}}"#;
        let track: BackupTrack = serde_json::from_str(json).unwrap();
        assert!(track.to_track().is_none());
    }

    #[test]
    fn test_resolved_no_match_round_trips() {
        let resolved = Resolved {
            destination_id: None,
            method: MatchMethod::FuzzyText,
            confidence: 0.4,
        };
        assert_eq!(resolved.outcome(), MatchOutcome::NoMatch);
        let json = serde_json::to_string(&resolved).unwrap();
        assert!(json.contains("\"method\":\"fuzzy_text\""));
    }

    #[test]
    fn test_playlist_reference_keeps_description() {
        let playlist = BackupPlaylist {
            id: "p1".into(),
            name: "Mix".into(),
            description: "for the road".into(),
            tracks: Vec::new(),
        };
        assert_eq!(playlist.reference().description.as_deref(), Some("for the road"));
    }
}
