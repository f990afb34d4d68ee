//! Backup codec - versioned JSON export/import of a whole library.
//!
//! Loading validates the envelope on a raw JSON value first so that
//! integrity problems are reported precisely, then decodes the typed
//! document. Version 1 files (playlists and favorites only) load with empty
//! album and artist sections.

mod types;

pub use types::{
    BackupAlbum, BackupArtist, BackupDocument, BackupPlaylist, BackupTrack, BackupTrackAlbum,
    ExternalIds, NamedEntry, Resolved, BACKUP_VERSION,
};

use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid backup file: {0}")]
    Integrity(String),

    #[error("Failed to encode backup: {0}")]
    Encode(String),
}

/// Read and validate a backup file.
pub fn load_backup(path: &Path) -> Result<BackupDocument, BackupError> {
    let content = std::fs::read_to_string(path)?;
    parse_backup(&content)
}

/// Validate and decode a backup document.
pub fn parse_backup(content: &str) -> Result<BackupDocument, BackupError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| BackupError::Integrity(format!("not valid JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| BackupError::Integrity("top level must be an object".to_string()))?;

    let version = match object.get("version") {
        None | Some(Value::Null) => {
            return Err(BackupError::Integrity("missing version field".to_string()))
        }
        Some(v) => v.as_u64().ok_or_else(|| {
            BackupError::Integrity(format!("version must be a positive integer, got {}", v))
        })?,
    };
    if version > BACKUP_VERSION {
        return Err(BackupError::Integrity(format!(
            "backup version {} is newer than supported version {}",
            version, BACKUP_VERSION
        )));
    }
    if !object.contains_key("playlists") {
        return Err(BackupError::Integrity("missing playlists field".to_string()));
    }

    let document: BackupDocument = serde_json::from_value(value)
        .map_err(|e| BackupError::Integrity(format!("malformed structure: {}", e)))?;
    debug!(
        "Loaded backup v{} with {} playlists and {} favorites",
        document.version,
        document.playlists.len(),
        document.favorites.len()
    );
    Ok(document)
}

/// Write a backup as pretty-printed JSON, replacing the file atomically.
pub fn write_backup(path: &Path, document: &BackupDocument) -> Result<(), BackupError> {
    let json =
        serde_json::to_string_pretty(document).map_err(|e| BackupError::Encode(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn integrity_message(content: &str) -> String {
        match parse_backup(content) {
            Err(BackupError::Integrity(msg)) => msg,
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_version() {
        let msg = integrity_message(r#"{"playlists": []}"#);
        assert!(msg.contains("missing version field"));
    }

    #[test]
    fn test_future_version() {
        let msg = integrity_message(r#"{"version": 3, "playlists": []}"#);
        assert!(msg.contains("newer than supported"));
    }

    #[test]
    fn test_missing_playlists() {
        let msg = integrity_message(r#"{"version": 2}"#);
        assert!(msg.contains("missing playlists field"));
    }

    #[test]
    fn test_malformed_structure() {
        let msg = integrity_message(r#"{"version": 2, "playlists": [{"name": 5}]}"#);
        assert!(msg.contains("malformed structure"));
        let msg = integrity_message("[1, 2]");
        assert!(msg.contains("object"));
    }

    #[test]
    fn test_version_one_document_loads() {
        let content = r#"{
            "version": 1,
            "exported_at": "2024-03-01T12:00:00+00:00",
            "spotify_user": "user123",
            "playlists": [{
                "id": "playlist123",
                "name": "My Playlist",
                "description": "",
                "tracks": [{
                    "id": "t1",
                    "name": "Song",
                    "duration_ms": 180000,
                    "track_number": 1,
                    "external_ids": {"isrc": "USABC1234567"},
                    "artists": [{"name": "Artist"}],
                    "album": {"name": "Album", "artists": [{"name": "Artist"}]}
                }]
            }],
            "favorites": [{
                "id": "f1",
                "name": "Fav",
                "duration_ms": 200000,
                "track_number": 2,
                "external_ids": {},
                "artists": [{"name": "Fav Artist"}],
                "album": {"name": "Fav Album", "artists": []}
            }]
        }"#;

        let doc = parse_backup(content).unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.source_user.as_deref(), Some("user123"));
        assert!(doc.albums.is_empty());
        assert!(doc.artists.is_empty());
        assert_eq!(doc.track_count(), 2);

        let items = doc.playlists[0].items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id(), "t1");
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/backup.json");

        let mut doc = BackupDocument::new("spotify", "user123");
        doc.playlists.push(BackupPlaylist {
            id: "p1".into(),
            name: "Mix".into(),
            description: String::new(),
            tracks: Vec::new(),
        });
        write_backup(&path, &doc).unwrap();

        let loaded = load_backup(&path).unwrap();
        assert_eq!(loaded, doc);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = load_backup(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, BackupError::Io(_)));
    }
}
