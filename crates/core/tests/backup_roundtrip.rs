//! Export/import integration tests.

use std::sync::Arc;

use tempfile::TempDir;

use tunebridge_core::{
    backup::{load_backup, BackupError},
    catalog::{CollectionRef, SourceItem},
    config::{MatcherConfig, SyncConfig},
    testing::{fixtures, MockCatalog},
    CatalogError, MatchCache, Matcher, MemoryMatchCache, Selection, SyncError, SyncOrchestrator,
};

fn orchestrator(cache: Arc<dyn MatchCache>) -> SyncOrchestrator {
    let matcher = Matcher::new(MatcherConfig::default(), cache);
    SyncOrchestrator::new(Arc::new(matcher), SyncConfig::default())
}

fn destination_catalog() -> Arc<MockCatalog> {
    let destination = Arc::new(MockCatalog::new("dst"));
    destination.add_track(fixtures::track("d1", "Song A", "Artist X", 200, Some("US1234567890")));
    destination.add_track(fixtures::track("d2", "Song C", "Artist Z", 150, None));
    destination.add_album(fixtures::album("da", "Record", "Artist Z", None));
    destination
}

fn source_catalog() -> Arc<MockCatalog> {
    let source = Arc::new(MockCatalog::new("src"));
    source.add_playlist(
        "p1",
        "Road trip",
        vec![
            fixtures::track_item("s1", "Song A", "Artist X", 200, Some("US1234567890")),
            fixtures::track_item("s2", "Song B (Live)", "Artist Y", 240, None),
        ],
    );
    source.set_collection(
        CollectionRef::favorite_tracks(),
        vec![fixtures::track_item("s3", "Song C", "Artist Z", 151, None)],
    );
    source.set_collection(
        CollectionRef::saved_albums(),
        vec![SourceItem::Album(fixtures::album("sa", "Record", "Artist Z", None))],
    );
    source
}

#[tokio::test]
async fn test_export_then_import_into_empty_destination() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("library.json");

    let exported = orchestrator(Arc::new(MemoryMatchCache::new()))
        .with_source(source_catalog())
        .export_to_backup(&path, Selection::all())
        .await
        .unwrap();
    assert_eq!(exported.playlists.len(), 1);
    assert_eq!(exported.favorites.len(), 1);
    assert_eq!(exported.albums.len(), 1);
    assert!(exported.artists.is_empty());
    assert!(exported.destination_provider.is_none());

    let loaded = load_backup(&path).unwrap();
    assert_eq!(loaded, exported);

    let destination = destination_catalog();
    let report = orchestrator(Arc::new(MemoryMatchCache::new()))
        .with_destination(destination.clone())
        .import_from_backup(&path, Selection::all())
        .await
        .unwrap();
    assert!(!report.has_failures());

    let playlist = destination.playlist_named("Road trip").unwrap();
    assert_eq!(destination.collection_ids(&playlist.id), vec!["d1"]);
    assert_eq!(destination.collection_ids("favorites:tracks"), vec!["d2"]);
    assert_eq!(destination.collection_ids("favorites:albums"), vec!["da"]);

    // Song B (Live) has no studio-free counterpart
    assert_eq!(report.total_unmatched(), 1);
    assert_eq!(report.collections[0].unmatched[0].source_id, "s2");
}

#[tokio::test]
async fn test_resolutions_in_backup_seed_a_fresh_cache() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("library.json");

    // resolve everything once against the first destination
    let cache: Arc<dyn MatchCache> = Arc::new(MemoryMatchCache::new());
    let first = destination_catalog();
    let synced = orchestrator(cache.clone())
        .with_source(source_catalog())
        .with_destination(first.clone());
    synced.sync_all(Selection::all()).await.unwrap();
    let exported = synced.export_to_backup(&path, Selection::all()).await.unwrap();
    assert_eq!(exported.destination_provider.as_deref(), Some("dst"));
    assert!(exported.favorites[0].resolved.is_some());

    // a second machine with an empty cache and the same destination provider
    let second = destination_catalog();
    let report = orchestrator(Arc::new(MemoryMatchCache::new()))
        .with_destination(second.clone())
        .import_from_backup(&path, Selection::all())
        .await
        .unwrap();
    assert_eq!(second.search_count(), 0);
    assert_eq!(report.total_matched(), 3);
    assert_eq!(second.collection_ids("favorites:tracks"), vec!["d2"]);
}

#[tokio::test]
async fn test_invalid_backup_aborts_import() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("future.json");
    std::fs::write(&path, r#"{"version": 99, "playlists": []}"#).unwrap();

    let destination = destination_catalog();
    let err = orchestrator(Arc::new(MemoryMatchCache::new()))
        .with_destination(destination.clone())
        .import_from_backup(&path, Selection::all())
        .await
        .unwrap_err();

    match err {
        SyncError::Backup(BackupError::Integrity(msg)) => {
            assert!(msg.contains("newer than supported"))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(destination.write_count(), 0);
}

#[tokio::test]
async fn test_import_selection_skips_sections() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("library.json");
    orchestrator(Arc::new(MemoryMatchCache::new()))
        .with_source(source_catalog())
        .export_to_backup(&path, Selection::all())
        .await
        .unwrap();

    let destination = destination_catalog();
    let report = orchestrator(Arc::new(MemoryMatchCache::new()))
        .with_destination(destination.clone())
        .import_from_backup(
            &path,
            Selection {
                favorites: true,
                ..Selection::none()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.collections.len(), 1);
    assert!(destination.playlist_named("Road trip").is_none());
    assert_eq!(destination.collection_ids("favorites:tracks"), vec!["d2"]);
}

#[tokio::test]
async fn test_tracks_without_id_are_reported_as_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("local-files.json");
    std::fs::write(
        &path,
        r#"{
            "version": 2,
            "playlists": [{
                "id": "p1",
                "name": "Road trip",
                "tracks": [
                    {"id": "s1", "name": "Song A", "duration_ms": 200000,
                     "external_ids": {"isrc": "US1234567890"}, "artists": [{"name": "Artist X"}]},
                    {"id": null, "name": "Garage demo", "artists": [{"name": "Me"}]}
                ]
            }],
            "favorites": [
                {"name": "Voice memo", "artists": [{"name": "Me"}]}
            ]
        }"#,
    )
    .unwrap();

    let destination = destination_catalog();
    let report = orchestrator(Arc::new(MemoryMatchCache::new()))
        .with_destination(destination.clone())
        .import_from_backup(&path, Selection::all())
        .await
        .unwrap();

    let playlist = &report.collections[0];
    assert_eq!(playlist.total, 2);
    assert_eq!(playlist.matched, 1);
    assert_eq!(playlist.skipped.len(), 1);
    assert_eq!(playlist.skipped[0].name, "Garage demo");

    let favorites = &report.collections[1];
    assert_eq!(favorites.skipped.len(), 1);
    assert_eq!(report.total_skipped(), 2);
    assert!(destination.collection_ids("favorites:tracks").is_empty());
}

#[tokio::test]
async fn test_unreadable_playlist_is_left_out_of_export() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("library.json");
    let source = source_catalog();
    source.add_playlist(
        "p2",
        "Late night",
        vec![fixtures::track_item("s4", "Song D", "Artist W", 180, None)],
    );
    // the first playlist fetch fails for good
    source.fail_next_reads(1, || CatalogError::NotFound("playlist p1".into()));

    let exported = orchestrator(Arc::new(MemoryMatchCache::new()))
        .with_source(source)
        .export_to_backup(&path, Selection::all())
        .await
        .unwrap();

    let names: Vec<&str> = exported.playlists.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Late night"]);
    assert_eq!(exported.favorites.len(), 1);
    assert_eq!(load_backup(&path).unwrap().playlists.len(), 1);
}
