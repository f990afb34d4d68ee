//! Deterministic cache keys for source items.

use sha2::{Digest, Sha256};

use super::normalize::{artist_set, normalize_artist, normalize_title, version_markers};
use crate::cache::Fingerprint;
use crate::catalog::{AlbumRef, ArtistRef, SourceItem, TrackRef};

/// Hex characters kept from the SHA-256 digest.
const HASH_LEN: usize = 32;

pub fn fingerprint(item: &SourceItem) -> Fingerprint {
    match item {
        SourceItem::Track(t) => track_fingerprint(t),
        SourceItem::Album(a) => album_fingerprint(a),
        SourceItem::Artist(a) => artist_fingerprint(a),
    }
}

/// `isrc:<ISRC>` when known, otherwise a hash of normalized title, sorted
/// artists, duration in seconds and version markers. Normalization drops
/// bracketed suffixes, so the markers keep "Song (Live)" apart from "Song".
pub fn track_fingerprint(track: &TrackRef) -> Fingerprint {
    if let Some(isrc) = track.isrc() {
        return Fingerprint::from_raw(format!("isrc:{}", isrc.to_uppercase()));
    }
    let duration = track
        .duration_secs()
        .map(|d| d.to_string())
        .unwrap_or_default();
    let key = format!(
        "{}|{}|{}|{}",
        normalize_title(&track.title),
        joined_artists(&track.artists),
        duration,
        joined_markers(&track.title)
    );
    Fingerprint::from_raw(format!("track:{}", short_hash(&key)))
}

pub fn album_fingerprint(album: &AlbumRef) -> Fingerprint {
    if let Some(upc) = album.upc() {
        return Fingerprint::from_raw(format!("upc:{}", upc));
    }
    let key = format!(
        "{}|{}|{}",
        normalize_title(&album.title),
        joined_artists(&album.artists),
        joined_markers(&album.title)
    );
    Fingerprint::from_raw(format!("album:{}", short_hash(&key)))
}

pub fn artist_fingerprint(artist: &ArtistRef) -> Fingerprint {
    Fingerprint::from_raw(format!(
        "artist:{}",
        short_hash(&normalize_artist(&artist.name))
    ))
}

/// BTreeSet iteration is sorted.
fn joined_artists(artists: &[String]) -> String {
    artist_set(artists).into_iter().collect::<Vec<_>>().join(",")
}

fn joined_markers(title: &str) -> String {
    version_markers(title).into_iter().collect::<Vec<_>>().join(",")
}

fn short_hash(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isrc_fingerprint() {
        let mut track = TrackRef::new("1", "Song A", vec!["Artist X".into()]);
        track.isrc = Some("us1234567890".into());
        assert_eq!(track_fingerprint(&track).as_str(), "isrc:US1234567890");
    }

    #[test]
    fn test_text_fingerprint_is_stable_across_variants() {
        let mut a = TrackRef::new("1", "Song A (Remastered)", vec!["Artist X".into(), "B".into()]);
        a.duration_ms = Some(200_100);
        let mut b = TrackRef::new("2", "song a", vec!["B".into(), "artist x".into()]);
        b.duration_ms = Some(199_900);

        let fa = track_fingerprint(&a);
        assert!(fa.as_str().starts_with("track:"));
        assert_eq!(fa.as_str().len(), "track:".len() + HASH_LEN);
        assert_eq!(fa, track_fingerprint(&b));
    }

    #[test]
    fn test_text_fingerprint_depends_on_duration() {
        let mut a = TrackRef::new("1", "Song", vec!["X".into()]);
        a.duration_ms = Some(200_000);
        let mut b = a.clone();
        b.duration_ms = Some(240_000);
        assert_ne!(track_fingerprint(&a), track_fingerprint(&b));
    }

    #[test]
    fn test_text_fingerprint_keeps_versions_apart() {
        let mut studio = TrackRef::new("1", "Song B", vec!["Artist Y".into()]);
        studio.duration_ms = Some(200_000);
        let fp = track_fingerprint(&studio);

        for title in ["Song B (Instrumental)", "Song B (Live)", "Song B - Remix"] {
            let mut variant = studio.clone();
            variant.title = title.into();
            assert_ne!(track_fingerprint(&variant), fp, "{}", title);
        }

        let live = AlbumRef::new("1", "Record (Live)", vec!["Z".into()]);
        let studio_album = AlbumRef::new("2", "Record", vec!["Z".into()]);
        assert_ne!(album_fingerprint(&live), album_fingerprint(&studio_album));
    }

    #[test]
    fn test_album_and_artist_fingerprints() {
        let mut album = AlbumRef::new("1", "Abbey Road", vec!["The Beatles".into()]);
        assert!(album_fingerprint(&album).as_str().starts_with("album:"));
        album.upc = Some("0094638246824".into());
        assert_eq!(album_fingerprint(&album).as_str(), "upc:0094638246824");

        let a = artist_fingerprint(&ArtistRef::new("1", "Björk"));
        let b = artist_fingerprint(&ArtistRef::new("2", "bjork"));
        assert_eq!(a, b);
    }
}
