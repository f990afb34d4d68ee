//! Candidate scoring and ranking.
//!
//! Scores are in [0, 1]. Ranking is deterministic: score, then exactness,
//! then title edit distance, then provider search rank.

use std::cmp::Ordering;
use std::collections::HashSet;

use strsim::{levenshtein, normalized_levenshtein};

use super::normalize::{artist_set, normalize_artist, normalize_title, version_markers};
use crate::catalog::{AlbumRef, ArtistRef, TrackRef};
use crate::config::MatcherConfig;

const ALBUM_TITLE_WEIGHT: f64 = 0.6;
const ALBUM_ARTIST_WEIGHT: f64 = 0.4;

/// Similarity above which two artist names count as the same.
const ARTIST_NAME_SIMILARITY: f64 = 0.9;

/// A scored search candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    /// Position in the provider's search results.
    pub rank: usize,
    pub score: f64,
    /// Tracks: identical duration in seconds. Albums and artists: identical
    /// normalized title or name.
    pub exact: bool,
    /// Edit distance between normalized titles (names for artists).
    pub title_distance: usize,
}

/// Best first.
fn compare(a: &Scored, b: &Scored) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.exact.cmp(&a.exact))
        .then_with(|| a.title_distance.cmp(&b.title_distance))
        .then_with(|| a.rank.cmp(&b.rank))
}

fn sort_ranked(mut scored: Vec<Scored>) -> Vec<Scored> {
    scored.sort_by(compare);
    scored
}

/// Similarity of two normalized titles: the better of normalized
/// Levenshtein and token Jaccard.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    normalized_levenshtein(a, b).max(token_jaccard(a, b))
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<&str> = a.split_whitespace().collect();
    let b: HashSet<&str> = b.split_whitespace().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Share of credited artists found on both sides, relative to the shorter
/// credit list. Unknown artists on either side score 0.5.
pub fn artist_overlap(source: &[String], candidate: &[String]) -> f64 {
    let source = artist_set(source);
    let candidate = artist_set(candidate);
    if source.is_empty() || candidate.is_empty() {
        return 0.5;
    }

    let found = source
        .iter()
        .filter(|s| {
            candidate
                .iter()
                .any(|c| s == &c || normalized_levenshtein(s, c) >= ARTIST_NAME_SIMILARITY)
        })
        .count();
    let denominator = source.len().min(candidate.len());
    (found as f64 / denominator as f64).min(1.0)
}

/// Closeness of two durations in seconds.
///
/// Returns `None` when both are known and further apart than `tolerance`;
/// 0.5 when either is unknown.
pub fn duration_closeness(a: Option<u32>, b: Option<u32>, tolerance: u32) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let diff = a.abs_diff(b);
            if diff > tolerance {
                None
            } else {
                Some(1.0 - diff as f64 / (tolerance as f64 + 1.0))
            }
        }
        _ => Some(0.5),
    }
}

/// Score a destination track against a source track.
///
/// With `strict`, duration beyond tolerance or differing version markers
/// reject the candidate (`None`). Without it every candidate gets a score.
pub fn score_track(
    source: &TrackRef,
    candidate: &TrackRef,
    rank: usize,
    config: &MatcherConfig,
    strict: bool,
) -> Option<Scored> {
    if strict && version_markers(&source.title) != version_markers(&candidate.title) {
        return None;
    }

    let (a, b) = (source.duration_secs(), candidate.duration_secs());
    let duration = match duration_closeness(a, b, config.duration_tolerance_secs) {
        Some(d) => d,
        None if strict => return None,
        None => 0.0,
    };

    let source_title = normalize_title(&source.title);
    let candidate_title = normalize_title(&candidate.title);
    let title = title_similarity(&source_title, &candidate_title);
    let artist = artist_overlap(&source.artists, &candidate.artists);

    let total_weight = config.title_weight + config.artist_weight + config.duration_weight;
    let score = if total_weight > 0.0 {
        (config.title_weight * title + config.artist_weight * artist + config.duration_weight * duration)
            / total_weight
    } else {
        0.0
    };

    Some(Scored {
        rank,
        score,
        exact: a.is_some() && a == b,
        title_distance: levenshtein(&source_title, &candidate_title),
    })
}

/// Score and sort track candidates, best first.
pub fn rank_tracks(
    source: &TrackRef,
    candidates: &[TrackRef],
    config: &MatcherConfig,
    strict: bool,
) -> Vec<Scored> {
    sort_ranked(
        candidates
            .iter()
            .enumerate()
            .filter_map(|(rank, c)| score_track(source, c, rank, config, strict))
            .collect(),
    )
}

pub fn score_album(source: &AlbumRef, candidate: &AlbumRef, rank: usize) -> Scored {
    let source_title = normalize_title(&source.title);
    let candidate_title = normalize_title(&candidate.title);
    let title = title_similarity(&source_title, &candidate_title);
    let artist = artist_overlap(&source.artists, &candidate.artists);

    Scored {
        rank,
        score: ALBUM_TITLE_WEIGHT * title + ALBUM_ARTIST_WEIGHT * artist,
        exact: !source_title.is_empty() && source_title == candidate_title,
        title_distance: levenshtein(&source_title, &candidate_title),
    }
}

pub fn rank_albums(source: &AlbumRef, candidates: &[AlbumRef]) -> Vec<Scored> {
    sort_ranked(
        candidates
            .iter()
            .enumerate()
            .map(|(rank, c)| score_album(source, c, rank))
            .collect(),
    )
}

/// Artists compare by name only; exact normalized equality scores 1.0.
pub fn score_artist(source: &ArtistRef, candidate: &ArtistRef, rank: usize) -> Scored {
    let a = normalize_artist(&source.name);
    let b = normalize_artist(&candidate.name);
    let exact = !a.is_empty() && a == b;

    Scored {
        rank,
        score: if exact { 1.0 } else { title_similarity(&a, &b) },
        exact,
        title_distance: levenshtein(&a, &b),
    }
}

pub fn rank_artists(source: &ArtistRef, candidates: &[ArtistRef]) -> Vec<Scored> {
    sort_ranked(
        candidates
            .iter()
            .enumerate()
            .map(|(rank, c)| score_artist(source, c, rank))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MatcherConfig {
        MatcherConfig::default()
    }

    fn track(id: &str, title: &str, artist: &str, secs: u64) -> TrackRef {
        let mut t = TrackRef::new(id, title, vec![artist.to_string()]);
        t.duration_ms = Some(secs * 1000);
        t
    }

    #[test]
    fn test_title_similarity() {
        assert_eq!(title_similarity("song a", "song a"), 1.0);
        assert_eq!(title_similarity("", "song"), 0.0);
        // reordered words
        assert_eq!(title_similarity("love me do", "do me love"), 1.0);
        assert!(title_similarity("yesterday", "yesterdays") > 0.85);
        assert!(title_similarity("yesterday", "help") < 0.3);
    }

    #[test]
    fn test_artist_overlap() {
        let x = vec!["Artist X".to_string()];
        assert_eq!(artist_overlap(&x, &x), 1.0);
        assert_eq!(artist_overlap(&x, &["Someone Else".to_string()]), 0.0);
        assert_eq!(artist_overlap(&x, &[]), 0.5);
        // destination credits only the primary artist
        let both = vec!["Artist X".to_string(), "Guest".to_string()];
        assert_eq!(artist_overlap(&both, &x), 1.0);
    }

    #[test]
    fn test_duration_closeness() {
        assert_eq!(duration_closeness(Some(200), Some(200), 3), Some(1.0));
        assert_eq!(duration_closeness(Some(200), Some(203), 3), Some(0.25));
        assert_eq!(duration_closeness(Some(200), Some(204), 3), None);
        assert_eq!(duration_closeness(None, Some(200), 3), Some(0.5));
    }

    #[test]
    fn test_exact_track_scores_one() {
        let source = track("s", "Song A", "Artist X", 200);
        let candidate = track("d", "Song A", "Artist X", 200);
        let scored = score_track(&source, &candidate, 0, &config(), true).unwrap();
        assert!((scored.score - 1.0).abs() < 1e-9);
        assert!(scored.exact);
        assert_eq!(scored.title_distance, 0);
    }

    #[test]
    fn test_remaster_suffix_ignored() {
        let source = track("s", "Song A - Remastered 2011", "Artist X", 200);
        let candidate = track("d", "Song A (Remastered)", "Artist X", 201);
        let scored = score_track(&source, &candidate, 0, &config(), true).unwrap();
        assert!(scored.score >= config().threshold);
    }

    #[test]
    fn test_duration_and_version_rejections() {
        let source = track("s", "Song B (Live)", "Artist Y", 280);
        let studio_close = track("d1", "Song B", "Artist Y", 280);
        let studio_far = track("d2", "Song B", "Artist Y", 240);

        assert!(score_track(&source, &studio_close, 0, &config(), true).is_none());
        assert!(score_track(&source, &studio_far, 1, &config(), true).is_none());

        // lenient scoring still ranks them
        let lenient = score_track(&source, &studio_far, 1, &config(), false).unwrap();
        assert!(lenient.score > 0.0);
    }

    #[test]
    fn test_ranking_tie_breaks() {
        let source = track("s", "Song", "Artist", 200);
        let candidates = vec![
            track("off-by-one", "Song", "Artist", 201),
            track("exact-late", "Song", "Artist", 200),
            track("exact-later", "Song", "Artist", 200),
        ];
        let ranked = rank_tracks(&source, &candidates, &config(), true);
        assert_eq!(ranked.len(), 3);
        assert_eq!(candidates[ranked[0].rank].id, "exact-late");
        assert_eq!(candidates[ranked[1].rank].id, "exact-later");
        assert_eq!(candidates[ranked[2].rank].id, "off-by-one");
    }

    #[test]
    fn test_equal_scores_break_by_exactness() {
        // durations unknown on both: equal scores, neither exact; rank decides
        let source = TrackRef::new("s", "Song", vec!["Artist".into()]);
        let candidates = vec![
            TrackRef::new("first", "Song", vec!["Artist".into()]),
            TrackRef::new("second", "Song", vec!["Artist".into()]),
        ];
        let ranked = rank_tracks(&source, &candidates, &config(), true);
        assert_eq!(ranked[0].rank, 0);
        assert_eq!(ranked[0].score, ranked[1].score);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let source = track("s", "Hello", "Adele", 295);
        let candidates = vec![
            track("a", "Hello", "Adele", 296),
            track("b", "Hello (Live)", "Adele", 295),
            track("c", "Hello", "Lionel Richie", 250),
            track("d", "Hallo", "Adele", 295),
        ];
        let first = rank_tracks(&source, &candidates, &config(), true);
        let second = rank_tracks(&source, &candidates, &config(), true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_album_scoring() {
        let source = AlbumRef::new("s", "Abbey Road (Remastered)", vec!["The Beatles".into()]);
        let good = AlbumRef::new("d1", "Abbey Road", vec!["Beatles".into()]);
        let bad = AlbumRef::new("d2", "Let It Be", vec!["The Beatles".into()]);

        let ranked = rank_albums(&source, &[bad, good]);
        assert_eq!(ranked[0].rank, 1);
        assert!(ranked[0].exact);
        assert!((ranked[0].score - 1.0).abs() < 1e-9);
        assert!(ranked[1].score < 0.75);
    }

    #[test]
    fn test_artist_exact_name_preferred() {
        let source = ArtistRef::new("s", "Björk");
        let candidates = vec![
            ArtistRef::new("d1", "Bjork Tribute Band"),
            ArtistRef::new("d2", "Bjork"),
        ];
        let ranked = rank_artists(&source, &candidates);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].score, 1.0);
    }
}
