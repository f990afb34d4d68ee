//! Text normalization for cross-catalog comparison.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Featured-artist credit ("feat. X", "ft. X", "featuring X") to end of string.
static FEATURING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:feat\.?|ft\.|featuring)\s.*$").unwrap());

/// Version markers that make two recordings different.
static VERSION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(live|remix|remixed|instrumental|acapella|a cappella|acoustic|karaoke)\b")
        .unwrap()
});

/// Separators between several artists credited in one string.
static ARTIST_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:,|;|&|/|\s+and\s+|\s+x\s+|\s+with\s+)\s*").unwrap());

/// Strip diacritics: "Björk" -> "Bjork", "Beyoncé" -> "Beyonce".
pub fn fold_accents(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.nfkd().filter(|c| !is_combining_mark(*c)) {
        // letters without a decomposition
        match c {
            'ø' => out.push('o'),
            'Ø' => out.push('O'),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            'ß' => out.push_str("ss"),
            'đ' => out.push('d'),
            'Đ' => out.push('D'),
            'ł' => out.push('l'),
            'Ł' => out.push('L'),
            _ => out.push(c),
        }
    }
    out
}

/// Cut a title at the first " - ", "(" or "[".
///
/// "Song (Remastered 2011)" -> "Song", "Song - Radio Edit" -> "Song".
/// Returns the trimmed input unchanged when the cut would leave nothing.
pub fn simple(title: &str) -> String {
    let cut = [" - ", "(", "["]
        .iter()
        .filter_map(|sep| title.find(sep))
        .min()
        .unwrap_or(title.len());
    let head = title[..cut].trim();
    if head.is_empty() {
        title.trim().to_string()
    } else {
        head.to_string()
    }
}

/// Remove a trailing featured-artist credit.
pub fn strip_featuring(title: &str) -> String {
    FEATURING.replace(title, "").trim().to_string()
}

/// Lowercase, drop apostrophes, turn other punctuation into spaces and
/// collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let folded = fold_accents(s).to_lowercase();
    let spaced: String = folded
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Full title normalization used for scoring and fingerprints.
pub fn normalize_title(title: &str) -> String {
    let base = strip_featuring(&simple(title));
    normalize_text(&base)
}

/// Title text sent to a destination search.
pub fn search_title(title: &str) -> String {
    strip_featuring(&simple(&fold_accents(title)))
}

/// Normalize an artist name; a leading "The" is dropped.
pub fn normalize_artist(name: &str) -> String {
    let normalized = normalize_text(name);
    match normalized.strip_prefix("the ") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => normalized,
    }
}

/// Split and normalize a list of artist credits into a set of names.
///
/// "A & B" and ["A", "B"] produce the same set.
pub fn artist_set(artists: &[String]) -> BTreeSet<String> {
    artists
        .iter()
        .flat_map(|a| ARTIST_SEPARATOR.split(a).map(str::to_string).collect::<Vec<_>>())
        .map(|a| normalize_artist(&a))
        .filter(|a| !a.is_empty())
        .collect()
}

/// Version markers present in a raw title.
pub fn version_markers(title: &str) -> BTreeSet<&'static str> {
    let folded = fold_accents(title);
    VERSION_MARKER
        .find_iter(&folded)
        .map(|m| match m.as_str().to_lowercase().as_str() {
            "live" => "live",
            "remix" | "remixed" => "remix",
            "instrumental" => "instrumental",
            "acoustic" => "acoustic",
            "karaoke" => "karaoke",
            _ => "acapella",
        })
        .collect()
}
