//! Filename normalization shared by the classifier, the reconciler and the
//! materializer.
//!
//! Three different names exist per file: the source name as found in the song
//! folder, the destination name (path-safe, used as the sync key), and the
//! preferred display name with any leading instrument token moved to the end.

use any_ascii::any_ascii;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::config::Taxonomy;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII: NFKD, drop combining marks, transliterate.
/// e.g., "Flügelhorn" → "flugelhorn"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Key used for keyword containment tests.
/// Lowercased and folded, whitespace runs collapsed to one underscore, periods removed,
/// so "F. Horn", "F Horn" and "f_horn" all compare equal.
pub fn match_key(s: &str) -> String {
    fold_to_ascii(s)
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .replace('.', "")
}

/// Strip a trailing file extension ("Tune.pdf" → "Tune"). Dots followed by
/// spaces are treated as part of the name ("Mr. Sandman" stays intact).
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 && !name[i + 1..].is_empty() && !name[i + 1..].contains(' ') => &name[..i],
        _ => name,
    }
}

/// Whether the name carries the PDF extension (case-insensitive).
pub fn is_pdf(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".pdf")
}

/// Destination name: the source name with path separators replaced.
pub fn dest_name_for(src_name: &str) -> String {
    src_name.replace(['/', '\\'], "_")
}

/// Local cache filename: the destination name with spaces replaced as well.
pub fn cache_name_for(dest_name: &str) -> String {
    dest_name.replace([' ', '/', '\\'], "_")
}

/// Java `String.hashCode` over UTF-16 code units, as the reader app computes it.
pub fn java_string_hashcode(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Lowercase slug for per-instrument output files ("Alto Sax" → "alto_sax").
pub fn instrument_slug(instrument: &str) -> String {
    instrument.replace(' ', "_").to_lowercase()
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '_')
}

/// Case-insensitive pattern for a song title that tolerates whitespace/underscore drift.
fn title_pattern(title: &str) -> Option<Regex> {
    let words: Vec<String> = title.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return None;
    }
    Regex::new(&format!(r"(?i){}", words.join(r"[\s_]+"))).ok()
}

fn relocate(body: &str, prefix: &str) -> Option<String> {
    let body = trim_separators(body);
    let prefix = trim_separators(prefix);
    if body.is_empty() || prefix.is_empty() {
        return None;
    }
    Some(format!("{} - {}", body, prefix))
}

// ============================================================================
// PREFERRED NAMES
// ============================================================================

/// Computes display titles so that the reader app sorts charts by song title
/// rather than by a leading instrument prefix.
pub struct NameNormalizer {
    tokens: Vec<String>,
}

impl NameNormalizer {
    /// Collects every alias, backup keyword and solo keyword in the taxonomy.
    pub fn new(taxonomy: &Taxonomy) -> Self {
        let mut tokens: Vec<String> = taxonomy
            .all_keywords()
            .map(match_key)
            .filter(|t| !t.is_empty())
            .collect();
        tokens.sort();
        tokens.dedup();
        Self { tokens }
    }

    /// Preferred display name for `file_name` inside the song titled `song_title`.
    ///
    /// "Trombone - Blue Moon.pdf" → "Blue Moon - Trombone"; names that already lead
    /// with the title, or that cannot be parsed, come back without their extension.
    pub fn preferred_name(&self, song_title: &str, file_name: &str) -> String {
        let stem = strip_extension(file_name);
        let unchanged = || {
            let cleaned = trim_separators(stem);
            if cleaned.is_empty() { stem.to_string() } else { cleaned.to_string() }
        };

        let segments: Vec<&str> = stem.split('-').collect();
        if segments.len() < 2 {
            return unchanged();
        }

        if let Some(pattern) = title_pattern(song_title) {
            for (i, segment) in segments.iter().enumerate() {
                let Some(m) = pattern.find(segment) else {
                    continue;
                };
                if i == 0 {
                    return unchanged();
                }
                let prefix = segments[..i].join("-");
                let mut body = segment[m.start()..].to_string();
                if i + 1 < segments.len() {
                    body.push('-');
                    body.push_str(&segments[i + 1..].join("-"));
                }
                return relocate(&body, &prefix).unwrap_or_else(unchanged);
            }
        }

        // Title not embedded verbatim: fall back to spotting an instrument in the first segment
        let first_key = match_key(segments[0]);
        if self.tokens.iter().any(|t| first_key.contains(t.as_str())) {
            let rest = segments[1..].join("-");
            return relocate(&rest, segments[0]).unwrap_or_else(unchanged);
        }

        unchanged()
    }
}

// ============================================================================
// TESTS
// ============================================================================
