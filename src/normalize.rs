//! String and value normalization shared by the resolver and the upsert engine.
//!
//! Everything here is pure. The remote store enforces uniqueness on the
//! search keys produced by [`search_key`], so the function must stay stable
//! across releases: changing it would make previously-synced artists and
//! songs look new.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;
use unicode_properties::{GeneralCategory, UnicodeGeneralCategory};

/// Fallback title when a song has no usable name or slug.
pub const UNTITLED: &str = "Sem titulo";

/// Fallback tonic when a song carries no parseable key.
pub const DEFAULT_KEY: &str = "C";

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SLUG_SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]+").unwrap());
static MUSICAL_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Ga-g])([#b]?)(m?)$").unwrap());

/// Build the dedup key for a display name or title.
///
/// Decomposes to NFD, drops nonspacing marks (category Mn), lowercases, trims and
/// collapses inner whitespace: `"  Aline  Barros "` → `"aline barros"`,
/// `"Refrão"` → `"refrao"`.
pub fn search_key(text: &str) -> String {
    let stripped: String = text
        .nfd()
        .filter(|c| c.general_category() != GeneralCategory::NonspacingMark)
        .collect();
    let lowered = stripped.to_lowercase();
    WHITESPACE_RE.replace_all(lowered.trim(), " ").into_owned()
}

/// Turn a URL slug into a display title: `"aline-barros"` → `"Aline Barros"`.
pub fn slug_to_title(slug: &str) -> String {
    let s = slug.trim().trim_matches('/');
    let spaced = SLUG_SEPARATOR_RE.replace_all(s, " ");
    let words: Vec<String> = spaced
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        UNTITLED.to_string()
    } else {
        words.join(" ")
    }
}

/// Canonicalize a key signature to `{NOTE}{accidental}{m}`.
///
/// Well-formed keys get an upper-case note (`"f#m"` → `"F#m"`). A malformed
/// non-blank value is passed through untouched; blank input defaults to
/// [`DEFAULT_KEY`].
pub fn normalize_key(value: Option<&str>) -> String {
    let s = value.unwrap_or_default().trim();
    match MUSICAL_KEY_RE.captures(s) {
        Some(caps) => format!(
            "{}{}{}",
            caps[1].to_uppercase(),
            &caps[2],
            &caps[3]
        ),
        None if s.is_empty() => DEFAULT_KEY.to_string(),
        None => s.to_string(),
    }
}

/// Remove NUL characters, which the remote text columns reject.
pub fn strip_nul(value: &str) -> String {
    value.replace('\0', "")
}

/// Strip NULs and surrounding whitespace; `None` when nothing is left.
pub fn non_blank(value: &str) -> Option<String> {
    let clean = strip_nul(value);
    let trimmed = clean.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read a JSON value as a non-blank string. Numbers are stringified.
pub fn json_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => non_blank(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerce a JSON value to an integer.
///
/// Accepts integers, floats (truncated), booleans and numeric strings such
/// as `"12"` or `"3.0"`. Anything else is `None`.
pub fn json_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}
