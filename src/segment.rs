//! Section segmenter for chord sheets and lyrics.
//!
//! Splits a song text into an ordered list of [`Section`]s (intro, verse,
//! chorus, ...). Headers are recognized in two forms:
//!
//! - bracketed or parenthesized labels: `[Refrão]`, `(Chorus) la la`
//! - short plain labels followed by a separator or whitespace:
//!   `Intro: Am G`, `Verso 2`
//!
//! A candidate header only counts when its label canonicalizes to a known
//! [`SectionType`]. Anything else stays content, which keeps ordinary lyric
//! lines from being swallowed as headers. Lines before the first header
//! form an `unknown` section labelled [`UNLABELED`]; a text with no headers
//! at all therefore comes back as exactly one `unknown` section spanning
//! the whole input.
//!
//! The plain form is a heuristic: a short lyric line that starts with a
//! keyword (`"Final da tarde"`) is still read as a header. The length and
//! word-count guard keeps this rare but does not rule it out.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Section, SectionType};
use crate::normalize::search_key;

/// Label of sections that have no explicit header.
pub const UNLABELED: &str = "Sem secao";

/// Plain headers longer than this are treated as lyrics.
const PLAIN_LABEL_MAX_CHARS: usize = 24;
/// Plain headers with more words than this are treated as lyrics.
const PLAIN_LABEL_MAX_WORDS: usize = 3;

static BRACKET_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\[(]\s*([^\])]+?)\s*[\])]\s*(.*)$").unwrap());
static PLAIN_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z\x{00C0}-\x{024F}\-\s]+?)(?:\s*[:\-]\s*|\s+)(.*)$").unwrap()
});
static NUMBER_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+\d+[A-Za-z]?$").unwrap());

/// Exact label patterns, matched against the normalized label in order.
static EXACT_RULES: Lazy<Vec<(SectionType, Regex)>> = Lazy::new(|| {
    [
        (SectionType::Intro, r"^(intro|introducao)$"),
        (
            SectionType::PreChorus,
            r"^(pre\s*-?\s*(refr[ao]o|chorus)|pe-?refr[ao]o)$",
        ),
        (SectionType::Chorus, r"^(refr[ao]o|chorus)$"),
        (SectionType::Verse, r"^(verso|verse)$"),
        (SectionType::Bridge, r"^(ponte|bridge)$"),
        (SectionType::Solo, r"^(solo|riff)$"),
        (SectionType::Instrumental, r"^(instrumental|interludio|interlude)$"),
        (SectionType::Outro, r"^(outro|final|encerramento|fim)$"),
        (SectionType::Tag, r"^tag$"),
    ]
    .into_iter()
    .map(|(ty, pattern)| (ty, Regex::new(pattern).unwrap()))
    .collect()
});

/// Substring fallbacks for free-form labels. Order matters: `pre refr`
/// must win over `refr`, and `refr` over `verso`.
const KEYWORD_RULES: &[(SectionType, &[&str])] = &[
    (SectionType::PreChorus, &["pre refr", "pre-chor", "pre chor"]),
    (SectionType::Chorus, &["refr", "chorus"]),
    (SectionType::Verse, &["verso", "verse", "estrofe", "parte"]),
    (SectionType::Bridge, &["ponte", "bridge"]),
    (SectionType::Intro, &["intro", "introdu"]),
    (SectionType::Solo, &["solo", "riff"]),
    (SectionType::Instrumental, &["instrumental", "interlud"]),
    (SectionType::Outro, &["outro", "final", "encerr"]),
];

/// Classify a raw header label.
///
/// Returns the section type and the label to keep. The original label text
/// is always preserved, even when the type is [`SectionType::Unknown`].
pub fn canonicalize_label(raw_label: &str) -> (SectionType, String) {
    let label = raw_label.trim();
    if label.is_empty() {
        return (SectionType::Unknown, UNLABELED.to_string());
    }

    let without_number = NUMBER_SUFFIX_RE.replace(label, "");
    let normalized = search_key(&without_number);

    for (ty, rx) in EXACT_RULES.iter() {
        if rx.is_match(&normalized) {
            return (*ty, label.to_string());
        }
    }

    for (ty, keywords) in KEYWORD_RULES {
        if keywords.iter().any(|kw| normalized.contains(kw)) {
            return (*ty, label.to_string());
        }
    }

    (SectionType::Unknown, label.to_string())
}

/// A recognized header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub section_type: SectionType,
    pub label: String,
    /// Text after the header on the same line.
    pub rest: String,
}

/// Try to read `line` as a section header.
pub(crate) fn parse_header(line: &str) -> Option<Header> {
    if line.trim().is_empty() {
        return None;
    }

    if let Some(caps) = BRACKET_HEADER_RE.captures(line) {
        let (section_type, label) = canonicalize_label(&caps[1]);
        if section_type != SectionType::Unknown {
            return Some(Header {
                section_type,
                label,
                rest: caps[2].trim().to_string(),
            });
        }
    }

    let caps = PLAIN_HEADER_RE.captures(line)?;
    let label = caps[1].trim().to_string();
    // "Verso 2" reads as label "Verso" with "2" as trailing text.
    let rest = caps[2].trim().to_string();
    let bare = NUMBER_SUFFIX_RE.replace(&label, "");
    if bare.chars().count() > PLAIN_LABEL_MAX_CHARS
        || bare.split_whitespace().count() > PLAIN_LABEL_MAX_WORDS
    {
        return None;
    }
    let (section_type, label) = canonicalize_label(&label);
    if section_type == SectionType::Unknown {
        return None;
    }
    Some(Header {
        section_type,
        label,
        rest,
    })
}

/// Section being accumulated while scanning.
struct OpenSection {
    section_type: SectionType,
    label: String,
    order_index: u32,
    line_numbers: Vec<usize>,
    lines: Vec<String>,
}

impl OpenSection {
    fn new(section_type: SectionType, label: String, order_index: u32) -> Self {
        Self {
            section_type,
            label,
            order_index,
            line_numbers: Vec::new(),
            lines: Vec::new(),
        }
    }

    fn push(&mut self, line_no: usize, text: &str) {
        self.line_numbers.push(line_no);
        self.lines.push(text.to_string());
    }

    /// Close the section; `None` when it holds only blank lines.
    fn close(self) -> Option<Section> {
        let joined = self.lines.join("\n");
        let content = joined.trim_matches('\n');
        if content.trim().is_empty() {
            return None;
        }
        Some(Section {
            order_index: self.order_index,
            section_type: self.section_type,
            label: self.label,
            line_start: self.line_numbers.iter().min().copied(),
            line_end: self.line_numbers.iter().max().copied(),
            content: content.to_string(),
        })
    }
}

/// Split a song text into typed sections.
///
/// Blank input yields an empty list; any non-blank input yields at least
/// one section. Line numbers are 1-based. Every non-blank content line of
/// the input ends up in exactly one section, in order.
pub fn split_sections(text: &str) -> Vec<Section> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut sections: Vec<Section> = Vec::new();
    let mut current = OpenSection::new(SectionType::Unknown, UNLABELED.to_string(), 1);

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        match parse_header(raw) {
            Some(header) => {
                let finished = std::mem::replace(
                    &mut current,
                    OpenSection::new(header.section_type, header.label, 0),
                );
                if let Some(section) = finished.close() {
                    sections.push(section);
                }
                current.order_index = sections.len() as u32 + 1;
                if !header.rest.is_empty() {
                    current.push(line_no, &header.rest);
                }
            }
            None => current.push(line_no, raw),
        }
    }

    if let Some(section) = current.close() {
        sections.push(section);
    }

    // Only empty headers: keep the whole text rather than lose it.
    if sections.is_empty() {
        let line_count = text.lines().count();
        sections.push(Section {
            order_index: 1,
            section_type: SectionType::Unknown,
            label: UNLABELED.to_string(),
            line_start: Some(1),
            line_end: Some(line_count),
            content: text.trim_matches('\n').to_string(),
        });
    }

    sections
}
