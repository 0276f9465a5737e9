//! Record resolver: candidate + song document → normalized payloads.
//!
//! A song document is the scraper's JSON file for one song:
//!
//! ```json
//! {
//!   "artist": {"name": "...", "slug": "...", "id": 1, "hits": 10, "genre": {"slug": "gospel"}},
//!   "song": {"name": "...", "tone": "G", "id": 2, "lyricsId": 3, "url": "...", "hits": 99},
//!   "pages": {
//!     "cifra": {"text_clean": "...", "secondary": {"key": "G", "tuning": "...", "capo": 2, "views": 10}},
//!     "letra": {"text_clean": "..."}
//!   },
//!   "cifra_versions": {"items": [{"version_slug": "simplificada", "page": {"text_clean": "..."}}]}
//! }
//! ```
//!
//! Every field is optional. Extra artist metadata comes from the artist
//! profile at `artists/<slug>/artist_full.json`, loaded once per slug.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::{
    ArtistInput, ArtistMetadata, ResolvedSong, SectionSource, SongMetadata, SongPayload,
    SourceKind, SourceRecord,
};
use crate::normalize::{
    json_int, json_str, non_blank, normalize_key, search_key, slug_to_title, strip_nul, UNTITLED,
};
use crate::segment::split_sections;

pub const UNKNOWN_ARTIST_SLUG: &str = "desconhecido";
pub const UNKNOWN_ARTIST_NAME: &str = "Desconhecido";
pub const DEFAULT_TUNING: &str = "E A D G B E";
const DEFAULT_VERSION_SLUG: &str = "principal";

/// Why a candidate produced nothing to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// Document absent, unreadable or not a JSON object.
    Document,
    /// No text variant has non-blank content.
    Text,
}

/// Turns candidates into [`ResolvedSong`]s, caching artist profiles.
pub struct Resolver {
    root: PathBuf,
    profiles: HashMap<String, Value>,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            profiles: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, cand: &SourceRecord) -> Result<ResolvedSong, MissingReason> {
        let doc = read_document(&self.root, &cand.document_ref).ok_or(MissingReason::Document)?;

        let (primary_text, variant) = pick_primary_text(&doc).ok_or(MissingReason::Text)?;
        let primary_text = strip_nul(&primary_text);
        if primary_text.trim().is_empty() {
            return Err(MissingReason::Text);
        }

        let artist = &doc["artist"];
        let song = &doc["song"];
        let secondary = &doc["pages"]["cifra"]["secondary"];

        let artist_slug = non_blank(&cand.artist_slug)
            .or_else(|| json_str(artist.get("slug")))
            .unwrap_or_else(|| UNKNOWN_ARTIST_SLUG.to_string());
        let artist_name = json_str(artist.get("name"))
            .or_else(|| non_blank(&slug_to_title(&artist_slug)))
            .unwrap_or_else(|| UNKNOWN_ARTIST_NAME.to_string());

        let title = json_str(song.get("name"))
            .or_else(|| cand.song_name.as_deref().and_then(non_blank))
            .or_else(|| non_blank(&cand.song_slug).map(|s| slug_to_title(&s)))
            .unwrap_or_else(|| UNTITLED.to_string());

        let raw_key = json_str(song.get("tone")).or_else(|| json_str(secondary.get("key")));
        let tuning = json_str(secondary.get("tuning")).unwrap_or_else(|| DEFAULT_TUNING.to_string());
        let views = json_int(secondary.get("views"))
            .or_else(|| json_int(song.get("hits")))
            .unwrap_or(0);

        let profile = self.profile(&artist_slug).clone();
        let artist_metadata = artist_metadata(&doc, &profile, &artist_slug);
        let song_metadata = song_metadata(cand, &doc, &artist_slug, &variant);

        Ok(ResolvedSong {
            natural_key: cand.natural_key.clone(),
            artist: ArtistInput {
                search_key: search_key(&artist_name),
                name: artist_name.clone(),
                metadata: artist_metadata,
            },
            payload: SongPayload {
                title_search: search_key(&title),
                category: infer_category(&artist_name, &title).to_string(),
                title,
                artist_id: String::new(),
                lyrics_chords: primary_text,
                original_key: strip_nul(&normalize_key(raw_key.as_deref())),
                tuning,
                capo: json_int(secondary.get("capo")),
                views,
                metadata: song_metadata,
            },
            sources: collect_section_sources(&doc),
            song_slug: cand.song_slug.clone(),
            document_ref: cand.document_ref.clone(),
            processed_at: cand.processed_at.clone(),
        })
    }

    /// Artist profile for a slug; `Null` when there is none.
    fn profile(&mut self, slug: &str) -> &Value {
        let slug = slug.trim().trim_matches('/').to_string();
        let root = &self.root;
        self.profiles.entry(slug).or_insert_with_key(|slug| {
            if slug.is_empty() {
                return Value::Null;
            }
            let path = root.join("artists").join(slug).join("artist_full.json");
            read_json_object(&path).unwrap_or(Value::Null)
        })
    }
}

fn read_json_object(path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(v) if v.is_object() => Some(v),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "unparseable JSON document");
            None
        }
    }
}

/// Load a song document relative to the dataset root.
pub fn read_document(root: &Path, document_ref: &str) -> Option<Value> {
    read_json_object(&root.join(document_ref))
}

fn text_clean(page: &Value) -> Option<String> {
    page["text_clean"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// First alternate version with text: `(slug, text)`.
fn first_version(doc: &Value) -> Option<(String, String)> {
    doc["cifra_versions"]["items"]
        .as_array()?
        .iter()
        .filter(|v| v.is_object())
        .find_map(|v| {
            let text = text_clean(&v["page"])?;
            let slug = json_str(v.get("version_slug"))
                .unwrap_or_else(|| DEFAULT_VERSION_SLUG.to_string());
            Some((slug, text))
        })
}

/// Pick the text body stored on the song row and name its variant.
pub fn pick_primary_text(doc: &Value) -> Option<(String, String)> {
    if let Some(text) = text_clean(&doc["pages"]["cifra"]) {
        return Some((text, "cifra".to_string()));
    }
    if let Some(text) = text_clean(&doc["pages"]["letra"]) {
        return Some((text, "letra".to_string()));
    }
    first_version(doc).map(|(slug, text)| (text, format!("version:{}", slug)))
}

/// Segment every available text variant of a document.
///
/// The alternate version is only used when the main cifra is absent.
pub fn collect_section_sources(doc: &Value) -> Vec<SectionSource> {
    let mut sources = Vec::new();
    let cifra = text_clean(&doc["pages"]["cifra"]);
    if let Some(text) = &cifra {
        sources.push(SectionSource {
            source_type: SourceKind::Cifra,
            source_label: "cifra_principal".into(),
            sections: split_sections(text),
        });
    }
    if let Some(text) = text_clean(&doc["pages"]["letra"]) {
        sources.push(SectionSource {
            source_type: SourceKind::Letra,
            source_label: "letra_principal".into(),
            sections: split_sections(&text),
        });
    }
    if cifra.is_none() {
        if let Some((slug, text)) = first_version(doc) {
            sources.push(SectionSource {
                source_type: SourceKind::CifraVersion,
                source_label: slug,
                sections: split_sections(&text),
            });
        }
    }
    sources
}

/// Coarse song category from artist and title.
pub fn infer_category(artist_name: &str, title: &str) -> &'static str {
    let a = search_key(artist_name);
    let t = search_key(title);
    if a.contains("harpa") {
        "Harpa Crista"
    } else if a.contains("coral") || t.contains("hino") {
        "Hinos"
    } else if t.contains("adora") {
        "Adoracao"
    } else {
        "Louvor"
    }
}

fn first_str(candidates: &[&Value]) -> Option<String> {
    candidates.iter().find_map(|v| json_str(Some(*v)))
}

fn first_int(candidates: &[&Value]) -> Option<i64> {
    candidates.iter().find_map(|v| json_int(Some(*v)))
}

fn artist_metadata(doc: &Value, profile: &Value, artist_slug: &str) -> ArtistMetadata {
    let artist = &doc["artist"];
    let profile_artist = &profile["artist"];
    let paths = &profile["paths"];
    let slug = Value::String(artist_slug.to_string());

    ArtistMetadata {
        source_slug: first_str(&[
            &artist["slug"],
            &doc["artist_slug"],
            &profile["artist_slug"],
            &slug,
        ]),
        source_artist_id: first_int(&[&artist["id"], &profile_artist["id"]]),
        source_genre_slug: first_str(&[
            &artist["genre"]["slug"],
            &artist["genre"]["url"],
            &profile["genre"]["slug"],
            &profile_artist["genre"]["slug"],
            &profile_artist["genre"]["url"],
        ]),
        source_hits: first_int(&[&artist["hits"], &profile_artist["hits"], &profile["hits"]]),
        source_artist_image_path: json_str(paths.get("artist_image")),
        source_artist_head_image_path: json_str(paths.get("artist_head_image")),
        source_photos_api_path: json_str(paths.get("photos_api_json")),
    }
}

fn song_metadata(cand: &SourceRecord, doc: &Value, artist_slug: &str, variant: &str) -> SongMetadata {
    let song = &doc["song"];
    SongMetadata {
        source_song_key: non_blank(&cand.natural_key),
        source_song_id: json_int(song.get("id")),
        source_lyrics_id: json_int(song.get("lyricsId")),
        source_song_slug: json_str(song.get("url"))
            .or_else(|| json_str(doc.get("song_slug")))
            .or_else(|| non_blank(&cand.song_slug)),
        source_artist_slug: json_str(doc.get("artist_slug")).or_else(|| non_blank(artist_slug)),
        source_json_path: non_blank(&cand.document_ref),
        source_processed_at: non_blank(&cand.processed_at),
        source_variant: non_blank(variant),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn candidate(doc_ref: &str) -> SourceRecord {
        SourceRecord {
            shard: "letter_a.sqlite3".into(),
            natural_key: "aline-barros/ressuscita-me".into(),
            document_ref: doc_ref.into(),
            processed_at: "2024-03-01T10:00:00Z".into(),
            artist_slug: "aline-barros".into(),
            song_slug: "ressuscita-me".into(),
            song_name: None,
        }
    }

    fn write(root: &Path, rel: &str, value: &Value) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(value).unwrap()).unwrap();
    }

    #[test]
    fn test_resolves_full_document() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "songs/a.json",
            &json!({
                "artist": {"name": "Aline Barros", "slug": "aline-barros", "id": "77",
                           "genre": {"slug": "gospel"}},
                "song": {"name": "Ressuscita-me", "tone": "g#m", "id": 12, "lyricsId": "34", "hits": 5},
                "pages": {
                    "cifra": {"text_clean": "[Refrão]\nRessuscita-me\u{0}",
                              "secondary": {"tuning": "D A D G B E", "capo": "2", "views": 900}},
                    "letra": {"text_clean": "Ressuscita-me"}
                }
            }),
        );
        write(
            tmp.path(),
            "artists/aline-barros/artist_full.json",
            &json!({"artist": {"hits": 1234}, "paths": {"artist_image": "img/a.jpg"}}),
        );

        let mut resolver = Resolver::new(tmp.path());
        let song = resolver.resolve(&candidate("songs/a.json")).unwrap();
        assert_eq!(song.artist.name, "Aline Barros");
        assert_eq!(song.artist.search_key, "aline barros");
        assert_eq!(song.artist.metadata.source_artist_id, Some(77));
        assert_eq!(song.artist.metadata.source_hits, Some(1234));
        assert_eq!(song.artist.metadata.source_genre_slug.as_deref(), Some("gospel"));
        assert_eq!(
            song.artist.metadata.source_artist_image_path.as_deref(),
            Some("img/a.jpg")
        );

        let p = &song.payload;
        assert_eq!(p.title, "Ressuscita-me");
        assert_eq!(p.original_key, "G#m");
        assert_eq!(p.tuning, "D A D G B E");
        assert_eq!(p.capo, Some(2));
        assert_eq!(p.views, 900);
        assert!(!p.lyrics_chords.contains('\0'));
        assert_eq!(p.metadata.source_variant.as_deref(), Some("cifra"));
        assert_eq!(p.metadata.source_lyrics_id, Some(34));
        assert_eq!(p.metadata.source_song_key.as_deref(), Some("aline-barros/ressuscita-me"));

        let labels: Vec<_> = song.sources.iter().map(|s| s.source_label.as_str()).collect();
        assert_eq!(labels, vec!["cifra_principal", "letra_principal"]);
    }

    #[test]
    fn test_defaults_when_document_is_sparse() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "songs/b.json",
            &json!({"pages": {"letra": {"text_clean": "só a letra"}}, "song": {"hits": "42"}}),
        );
        let mut cand = candidate("songs/b.json");
        cand.artist_slug = String::new();

        let song = Resolver::new(tmp.path()).resolve(&cand).unwrap();
        assert_eq!(song.artist.name, UNKNOWN_ARTIST_NAME);
        assert_eq!(song.payload.title, "Ressuscita Me");
        assert_eq!(song.payload.original_key, "C");
        assert_eq!(song.payload.tuning, DEFAULT_TUNING);
        assert_eq!(song.payload.views, 42);
        assert_eq!(song.payload.metadata.source_variant.as_deref(), Some("letra"));
        assert_eq!(
            song.artist.metadata.source_slug.as_deref(),
            Some(UNKNOWN_ARTIST_SLUG)
        );
    }

    #[test]
    fn test_missing_or_invalid_document() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(tmp.path().join("array.json"), "[1,2]").unwrap();
        write(tmp.path(), "empty.json", &json!({"pages": {"cifra": {"text_clean": "   "}}}));

        let mut resolver = Resolver::new(tmp.path());
        assert_eq!(
            resolver.resolve(&candidate("nope.json")).unwrap_err(),
            MissingReason::Document
        );
        assert_eq!(
            resolver.resolve(&candidate("broken.json")).unwrap_err(),
            MissingReason::Document
        );
        assert_eq!(
            resolver.resolve(&candidate("array.json")).unwrap_err(),
            MissingReason::Document
        );
        assert_eq!(
            resolver.resolve(&candidate("empty.json")).unwrap_err(),
            MissingReason::Text
        );
    }

    #[test]
    fn test_version_used_only_without_cifra() {
        let doc = json!({
            "cifra_versions": {"items": [
                "junk",
                {"version_slug": "", "page": {"text_clean": ""}},
                {"version_slug": "  ", "page": {"text_clean": "Intro: G D"}},
                {"version_slug": "outra", "page": {"text_clean": "x"}}
            ]}
        });
        let (text, variant) = pick_primary_text(&doc).unwrap();
        assert_eq!(text, "Intro: G D");
        assert_eq!(variant, "version:principal");

        let sources = collect_section_sources(&doc);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, SourceKind::CifraVersion);
        assert_eq!(sources[0].source_label, "principal");

        let with_cifra = json!({
            "pages": {"cifra": {"text_clean": "G D"}},
            "cifra_versions": {"items": [{"version_slug": "v2", "page": {"text_clean": "x"}}]}
        });
        let sources = collect_section_sources(&with_cifra);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, SourceKind::Cifra);
    }

    #[test]
    fn test_infer_category() {
        assert_eq!(infer_category("Harpa Cristã", "Qualquer"), "Harpa Crista");
        assert_eq!(infer_category("Coral Kemuel", "Qualquer"), "Hinos");
        assert_eq!(infer_category("Fulano", "Hino da Vitória"), "Hinos");
        assert_eq!(infer_category("Fulano", "Adoração"), "Adoracao");
        assert_eq!(infer_category("Fulano", "Ressuscita-me"), "Louvor");
    }

    #[test]
    fn test_profile_is_cached_per_slug() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "artists/x/artist_full.json",
            &json!({"hits": 5}),
        );
        let mut resolver = Resolver::new(tmp.path());
        assert_eq!(resolver.profile("x")["hits"], 5);
        std::fs::remove_file(tmp.path().join("artists/x/artist_full.json")).unwrap();
        assert_eq!(resolver.profile("/x/")["hits"], 5);
        assert!(resolver.profile("").is_null());
    }
}
