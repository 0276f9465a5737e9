//! Section artifact files.
//!
//! One JSON file per synced song under the sections directory, at
//! `<sections_dir>/<natural key split on '/'>.json`. Artifacts are written
//! whether or not the remote section upsert succeeded.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

use crate::models::{ResolvedSong, SectionSource};
use crate::state::write_json_atomic;

/// Set on artifacts for songs found in the remote index instead of inserted.
pub const RESOLVED_VIA_INDEX: &str = "songs_index";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionArtifact<'a> {
    pub song_key: &'a str,
    pub song_id: Option<&'a str>,
    pub song_slug: &'a str,
    pub song_json_rel: &'a str,
    pub synced_at_utc: String,
    pub song_processed_at_utc: &'a str,
    pub sources: &'a [SectionSource],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_via: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl<'a> SectionArtifact<'a> {
    pub fn new(song: &'a ResolvedSong, song_id: Option<&'a str>, synced_at_utc: String) -> Self {
        Self {
            song_key: &song.natural_key,
            song_id,
            song_slug: &song.song_slug,
            song_json_rel: &song.document_ref,
            synced_at_utc,
            song_processed_at_utc: &song.processed_at,
            sources: &song.sources,
            resolved_via: None,
            dry_run: None,
        }
    }
}

/// File path of the artifact for a natural key.
///
/// Keys that would escape the sections directory are rejected.
pub fn artifact_path(sections_dir: &Path, natural_key: &str) -> Result<PathBuf> {
    let mut path = sections_dir.to_path_buf();
    let mut parts = 0;
    for part in natural_key.split('/').filter(|p| !p.is_empty()) {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => path.push(part),
            _ => bail!("Invalid natural key for artifact path: {:?}", natural_key),
        }
        parts += 1;
    }
    if parts == 0 {
        bail!("Empty natural key for artifact path");
    }
    let mut file = path.into_os_string();
    file.push(".json");
    Ok(PathBuf::from(file))
}

pub fn write_artifact(sections_dir: &Path, artifact: &SectionArtifact<'_>) -> Result<PathBuf> {
    let path = artifact_path(sections_dir, artifact.song_key)?;
    write_json_atomic(&path, artifact)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtistInput, ArtistMetadata, SongMetadata, SongPayload, SourceKind};
    use crate::segment::split_sections;
    use tempfile::TempDir;

    fn song() -> ResolvedSong {
        ResolvedSong {
            natural_key: "aline-barros/ressuscita-me".into(),
            artist: ArtistInput {
                name: "Aline Barros".into(),
                search_key: "aline barros".into(),
                metadata: ArtistMetadata::default(),
            },
            payload: SongPayload {
                title: "Ressuscita-me".into(),
                title_search: "ressuscita-me".into(),
                artist_id: String::new(),
                lyrics_chords: "[Refrão]\nla".into(),
                original_key: "C".into(),
                tuning: "E A D G B E".into(),
                capo: None,
                category: "Louvor".into(),
                views: 0,
                metadata: SongMetadata::default(),
            },
            sources: vec![SectionSource {
                source_type: SourceKind::Cifra,
                source_label: "cifra_principal".into(),
                sections: split_sections("[Refrão]\nla"),
            }],
            song_slug: "ressuscita-me".into(),
            document_ref: "artists/aline-barros/songs/ressuscita-me.json".into(),
            processed_at: "2024-03-01T10:00:00Z".into(),
        }
    }

    #[test]
    fn test_artifact_path_follows_key_segments() {
        let dir = Path::new("/data/sections");
        assert_eq!(
            artifact_path(dir, "aline-barros/ressuscita-me").unwrap(),
            PathBuf::from("/data/sections/aline-barros/ressuscita-me.json")
        );
        assert_eq!(
            artifact_path(dir, "v1.2/song").unwrap(),
            PathBuf::from("/data/sections/v1.2/song.json")
        );
        assert!(artifact_path(dir, "../etc/passwd").is_err());
        assert!(artifact_path(dir, "/").is_err());
    }

    #[test]
    fn test_dry_run_artifact_has_null_song_id() {
        let tmp = TempDir::new().unwrap();
        let song = song();
        let mut artifact = SectionArtifact::new(&song, None, "2024-03-02T00:00:00Z".into());
        artifact.dry_run = Some(true);
        let path = write_artifact(tmp.path(), &artifact).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(value["songId"].is_null());
        assert_eq!(value["dryRun"], true);
        assert!(value.get("resolvedVia").is_none());
        assert_eq!(value["songKey"], "aline-barros/ressuscita-me");
        assert_eq!(value["sources"][0]["sourceType"], "cifra");
        assert_eq!(value["sources"][0]["sections"][0]["sectionType"], "chorus");
    }

    #[test]
    fn test_index_hit_artifact_records_resolution() {
        let tmp = TempDir::new().unwrap();
        let song = song();
        let mut artifact = SectionArtifact::new(&song, Some("song-1"), "now".into());
        artifact.resolved_via = Some(RESOLVED_VIA_INDEX);
        let path = write_artifact(tmp.path(), &artifact).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["songId"], "song-1");
        assert_eq!(value["resolvedVia"], "songs_index");
        assert!(value.get("dryRun").is_none());
    }
}
