//! Content-addressed music catalog.
//!
//! Tracks are identified by the first 8 hex digits of the SHA-256 of their
//! bytes, so re-importing the same file is a no-op. Metadata lives in one
//! JSON file next to a managed directory of copied audio files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dates::{now_unix, CivilTime};
use crate::types::{MusicCue, TrackRef};

/// One catalogued track, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicTrack {
    pub id: String,
    pub artist: String,
    pub title: String,
    pub filename: String,
    pub path: PathBuf,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub moods: BTreeSet<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub added_at: String,
    #[serde(default)]
    pub file_size: u64,
}

impl MusicTrack {
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Caller-supplied metadata for [`MusicCatalog::add`].
#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub artist: String,
    pub title: String,
    pub categories: Vec<String>,
    pub moods: Vec<String>,
    /// Probed from the file when not given.
    pub duration: Option<f64>,
    pub description: String,
}

/// Partial edit for [`MusicCatalog::update`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct TrackUpdate {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub categories: Option<Vec<String>>,
    pub moods: Option<Vec<String>>,
    pub duration: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LibraryFile {
    #[serde(default)]
    tracks: BTreeMap<String, MusicTrack>,
    #[serde(default = "default_categories")]
    categories: BTreeMap<String, String>,
    #[serde(default = "default_moods")]
    moods: BTreeMap<String, String>,
}

impl Default for LibraryFile {
    fn default() -> Self {
        Self {
            tracks: BTreeMap::new(),
            categories: default_categories(),
            moods: default_moods(),
        }
    }
}

fn default_categories() -> BTreeMap<String, String> {
    [
        ("intro", "Intro och öppning"),
        ("news", "Nyheter och seriöst innehåll"),
        ("tech", "Teknik och innovation"),
        ("transition", "Övergångar mellan ämnen"),
        ("weather", "Väder och avslutning"),
        ("upbeat", "Energisk och positiv"),
        ("calm", "Lugn och avslappnande"),
        ("outro", "Avslutning och outro"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_moods() -> BTreeMap<String, String> {
    [
        ("serious", "Seriös och professionell"),
        ("upbeat", "Energisk och positiv"),
        ("calm", "Lugn och avslappnande"),
        ("mysterious", "Mystisk och spännande"),
        ("dramatic", "Dramatisk och intensiv"),
        ("playful", "Lekfull och avslappnad"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Catalog ID of a file: first 8 hex digits of its SHA-256.
pub fn content_id(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    std::io::copy(&mut file, &mut hasher)?;
    let digest = format!("{:x}", hasher.finalize());
    Ok(digest[..8].to_string())
}

/// Atomically write data to a file via temp file + rename.
fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = target.with_extension("tmp");
    std::fs::write(&tmp_path, data)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, target)
        .with_context(|| format!("Failed to replace {}", target.display()))?;
    Ok(())
}

/// The music library: metadata file plus managed audio directory.
///
/// Single writer; concurrent mutation from several processes is not guarded.
#[derive(Debug)]
pub struct MusicCatalog {
    music_dir: PathBuf,
    library_path: PathBuf,
    library: LibraryFile,
}

impl MusicCatalog {
    /// Open (or start) a catalog. A missing library file is an empty catalog;
    /// an unreadable one is an error.
    pub fn open(music_dir: &Path, library_path: &Path) -> Result<Self> {
        let library = if library_path.exists() {
            let data = std::fs::read_to_string(library_path).with_context(|| {
                format!("Failed to read music library: {}", library_path.display())
            })?;
            serde_json::from_str(&data).with_context(|| {
                format!("Failed to parse music library: {}", library_path.display())
            })?
        } else {
            LibraryFile::default()
        };
        log::debug!(
            "Music catalog {} has {} tracks",
            library_path.display(),
            library.tracks.len()
        );
        Ok(Self {
            music_dir: music_dir.to_path_buf(),
            library_path: library_path.to_path_buf(),
            library,
        })
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.library)?;
        atomic_write(&self.library_path, json.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.library.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.library.tracks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MusicTrack> {
        self.library.tracks.get(id)
    }

    /// Resolve a marker reference. 8-hex IDs are looked up directly; anything
    /// else is matched as `artist - title`, case-insensitively.
    pub fn resolve(&self, reference: &str) -> Option<&MusicTrack> {
        let (track_ref, _) = crate::script::parse_track_ref(reference)?;
        self.resolve_ref(&track_ref)
    }

    pub fn resolve_ref(&self, track_ref: &TrackRef) -> Option<&MusicTrack> {
        match track_ref {
            TrackRef::Id(id) => self.get(id),
            TrackRef::Legacy { artist, title } => {
                let artist = artist.to_lowercase();
                let title = title.to_lowercase();
                self.library.tracks.values().find(|t| {
                    t.artist.to_lowercase() == artist && t.title.to_lowercase() == title
                })
            }
        }
    }

    /// Resolve every cue; the map is keyed by cue ordinal and only holds hits.
    pub fn resolve_cues(&self, cues: &[MusicCue]) -> BTreeMap<usize, MusicTrack> {
        let mut resolved = BTreeMap::new();
        for cue in cues {
            match self.resolve_ref(&cue.segment.track_ref) {
                Some(track) => {
                    resolved.insert(cue.ordinal, track.clone());
                }
                None => log::debug!("No catalog entry for {}", cue.segment.raw_marker),
            }
        }
        resolved
    }

    /// Import a file. Returns the existing ID if identical bytes are
    /// already catalogued.
    pub fn add(&mut self, source: &Path, info: TrackInfo) -> Result<String> {
        if !source.is_file() {
            bail!("Music file not found: {}", source.display());
        }
        if info.artist.trim().is_empty() || info.title.trim().is_empty() {
            bail!("Artist and title are required");
        }

        let id = content_id(source)?;
        if self.library.tracks.contains_key(&id) {
            log::info!("Track already in catalog (ID: {})", id);
            return Ok(id);
        }

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| "mp3".to_string());
        let filename = format!("{}.{}", id, ext);
        let dest = self.music_dir.join(&filename);

        std::fs::create_dir_all(&self.music_dir)
            .with_context(|| format!("Failed to create {}", self.music_dir.display()))?;
        // Copy under a temp name so a crash never leaves a half file in place.
        let partial = dest.with_extension(format!("{}.part", ext));
        std::fs::copy(source, &partial)
            .with_context(|| format!("Failed to copy {}", source.display()))?;
        std::fs::rename(&partial, &dest)
            .with_context(|| format!("Failed to move into {}", dest.display()))?;
        let file_size = std::fs::metadata(&dest)?.len();

        let duration = info.duration.or_else(|| match crate::audio::io::probe_duration(&dest) {
            Ok(d) => Some(d),
            Err(e) => {
                log::warn!("Could not probe duration of {}: {:#}", dest.display(), e);
                None
            }
        });

        let track = MusicTrack {
            id: id.clone(),
            artist: info.artist.trim().to_string(),
            title: info.title.trim().to_string(),
            filename,
            path: dest.clone(),
            categories: info.categories.into_iter().collect(),
            moods: info.moods.into_iter().collect(),
            duration,
            description: info.description,
            added_at: CivilTime::from_unix(now_unix()).iso8601(),
            file_size,
        };
        let label = track.label();
        self.library.tracks.insert(id.clone(), track);

        if let Err(e) = self.save() {
            self.library.tracks.remove(&id);
            std::fs::remove_file(&dest).ok();
            return Err(e.context("Failed to save music library"));
        }

        log::info!("Added track: {} (ID: {})", label, id);
        Ok(id)
    }

    /// Remove a track. File deletion is best-effort; the metadata entry is
    /// always dropped. Returns false for unknown IDs.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let Some(track) = self.library.tracks.remove(id) else {
            return Ok(false);
        };

        match std::fs::remove_file(&track.path) {
            Ok(()) => log::info!("Removed music file: {}", track.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Music file already gone: {}", track.path.display())
            }
            Err(e) => log::warn!("Could not remove {}: {}", track.path.display(), e),
        }

        self.save()?;
        log::info!("Removed track: {}", track.label());
        Ok(true)
    }

    /// Apply a metadata edit. Returns false for unknown IDs.
    pub fn update(&mut self, id: &str, edit: TrackUpdate) -> Result<bool> {
        let Some(track) = self.library.tracks.get_mut(id) else {
            return Ok(false);
        };
        if let Some(artist) = edit.artist {
            track.artist = artist;
        }
        if let Some(title) = edit.title {
            track.title = title;
        }
        if let Some(categories) = edit.categories {
            track.categories = categories.into_iter().collect();
        }
        if let Some(moods) = edit.moods {
            track.moods = moods.into_iter().collect();
        }
        if let Some(duration) = edit.duration {
            track.duration = Some(duration);
        }
        if let Some(description) = edit.description {
            track.description = description;
        }
        self.save()?;
        Ok(true)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &MusicTrack> {
        self.library.tracks.values()
    }

    pub fn categories(&self) -> &BTreeMap<String, String> {
        &self.library.categories
    }

    pub fn moods(&self) -> &BTreeMap<String, String> {
        &self.library.moods
    }

    pub fn by_category(&self, category: &str) -> Vec<&MusicTrack> {
        self.tracks()
            .filter(|t| t.categories.contains(category))
            .collect()
    }

    pub fn by_mood(&self, mood: &str) -> Vec<&MusicTrack> {
        self.tracks().filter(|t| t.moods.contains(mood)).collect()
    }

    /// Case-insensitive substring search over artist, title and description.
    pub fn search(&self, query: &str) -> Vec<&MusicTrack> {
        let query = query.to_lowercase();
        self.tracks()
            .filter(|t| {
                t.artist.to_lowercase().contains(&query)
                    || t.title.to_lowercase().contains(&query)
                    || t.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Music section for the script-writing prompt.
    pub fn prompt_context(&self) -> String {
        if self.is_empty() {
            return "Ingen bakgrundsmusik är tillgänglig.".to_string();
        }

        let mut out = String::from("Tillgänglig bakgrundsmusik:\n\n");
        let mut listed = BTreeSet::new();
        for (category, display) in &self.library.categories {
            let tracks = self.by_category(category);
            if tracks.is_empty() {
                continue;
            }
            out.push_str(&format!("**{}:**\n", display));
            for track in tracks {
                listed.insert(track.id.as_str());
                out.push_str(&track_line(track));
            }
            out.push('\n');
        }
        let rest: Vec<&MusicTrack> = self
            .tracks()
            .filter(|t| !listed.contains(t.id.as_str()))
            .collect();
        if !rest.is_empty() {
            out.push_str("**Övrigt:**\n");
            for track in rest {
                out.push_str(&track_line(track));
            }
            out.push('\n');
        }

        out.push_str(
            "Instruktioner för musikanvändning:\n\
             - Använd musik sparsamt och endast när det förbättrar upplevelsen\n\
             - Markera musikinsättningar på en egen rad som: [MUSIK: <id>]\n\
             - Använd exakt det ID som står inom hakparentes ovan\n\
             - Typiska användningsområden: intro, övergångar mellan ämnen, outro\n",
        );
        out
    }
}

fn track_line(track: &MusicTrack) -> String {
    let mut line = format!("- [MUSIK: {}] {}", track.id, track.label());
    if let Some(d) = track.duration {
        line.push_str(&format!(" ({:.1}s)", d));
    }
    line.push('\n');
    if !track.description.is_empty() {
        line.push_str(&format!("  Beskrivning: {}\n", track.description));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MusicSegment;

    fn catalog(dir: &Path) -> MusicCatalog {
        MusicCatalog::open(&dir.join("music"), &dir.join("music_library.json")).unwrap()
    }

    fn info(artist: &str, title: &str) -> TrackInfo {
        TrackInfo {
            artist: artist.to_string(),
            title: title.to_string(),
            categories: vec!["intro".to_string()],
            moods: vec!["upbeat".to_string()],
            duration: Some(12.5),
            description: "Pigg morgonslinga".to_string(),
        }
    }

    fn write_source(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "song.mp3", b"not really audio");
        let mut cat = catalog(dir.path());

        let id1 = cat.add(&src, info("Kebu", "Morgon")).unwrap();
        let id2 = cat.add(&src, info("Kebu", "Morgon")).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 8);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(cat.len(), 1);
        assert!(dir.path().join("music").join(format!("{}.mp3", id1)).is_file());
    }

    #[test]
    fn test_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "song.wav", b"abc");
        let id = {
            let mut cat = catalog(dir.path());
            cat.add(&src, info("Kebu", "Morgon")).unwrap()
        };

        let json = std::fs::read_to_string(dir.path().join("music_library.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["tracks"][&id]["artist"], "Kebu");
        assert_eq!(value["tracks"][&id]["file_size"], 3);
        assert_eq!(value["categories"]["intro"], "Intro och öppning");

        let cat = catalog(dir.path());
        assert_eq!(cat.get(&id).unwrap().title, "Morgon");
    }

    #[test]
    fn test_resolve_id_and_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "a.mp3", b"track a");
        let mut cat = catalog(dir.path());
        let id = cat.add(&src, info("Jazz Trio", "Blå Timme")).unwrap();

        assert_eq!(cat.resolve(&id).unwrap().id, id);
        assert_eq!(cat.resolve("jazz trio - BLÅ TIMME").unwrap().id, id);
        assert!(cat.resolve("00000000").is_none());
        assert!(cat.resolve("Okänd - Låt").is_none());
    }

    #[test]
    fn test_resolve_cues_keeps_hits_only() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "a.mp3", b"track a");
        let mut cat = catalog(dir.path());
        let id = cat.add(&src, info("Kebu", "Morgon")).unwrap();

        let cue = |ordinal: usize, r: TrackRef| MusicCue {
            ordinal,
            position: 1,
            segment: MusicSegment {
                raw_marker: format!("[MUSIK: {}]", r),
                track_ref: r,
                duration: None,
            },
        };
        let cues = vec![cue(0, TrackRef::Id("ffffffff".into())), cue(1, TrackRef::Id(id.clone()))];
        let resolved = cat.resolve_cues(&cues);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&1].id, id);
    }

    #[test]
    fn test_remove_missing_file_still_drops_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "a.mp3", b"track a");
        let mut cat = catalog(dir.path());
        let id = cat.add(&src, info("Kebu", "Morgon")).unwrap();

        std::fs::remove_file(&cat.get(&id).unwrap().path).unwrap();
        assert!(cat.remove(&id).unwrap());
        assert!(cat.get(&id).is_none());
        assert!(!cat.remove(&id).unwrap());

        let reloaded = catalog(dir.path());
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_add_missing_source_fails_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path());
        assert!(cat.add(&dir.path().join("nope.mp3"), info("A", "B")).is_err());
        assert!(cat.is_empty());
        assert!(!dir.path().join("music_library.json").exists());
    }

    #[test]
    fn test_filters_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path());
        let a = write_source(dir.path(), "a.mp3", b"a");
        let b = write_source(dir.path(), "b.mp3", b"b");
        cat.add(&a, info("Kebu", "Morgon")).unwrap();
        let mut calm = info("Lugn Kvartett", "Kvällsbris");
        calm.categories = vec!["outro".into()];
        calm.moods = vec!["calm".into()];
        calm.description = "Stilla piano".into();
        cat.add(&b, calm).unwrap();

        assert_eq!(cat.by_category("intro").len(), 1);
        assert_eq!(cat.by_mood("calm")[0].artist, "Lugn Kvartett");
        assert_eq!(cat.search("PIANO").len(), 1);
        assert_eq!(cat.search("k").len(), 2);
    }

    #[test]
    fn test_update_edits_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "a.mp3", b"a");
        let mut cat = catalog(dir.path());
        let id = cat.add(&src, info("Kebu", "Morgon")).unwrap();

        let edit = TrackUpdate {
            title: Some("Morgonljus".into()),
            moods: Some(vec!["calm".into()]),
            ..Default::default()
        };
        assert!(cat.update(&id, edit).unwrap());
        let track = cat.get(&id).unwrap();
        assert_eq!(track.title, "Morgonljus");
        assert!(track.moods.contains("calm"));
        assert!(!cat.update("ffffffff", TrackUpdate::default()).unwrap());
    }

    #[test]
    fn test_prompt_context_lists_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path());
        assert_eq!(cat.prompt_context(), "Ingen bakgrundsmusik är tillgänglig.");

        let src = write_source(dir.path(), "a.mp3", b"a");
        let id = cat.add(&src, info("Kebu", "Morgon")).unwrap();
        let ctx = cat.prompt_context();
        assert!(ctx.contains(&format!("[MUSIK: {}] Kebu - Morgon (12.5s)", id)));
        assert!(ctx.contains("**Intro och öppning:**"));
    }
}
