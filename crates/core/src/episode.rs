//! Episode metadata and the on-disk episode store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PodcastConfig;
use crate::dates::{format_duration, CivilTime};

lazy_static! {
    static ref META_FILE: Regex = Regex::new(r"^episode_(\d+)_meta\.json$").unwrap();
}

/// Everything the feed and the uploader need to know about one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub title: String,
    pub description: String,
    pub episode_number: u32,
    /// `HH:MM:SS`.
    pub duration: String,
    pub duration_seconds: u64,
    pub file_size_bytes: u64,
    /// RFC 2822.
    pub pub_date: String,
    pub published_unix: u64,
    pub guid: String,
    /// File name of the audio, relative to the episodes directory.
    pub audio_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
    /// ISO 8601.
    pub generated_at: String,
}

/// Lowercase, ASCII-dash-separated form of a title for GUIDs.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "podcast".to_string()
    } else {
        slug
    }
}

/// Describe a freshly assembled episode. File size is read from disk.
pub fn build_metadata(
    config: &PodcastConfig,
    episode_number: u32,
    now: u64,
    audio_path: &Path,
    duration_secs: f64,
    script_path: Option<&Path>,
) -> Result<EpisodeMetadata> {
    let file_size_bytes = std::fs::metadata(audio_path)
        .with_context(|| format!("Failed to stat episode audio: {}", audio_path.display()))?
        .len();
    let time = CivilTime::from_unix(now);
    let duration_seconds = duration_secs.max(0.0).round() as u64;
    let file_name = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    Ok(EpisodeMetadata {
        title: format!(
            "{} #{} - {}",
            config.podcast.title,
            episode_number,
            time.swedish_short()
        ),
        description: format!(
            "Din dagliga dos av nyheter, teknik och väder. Avsnitt {}.",
            episode_number
        ),
        episode_number,
        duration: format_duration(duration_seconds),
        duration_seconds,
        file_size_bytes,
        pub_date: time.rfc2822(),
        published_unix: now,
        guid: format!(
            "{}-{}-{}",
            slugify(&config.podcast.title),
            time.compact_date(),
            episode_number
        ),
        audio_file: file_name(audio_path),
        script_file: script_path.map(file_name),
        generated_at: time.iso8601(),
    })
}

/// Directory holding `episode_<n>.<ext>` and `episode_<n>_meta.json`.
#[derive(Debug, Clone)]
pub struct EpisodeStore {
    dir: PathBuf,
}

impl EpisodeStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn audio_path(&self, number: u32, ext: &str) -> PathBuf {
        self.dir.join(format!("episode_{}.{}", number, ext))
    }

    pub fn meta_path(&self, number: u32) -> PathBuf {
        self.dir.join(format!("episode_{}_meta.json", number))
    }

    /// Episode numbers that have a metadata file.
    fn numbers(&self) -> Result<Vec<u32>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut numbers = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?
        {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(n) = META_FILE
                .captures(&name)
                .and_then(|c| c[1].parse::<u32>().ok())
            {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// One past the highest existing number; 1 for an empty store.
    pub fn next_episode_number(&self) -> Result<u32> {
        Ok(self.numbers()?.last().map(|n| n + 1).unwrap_or(1))
    }

    /// All readable metadata, newest first. Unreadable files are skipped.
    pub fn load_all(&self) -> Result<Vec<EpisodeMetadata>> {
        let mut episodes = Vec::new();
        for number in self.numbers()? {
            let path = self.meta_path(number);
            let loaded = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<EpisodeMetadata>(&s).map_err(Into::into));
            match loaded {
                Ok(meta) => episodes.push(meta),
                Err(e) => log::error!("Error loading {}: {:#}", path.display(), e),
            }
        }
        episodes.sort_by(|a, b| {
            b.published_unix
                .cmp(&a.published_unix)
                .then(b.episode_number.cmp(&a.episode_number))
        });
        Ok(episodes)
    }

    pub fn save(&self, meta: &EpisodeMetadata) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.meta_path(meta.episode_number);
        let json = serde_json::to_string_pretty(meta)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Episode metadata saved: {}", path.display());
        Ok(path)
    }
}
