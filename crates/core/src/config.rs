//! Run configuration.
//!
//! One [`PodcastConfig`] is loaded per run and handed by reference to every
//! stage. Every section has defaults, so a partial JSON file is enough.
//! Secrets never live here; providers read them from the environment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::dates::parse_time_of_day;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastConfig {
    pub podcast: PodcastSettings,
    pub hosts: Vec<HostConfig>,
    pub sources: Vec<SourceConfig>,
    pub intro: IntroConfig,
    pub audio: AudioSettings,
    pub chunking: ChunkingConfig,
    pub providers: ProviderConfig,
    pub paths: PathsConfig,
    pub schedule: ScheduleConfig,
}

/// Show-level metadata used by the feed and episode titles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastSettings {
    pub title: String,
    pub description: String,
    pub author: String,
    pub email: String,
    pub language: String,
    pub category: String,
    pub explicit: bool,
    pub public_url: String,
    pub cover_image: String,
}

impl Default for PodcastSettings {
    fn default() -> Self {
        Self {
            title: "Morgonpodd".to_string(),
            description: "Din dagliga dos av nyheter, teknik och väder.".to_string(),
            author: "Morgonpodd".to_string(),
            email: "podcast@example.com".to_string(),
            language: "sv".to_string(),
            category: "News".to_string(),
            explicit: false,
            public_url: "https://morgonpodd.example.com".to_string(),
            cover_image: "cover.jpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub name: String,
    pub voice_id: String,
    pub personality: String,
    pub style: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            personality: String::new(),
            style: String::new(),
        }
    }
}

/// A news/RSS source for the scraper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Lower is earlier in the script.
    pub priority: u32,
    pub max_items: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            kind: "news".to_string(),
            priority: 3,
            max_items: 5,
        }
    }
}

/// How the intro voice is laid over the jingle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntroMixType {
    /// Voice over jingle; jingle fades out shortly after the voice ends.
    #[default]
    FadeOverlay,
    /// Voice over jingle, longest input wins.
    Overlay,
    /// Jingle fades out, then the voice fades in.
    Sequence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroConfig {
    pub enabled: bool,
    /// Placeholders: `{podcast_title}`, `{date}`, `{author}`.
    pub template: String,
    /// Falls back to the provider default voice.
    pub voice_id: Option<String>,
    pub jingle_file: Option<PathBuf>,
    pub mix_type: IntroMixType,
    /// Seconds.
    pub fade_duration: f64,
    /// Seconds of jingle kept after the voice ends, before the fade.
    pub voice_buffer: f64,
    /// Applied to the jingle under the voice.
    pub jingle_gain_db: f64,
}

impl Default for IntroConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            template: "Välkommen till {podcast_title}! Idag är det {date}. Här kommer din dagliga sammanfattning av nyheter, teknik och väder.".to_string(),
            voice_id: None,
            jingle_file: None,
            mix_type: IntroMixType::FadeOverlay,
            fade_duration: 2.0,
            voice_buffer: 1.0,
            jingle_gain_db: -6.0,
        }
    }
}

/// Common audio format and mixing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// "native", "ffmpeg" or "auto".
    pub backend: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Intro → main content crossfade, seconds.
    pub crossfade_duration: f64,
    /// Fade applied to both edges of every music clip, seconds.
    pub music_fade: f64,
    pub music_gain_db: f64,
    /// "mp3" or "wav".
    pub output_format: String,
    pub mp3_bitrate_kbps: u32,
    /// Ceiling for any external audio process.
    pub process_timeout_secs: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            backend: "native".to_string(),
            sample_rate: 44_100,
            channels: 2,
            crossfade_duration: 2.0,
            music_fade: 0.5,
            music_gain_db: 0.0,
            output_format: "mp3".to_string(),
            mp3_bitrate_kbps: 128,
            process_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Soft character budget per dialogue request.
    pub max_chars: usize,
    /// Budget per request on the single-voice path.
    pub single_voice_max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1800,
            single_voice_max_chars: 4500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub elevenlabs_base_url: String,
    pub dialogue_model: String,
    pub speech_model: String,
    /// ElevenLabs `output_format` query value.
    pub speech_output_format: String,
    pub default_voice_id: String,
    pub stability: f64,
    pub similarity_boost: f64,
    pub style: f64,
    pub use_speaker_boost: bool,
    pub openai_base_url: String,
    pub openai_model: String,
    pub http_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            elevenlabs_base_url: "https://api.elevenlabs.io".to_string(),
            dialogue_model: "eleven_v3".to_string(),
            speech_model: "eleven_multilingual_v2".to_string(),
            speech_output_format: "mp3_44100_128".to_string(),
            default_voice_id: DEFAULT_VOICE_ID.to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.4,
            use_speaker_boost: true,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-5".to_string(),
            http_timeout_secs: 180,
            fetch_timeout_secs: 10,
            max_concurrent_fetches: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub episodes_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub work_dir: PathBuf,
    pub music_dir: PathBuf,
    pub music_library: PathBuf,
    pub public_dir: PathBuf,
    /// Mirror of the object store. Publishing is skipped when unset.
    pub publish_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            episodes_dir: PathBuf::from("episodes"),
            scripts_dir: PathBuf::from("scripts"),
            work_dir: PathBuf::from("work"),
            music_dir: PathBuf::from("audio/music"),
            music_library: PathBuf::from("music_library.json"),
            public_dir: PathBuf::from("public"),
            publish_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// "HH:MM", UTC.
    pub generate_time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            generate_time: "06:00".to_string(),
        }
    }
}

pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

impl PodcastConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: PodcastConfig = serde_json::from_str(content)?;
        if config.hosts.is_empty() {
            config.hosts = default_hosts();
        }
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus the two standard hosts.
    pub fn with_default_hosts() -> Self {
        Self {
            hosts: default_hosts(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            bail!("At least one host must be configured");
        }
        let mut seen = std::collections::HashSet::new();
        for host in &self.hosts {
            if host.name.trim().is_empty() {
                bail!("Host name cannot be empty");
            }
            if !seen.insert(host.name.to_lowercase()) {
                bail!("Duplicate host name: {}", host.name);
            }
        }
        if self.chunking.max_chars == 0 || self.chunking.single_voice_max_chars == 0 {
            bail!("Chunk budgets must be greater than zero");
        }
        if self.audio.sample_rate == 0 {
            bail!("Sample rate must be greater than zero");
        }
        if !(1..=2).contains(&self.audio.channels) {
            bail!("Channel count must be 1 or 2, got {}", self.audio.channels);
        }
        if self.audio.crossfade_duration < 0.0 || self.audio.music_fade < 0.0 {
            bail!("Fade durations cannot be negative");
        }
        parse_time_of_day(&self.schedule.generate_time)?;
        Ok(())
    }

    pub fn host_names(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.name.clone()).collect()
    }

    /// Voice for a speaker, matched case-insensitively; unknown speakers get
    /// the provider default.
    pub fn voice_for(&self, speaker: &str) -> &str {
        let wanted = speaker.to_lowercase();
        self.hosts
            .iter()
            .find(|h| h.name.to_lowercase() == wanted)
            .map(|h| h.voice_id.as_str())
            .filter(|v| !v.is_empty())
            .unwrap_or(self.providers.default_voice_id.as_str())
    }

    /// Voice used by the intro and the single-voice path.
    pub fn intro_voice(&self) -> &str {
        self.intro
            .voice_id
            .as_deref()
            .unwrap_or(self.providers.default_voice_id.as_str())
    }
}

fn default_hosts() -> Vec<HostConfig> {
    vec![
        HostConfig {
            name: "Anna".to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            personality: "Energisk morgonvärd".to_string(),
            style: "varm och konversationell".to_string(),
        },
        HostConfig {
            name: "Erik".to_string(),
            voice_id: "TxGEqnHWrfWFTfGW9XjX".to_string(),
            personality: "Analytisk och noggrann".to_string(),
            style: "informativ men lättsam".to_string(),
        },
    ]
}
