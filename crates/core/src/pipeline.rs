//! One episode run, start to finish, plus the daily scheduler.
//!
//! Stages run strictly in order. Scraping, script writing, intro and upload
//! problems degrade the episode; a dialogue synthesis failure aborts it
//! before anything lands in the episodes directory.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::audio::{get_audio_tool, AudioAssembler, AudioTool, Pcm};
use crate::config::PodcastConfig;
use crate::dates::{create_run_dir, now_unix, parse_time_of_day, seconds_until, CivilTime};
use crate::episode::{build_metadata, EpisodeMetadata, EpisodeStore};
use crate::feed::write_feed;
use crate::intro::IntroGenerator;
use crate::music::MusicCatalog;
use crate::scraper::{HttpScraper, Scraper};
use crate::script::{DialogueChunker, ScriptParser};
use crate::summarizer::{OpenAiScriptWriter, ScriptWriter};
use crate::synth::{
    DialogueProvider, DialogueSynthesizer, ElevenLabsClient, SingleVoiceSynthesizer, SpeechProvider,
};
use crate::upload::{upload_all, DirectoryUploader, Uploader};

/// The external services a run talks to.
pub struct Collaborators {
    pub scraper: Box<dyn Scraper>,
    pub writer: Box<dyn ScriptWriter>,
    pub dialogue: Box<dyn DialogueProvider>,
    pub speech: Box<dyn SpeechProvider>,
    pub tool: Box<dyn AudioTool>,
    pub uploader: Option<Box<dyn Uploader>>,
}

impl Collaborators {
    /// Real providers, with secrets read from the environment.
    pub fn from_config(config: &PodcastConfig) -> Result<Self> {
        let uploader: Option<Box<dyn Uploader>> = config
            .paths
            .publish_dir
            .as_deref()
            .map(|dir| Box::new(DirectoryUploader::new(dir)) as Box<dyn Uploader>);
        Ok(Self {
            scraper: Box::new(HttpScraper::from_config(config)?),
            writer: Box::new(OpenAiScriptWriter::from_env(config)?),
            dialogue: Box::new(ElevenLabsClient::from_env(&config.providers)?),
            speech: Box::new(ElevenLabsClient::from_env(&config.providers)?),
            tool: get_audio_tool(&config.audio.backend, &config.audio)?,
            uploader,
        })
    }
}

pub struct EpisodePipeline {
    config: PodcastConfig,
    parts: Collaborators,
}

impl EpisodePipeline {
    pub fn new(config: PodcastConfig, parts: Collaborators) -> Self {
        Self { config, parts }
    }

    pub fn from_config(config: PodcastConfig) -> Result<Self> {
        let parts = Collaborators::from_config(&config)?;
        Ok(Self::new(config, parts))
    }

    pub fn config(&self) -> &PodcastConfig {
        &self.config
    }

    /// Generate one episode now.
    pub fn generate_episode(&self) -> Result<EpisodeMetadata> {
        self.generate_episode_at(now_unix())
    }

    /// Generate one episode as if the clock read `now`.
    pub fn generate_episode_at(&self, now: u64) -> Result<EpisodeMetadata> {
        let started = Instant::now();
        let paths = &self.config.paths;
        let store = EpisodeStore::new(&paths.episodes_dir);
        let number = store.next_episode_number()?;
        log::info!("=== Starting podcast generation: episode {} ===", number);

        let run_dir = create_run_dir(&paths.work_dir, now, &format!("episode-{}", number))?;
        log::debug!("Run directory: {}", run_dir.display());

        log::info!("Step 1: Scraping content...");
        let scraped = self.parts.scraper.scrape_all();
        let item_count: usize = scraped.iter().map(|s| s.items.len()).sum();
        log::info!("Scraped {} items from {} sources", item_count, scraped.len());
        let scraped_path = run_dir.join("scraped_content.json");
        std::fs::write(&scraped_path, serde_json::to_string_pretty(&scraped)?)
            .with_context(|| format!("Failed to write {}", scraped_path.display()))?;

        log::info!("Step 2: Generating podcast script...");
        let catalog = MusicCatalog::open(&paths.music_dir, &paths.music_library)
            .context("Step 2 failed: could not open music catalog")?;
        let script = self
            .parts
            .writer
            .create_script(&scraped, &catalog.prompt_context())
            .context("Step 2 failed: script writing")?;
        let script_path = save_script(&paths.scripts_dir, &script, now)?;

        log::info!("Step 3: Generating intro...");
        let intro = IntroGenerator::new(&self.config, self.parts.speech.as_ref(), self.parts.tool.as_ref())
            .generate(&run_dir, now);

        log::info!("Step 4: Generating episode audio...");
        let main = self
            .render_main(&script, &catalog)
            .context("Step 4 failed: episode audio")?;
        let assembler = AudioAssembler::new(self.parts.tool.as_ref(), &self.config.audio);
        let outcome = assembler.combine_intro(intro.as_deref(), main);
        log::info!(
            "Intro combination resolved by {:?} ({:.1}s total)",
            outcome.resolved_by,
            outcome.pcm.duration_secs()
        );
        let audio_path = self
            .publish_audio(&store, number, &run_dir, &outcome.pcm)
            .context("Step 4 failed: encoding")?;

        log::info!("Step 5: Creating episode metadata...");
        let meta = build_metadata(
            &self.config,
            number,
            now,
            &audio_path,
            outcome.pcm.duration_secs(),
            Some(&script_path),
        )?;
        let meta_path = store.save(&meta).context("Step 5 failed: metadata")?;

        log::info!("Step 6: Updating RSS feed...");
        let feed = write_feed(&self.config.podcast, &store, &paths.public_dir, now)
            .context("Step 6 failed: feed")?;

        match &self.parts.uploader {
            Some(uploader) => {
                log::info!("Step 7: Uploading via {}...", uploader.name());
                let files = vec![
                    (audio_path.clone(), format!("episodes/{}", meta.audio_file)),
                    (meta_path, format!("episodes/episode_{}_meta.json", number)),
                    (feed.xml, "feed.xml".to_string()),
                    (feed.json, "feed.json".to_string()),
                ];
                let ok = upload_all(uploader.as_ref(), &files);
                if ok < files.len() {
                    log::warn!("{} of {} uploads failed", files.len() - ok, files.len());
                }
            }
            None => log::info!("Step 7: No uploader configured, skipping upload"),
        }

        log::info!(
            "=== Episode generated successfully in {:.1} seconds ===",
            started.elapsed().as_secs_f64()
        );
        log::info!("Episode: {}", meta.title);
        log::info!("Audio file: {}", audio_path.display());
        Ok(meta)
    }

    /// Speech audio for the script body, music included.
    fn render_main(&self, script: &str, catalog: &MusicCatalog) -> Result<Pcm> {
        let tool = self.parts.tool.as_ref();
        let assembler = AudioAssembler::new(tool, &self.config.audio);
        let parser = ScriptParser::from_config(&self.config);

        if !parser.is_conversational(script) {
            log::info!("Script is not in dialogue form, using single-voice synthesis");
            let synth = SingleVoiceSynthesizer::new(
                self.parts.speech.as_ref(),
                self.config.intro_voice(),
                self.config.chunking.single_voice_max_chars,
            );
            let parts = synth.synthesize(script)?;
            return assembler.assemble_speech(&parts);
        }

        let segments = parser.parse(script);
        let plan = DialogueChunker::from_config(&self.config).chunk(&segments);
        if plan.is_empty() {
            bail!("Script contains no dialogue for the configured hosts");
        }
        log::info!(
            "Parsed {} dialogue turns into {} chunks with {} music cues",
            plan.unit_count(),
            plan.chunks.len(),
            plan.cues.len()
        );
        let resolved = catalog.resolve_cues(&plan.cues);
        let audio = DialogueSynthesizer::new(self.parts.dialogue.as_ref()).synthesize(&plan)?;
        assembler.assemble(&audio, &plan, &resolved)
    }

    /// Encode inside the run directory, then move into the episodes
    /// directory so a failed encode never leaves a half-written episode.
    fn publish_audio(&self, store: &EpisodeStore, number: u32, run_dir: &Path, pcm: &Pcm) -> Result<PathBuf> {
        let ext = self.config.audio.output_format.to_ascii_lowercase();
        let staged = run_dir.join(format!("episode.{}", ext));
        self.parts.tool.encode(pcm, &staged)?;

        std::fs::create_dir_all(store.dir())
            .with_context(|| format!("Failed to create {}", store.dir().display()))?;
        let dest = store.audio_path(number, &ext);
        if std::fs::rename(&staged, &dest).is_err() {
            std::fs::copy(&staged, &dest)
                .with_context(|| format!("Failed to move audio to {}", dest.display()))?;
        }
        Ok(dest)
    }

    /// Run forever, one episode a day at the configured time (UTC). Failed
    /// runs are logged and the loop carries on.
    pub fn run_scheduled(&self) -> Result<()> {
        let (hour, minute) = parse_time_of_day(&self.config.schedule.generate_time)?;
        log::info!(
            "Scheduled daily podcast generation at {:02}:{:02} UTC",
            hour,
            minute
        );
        loop {
            let wait = seconds_until(now_unix(), hour, minute);
            log::info!("Next episode in {}", crate::dates::format_duration(wait));
            std::thread::sleep(Duration::from_secs(wait));
            if let Err(e) = self.generate_episode() {
                log::error!("Episode generation failed: {:#}", e);
            }
        }
    }
}

/// Write the script to `scripts_dir/podcast_script_<date>_<time>.txt`.
pub fn save_script(scripts_dir: &Path, script: &str, now: u64) -> Result<PathBuf> {
    std::fs::create_dir_all(scripts_dir)
        .with_context(|| format!("Failed to create {}", scripts_dir.display()))?;
    let time = CivilTime::from_unix(now);
    let path = scripts_dir.join(format!(
        "podcast_script_{}_{}.txt",
        time.compact_date(),
        time.compact_time()
    ));
    std::fs::write(&path, script).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Script saved to {}", path.display());
    Ok(path)
}
