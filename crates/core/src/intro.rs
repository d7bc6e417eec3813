//! Spoken intro over the podcast jingle.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::audio::effects;
use crate::audio::io::{self, Pcm};
use crate::audio::AudioTool;
use crate::config::{IntroMixType, PodcastConfig};
use crate::dates::CivilTime;
use crate::synth::SpeechProvider;

/// Seconds of jingle played before it fades in `sequence` mode.
const SEQUENCE_JINGLE_SECS: f64 = 3.0;

pub struct IntroGenerator<'a> {
    config: &'a PodcastConfig,
    speech: &'a dyn SpeechProvider,
    tool: &'a dyn AudioTool,
}

impl<'a> IntroGenerator<'a> {
    pub fn new(
        config: &'a PodcastConfig,
        speech: &'a dyn SpeechProvider,
        tool: &'a dyn AudioTool,
    ) -> Self {
        Self {
            config,
            speech,
            tool,
        }
    }

    /// Render the intro template for the given moment.
    pub fn intro_text(&self, now: u64) -> String {
        let date = CivilTime::from_unix(now).swedish_long();
        self.config
            .intro
            .template
            .replace("{podcast_title}", &self.config.podcast.title)
            .replace("{date}", &date)
            .replace("{author}", &self.config.podcast.author)
    }

    /// Produce `intro.wav` in `work_dir`. Disabled intros and every failure
    /// give `None`; the episode is then published without an intro.
    pub fn generate(&self, work_dir: &Path, now: u64) -> Option<PathBuf> {
        if !self.config.intro.enabled {
            log::info!("Intro disabled");
            return None;
        }
        match self.try_generate(work_dir, now) {
            Ok(path) => Some(path),
            Err(e) => {
                log::error!("Intro generation failed, continuing without intro: {:#}", e);
                None
            }
        }
    }

    fn try_generate(&self, work_dir: &Path, now: u64) -> Result<PathBuf> {
        let text = self.intro_text(now);
        log::info!("Generating intro: {}", text);

        let bytes = self
            .speech
            .synthesize_speech(&text, self.config.intro_voice())
            .context("Intro speech synthesis failed")?;
        if bytes.is_empty() {
            bail!("Provider returned no intro audio");
        }
        let voice = self
            .tool
            .normalize(&bytes, io::sniff_format(&bytes))
            .context("Failed to normalize intro voice")?;

        let jingle = self.load_jingle(&voice);
        let mixed = match jingle {
            Some(jingle) => self.mix(voice, jingle)?,
            None => voice,
        };

        std::fs::create_dir_all(work_dir)
            .with_context(|| format!("Failed to create {}", work_dir.display()))?;
        let path = work_dir.join("intro.wav");
        self.tool.encode(&mixed, &path)?;
        log::info!(
            "Intro ready: {} ({:.1}s)",
            path.display(),
            mixed.duration_secs()
        );
        Ok(path)
    }

    /// A missing or unreadable jingle is not an error.
    fn load_jingle(&self, voice: &Pcm) -> Option<Pcm> {
        let path = self.config.intro.jingle_file.as_ref()?;
        let loaded = std::fs::read(path)
            .with_context(|| format!("Failed to read jingle: {}", path.display()))
            .and_then(|bytes| {
                let hint = path.extension().and_then(|e| e.to_str());
                self.tool.normalize(&bytes, hint)
            })
            .and_then(|pcm| io::conform(&pcm, voice.sample_rate, voice.channel_count()));
        match loaded {
            Ok(pcm) => Some(pcm),
            Err(e) => {
                log::warn!("Jingle unavailable, using voice-only intro: {:#}", e);
                None
            }
        }
    }

    /// Combine voice and jingle according to the configured mix type.
    pub fn mix(&self, mut voice: Pcm, mut jingle: Pcm) -> Result<Pcm> {
        let intro = &self.config.intro;
        match intro.mix_type {
            IntroMixType::FadeOverlay => {
                let fade_start = voice.duration_secs() + intro.voice_buffer;
                if jingle.duration_secs() > fade_start {
                    effects::fade_out_at(&mut jingle, fade_start, intro.fade_duration);
                }
                effects::overlay(&jingle, &voice, 0, intro.jingle_gain_db, 0.0)
            }
            IntroMixType::Overlay => effects::overlay(&jingle, &voice, 0, intro.jingle_gain_db, 0.0),
            IntroMixType::Sequence => {
                if jingle.duration_secs() > SEQUENCE_JINGLE_SECS {
                    effects::fade_out_at(&mut jingle, SEQUENCE_JINGLE_SECS, intro.fade_duration);
                } else {
                    effects::fade_out(&mut jingle, intro.fade_duration);
                }
                effects::fade_in(&mut voice, intro.fade_duration);
                self.tool.concat(&[jingle, voice])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NativeTool;

    const SAMPLE: u64 = 1_792_218_615;

    struct WavVoice {
        secs: f64,
    }

    impl SpeechProvider for WavVoice {
        fn name(&self) -> &str {
            "wav"
        }

        fn synthesize_speech(&self, _text: &str, _voice_id: &str) -> Result<Vec<u8>> {
            io::wav_bytes(&Pcm::from_mono(
                44_100,
                vec![0.25; (44_100.0 * self.secs) as usize],
                2,
            ))
        }
    }

    struct Mute;

    impl SpeechProvider for Mute {
        fn name(&self) -> &str {
            "mute"
        }

        fn synthesize_speech(&self, _text: &str, _voice_id: &str) -> Result<Vec<u8>> {
            bail!("401 Unauthorized")
        }
    }

    fn config(mix_type: IntroMixType) -> PodcastConfig {
        let mut config = PodcastConfig::with_default_hosts();
        config.intro.enabled = true;
        config.intro.mix_type = mix_type;
        config.intro.template = "{podcast_title}, {date}, {author}".into();
        config.podcast.author = "Redaktionen".into();
        config
    }

    fn tone(secs: f64) -> Pcm {
        Pcm::from_mono(1000, vec![0.5; (1000.0 * secs) as usize], 1)
    }

    #[test]
    fn test_intro_text_renders_placeholders() {
        let config = config(IntroMixType::FadeOverlay);
        let tool = NativeTool::default();
        let voice = WavVoice { secs: 0.1 };
        let intro = IntroGenerator::new(&config, &voice, &tool);
        assert_eq!(
            intro.intro_text(SAMPLE),
            "Morgonpodd, lördag den 17 oktober 2026, Redaktionen"
        );
    }

    #[test]
    fn test_fade_overlay_cuts_jingle_after_voice() {
        let config = config(IntroMixType::FadeOverlay);
        let tool = NativeTool::default();
        let voice = WavVoice { secs: 0.1 };
        let intro = IntroGenerator::new(&config, &voice, &tool);

        // voice 2s + buffer 1s + fade 2s = 5s out of a 10s jingle
        let mixed = intro.mix(tone(2.0), tone(10.0)).unwrap();
        assert!((mixed.duration_secs() - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_overlay_keeps_longest() {
        let config = config(IntroMixType::Overlay);
        let tool = NativeTool::default();
        let voice = WavVoice { secs: 0.1 };
        let intro = IntroGenerator::new(&config, &voice, &tool);

        let mixed = intro.mix(tone(4.0), tone(1.0)).unwrap();
        assert!((mixed.duration_secs() - 4.0).abs() < 0.01);
    }

    #[test]
    fn test_sequence_plays_jingle_then_voice() {
        let config = config(IntroMixType::Sequence);
        let tool = NativeTool::default();
        let voice = WavVoice { secs: 0.1 };
        let intro = IntroGenerator::new(&config, &voice, &tool);

        // 3s jingle lead + 2s fade, then 1s voice
        let mixed = intro.mix(tone(1.0), tone(8.0)).unwrap();
        assert!((mixed.duration_secs() - 6.0).abs() < 0.01);
        // voice fades in from silence
        assert_eq!(mixed.channels[0][5000], 0.0);
    }

    #[test]
    fn test_generate_without_jingle_writes_voice() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(IntroMixType::FadeOverlay);
        let tool = NativeTool::default();
        let voice = WavVoice { secs: 0.5 };
        let intro = IntroGenerator::new(&config, &voice, &tool);

        let path = intro.generate(dir.path(), SAMPLE).unwrap();
        let pcm = io::read_wav(&path).unwrap();
        assert!((pcm.duration_secs() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_missing_jingle_file_falls_back_to_voice() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(IntroMixType::Overlay);
        config.intro.jingle_file = Some(dir.path().join("missing.mp3"));
        let tool = NativeTool::default();
        let voice = WavVoice { secs: 0.5 };
        let intro = IntroGenerator::new(&config, &voice, &tool);

        assert!(intro.generate(dir.path(), SAMPLE).is_some());
    }

    #[test]
    fn test_provider_failure_yields_no_intro() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(IntroMixType::FadeOverlay);
        let tool = NativeTool::default();
        let intro = IntroGenerator::new(&config, &Mute, &tool);
        assert!(intro.generate(dir.path(), SAMPLE).is_none());
    }

    #[test]
    fn test_disabled_intro() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(IntroMixType::FadeOverlay);
        config.intro.enabled = false;
        let tool = NativeTool::default();
        let voice = WavVoice { secs: 0.5 };
        let intro = IntroGenerator::new(&config, &voice, &tool);
        assert!(intro.generate(dir.path(), SAMPLE).is_none());
    }
}
