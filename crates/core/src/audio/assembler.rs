//! Episode assembly: synthesized chunks plus music into one PCM stream.
//!
//! Every element is normalized to the common format before anything is
//! joined. Music problems degrade the episode (skip, warn); missing
//! dialogue audio is always fatal.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::effects;
use super::io::{self, Pcm};
use super::tool::AudioTool;
use crate::config::AudioSettings;
use crate::music::MusicTrack;
use crate::script::ChunkPlan;

/// One element of the final play order.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyItem {
    Dialogue {
        chunk: usize,
    },
    Music {
        cue: usize,
        track: MusicTrack,
        /// Trim hint from a legacy marker.
        duration: Option<f64>,
    },
}

/// The literal plan the final join consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblySequence {
    pub items: Vec<AssemblyItem>,
    /// Ordinals of cues with no catalog entry.
    pub skipped_cues: Vec<usize>,
}

impl AssemblySequence {
    pub fn music_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i, AssemblyItem::Music { .. }))
            .count()
    }
}

/// Interleave chunks and resolved music cues in script order.
///
/// Logs one warning per cue that did not resolve.
pub fn build_sequence(plan: &ChunkPlan, resolved: &BTreeMap<usize, MusicTrack>) -> AssemblySequence {
    let mut seq = AssemblySequence::default();

    let push_cues = |seq: &mut AssemblySequence, ordinals: &[usize]| {
        for &ordinal in ordinals {
            let Some(cue) = plan.cues.get(ordinal) else {
                continue;
            };
            match resolved.get(&ordinal) {
                Some(track) => seq.items.push(AssemblyItem::Music {
                    cue: ordinal,
                    track: track.clone(),
                    duration: cue.segment.duration,
                }),
                None => {
                    log::warn!(
                        "Music not found in catalog, skipping {}",
                        cue.segment.raw_marker
                    );
                    seq.skipped_cues.push(ordinal);
                }
            }
        }
    };

    push_cues(&mut seq, &plan.leading);
    for chunk in 0..plan.chunks.len() {
        seq.items.push(AssemblyItem::Dialogue { chunk });
        if let Some(ordinals) = plan.after_chunk.get(&chunk) {
            push_cues(&mut seq, ordinals);
        }
    }
    seq
}

/// States of the intro + main combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntroMixState {
    Normalizing,
    CrossfadeMix,
    FallbackConcat,
    SpeechOnly,
    Done,
}

#[derive(Debug, Clone)]
pub struct IntroMixOutcome {
    pub pcm: Pcm,
    /// Last state before `Done`.
    pub resolved_by: IntroMixState,
    /// Every state visited, ending in `Done`.
    pub trace: Vec<IntroMixState>,
}

/// Builds the episode audio through an [`AudioTool`].
pub struct AudioAssembler<'a> {
    tool: &'a dyn AudioTool,
    settings: AudioSettings,
}

impl<'a> AudioAssembler<'a> {
    pub fn new(tool: &'a dyn AudioTool, settings: &AudioSettings) -> Self {
        Self {
            tool,
            settings: settings.clone(),
        }
    }

    fn empty(&self) -> Pcm {
        Pcm::empty(self.settings.sample_rate, self.settings.channels)
    }

    /// Assemble synthesized chunk audio (one buffer per plan chunk) and the
    /// resolved music (keyed by cue ordinal) into one PCM stream.
    pub fn assemble(
        &self,
        chunk_audio: &[Vec<u8>],
        plan: &ChunkPlan,
        resolved: &BTreeMap<usize, MusicTrack>,
    ) -> Result<Pcm> {
        if plan.chunks.is_empty() {
            bail!("No dialogue to assemble");
        }
        if chunk_audio.len() != plan.chunks.len() {
            bail!(
                "Chunk/audio count mismatch: {} chunks, {} audio buffers",
                plan.chunks.len(),
                chunk_audio.len()
            );
        }

        let sequence = build_sequence(plan, resolved);
        log::info!(
            "Assembling {} dialogue chunks and {} music clips ({} skipped)",
            plan.chunks.len(),
            sequence.music_count(),
            sequence.skipped_cues.len()
        );

        let mut parts = Vec::with_capacity(sequence.items.len());
        let mut is_dialogue = Vec::with_capacity(sequence.items.len());
        for item in &sequence.items {
            match item {
                AssemblyItem::Dialogue { chunk } => {
                    let bytes = &chunk_audio[*chunk];
                    if bytes.is_empty() {
                        bail!("Dialogue chunk {} has no audio", chunk);
                    }
                    let pcm = self
                        .tool
                        .normalize(bytes, io::sniff_format(bytes))
                        .with_context(|| format!("Failed to normalize dialogue chunk {}", chunk))?;
                    parts.push(pcm);
                    is_dialogue.push(true);
                }
                AssemblyItem::Music {
                    track, duration, ..
                } => {
                    parts.push(self.load_music(track, *duration));
                    is_dialogue.push(false);
                }
            }
        }

        match self.tool.concat(&parts) {
            Ok(pcm) => return Ok(pcm),
            Err(e) => log::warn!("{} concat failed, joining in-process: {:#}", self.tool.name(), e),
        }
        match effects::concatenate(&parts, 0) {
            Ok(pcm) => return Ok(pcm),
            Err(e) => log::warn!("Plain concatenation failed, using dialogue only: {:#}", e),
        }
        let dialogue: Vec<Pcm> = parts
            .into_iter()
            .zip(is_dialogue)
            .filter_map(|(pcm, keep)| keep.then_some(pcm))
            .collect();
        effects::concatenate(&dialogue, 0).context("Failed to join dialogue audio")
    }

    /// Normalize and join single-voice parts.
    pub fn assemble_speech(&self, parts: &[Vec<u8>]) -> Result<Pcm> {
        if parts.is_empty() {
            bail!("No speech audio to assemble");
        }
        let mut pcms = Vec::with_capacity(parts.len());
        for (i, bytes) in parts.iter().enumerate() {
            let pcm = self
                .tool
                .normalize(bytes, io::sniff_format(bytes))
                .with_context(|| format!("Failed to normalize speech part {}", i))?;
            pcms.push(pcm);
        }
        match self.tool.concat(&pcms) {
            Ok(pcm) => Ok(pcm),
            Err(e) => {
                log::warn!("{} concat failed, joining in-process: {:#}", self.tool.name(), e);
                effects::concatenate(&pcms, 0)
            }
        }
    }

    /// Load one music clip. Any problem yields a zero-length clip and a
    /// warning so the episode still publishes.
    fn load_music(&self, track: &MusicTrack, duration: Option<f64>) -> Pcm {
        let bytes = match std::fs::read(&track.path) {
            Ok(b) => b,
            Err(e) => {
                log::warn!(
                    "Music file for {} unavailable ({}): {}; substituting silence",
                    track.label(),
                    track.path.display(),
                    e
                );
                return self.empty();
            }
        };
        let hint = track.path.extension().and_then(|e| e.to_str());
        let mut pcm = match self.tool.normalize(&bytes, hint) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Could not decode music {}: {:#}; substituting silence", track.label(), e);
                return self.empty();
            }
        };

        let fade = self.settings.music_fade;
        match duration {
            Some(secs) if secs < pcm.duration_secs() => {
                effects::fade_in(&mut pcm, fade);
                effects::fade_out_at(&mut pcm, (secs - fade).max(0.0), fade.min(secs));
            }
            _ => {
                effects::fade_in(&mut pcm, fade);
                effects::fade_out(&mut pcm, fade);
            }
        }
        effects::adjust_volume(&mut pcm, self.settings.music_gain_db);
        log::debug!("Music {}: {:.1}s", track.label(), pcm.duration_secs());
        pcm
    }

    fn load_intro(&self, path: &Path, main: &Pcm) -> Result<Pcm> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read intro: {}", path.display()))?;
        let hint = path.extension().and_then(|e| e.to_str());
        let intro = self.tool.normalize(&bytes, hint)?;
        if intro.same_format(main) {
            Ok(intro)
        } else {
            io::conform(&intro, main.sample_rate, main.channel_count())
        }
    }

    /// Put the intro in front of the main content with a crossfade,
    /// degrading to a plain join and finally to the main content alone.
    pub fn combine_intro(&self, intro_path: Option<&Path>, main: Pcm) -> IntroMixOutcome {
        let Some(intro_path) = intro_path else {
            return IntroMixOutcome {
                pcm: main,
                resolved_by: IntroMixState::SpeechOnly,
                trace: vec![IntroMixState::SpeechOnly, IntroMixState::Done],
            };
        };

        let mut state = IntroMixState::Normalizing;
        let mut trace = Vec::new();
        let mut resolved_by = state;
        let mut main = Some(main);
        let mut intro: Option<Pcm> = None;
        let mut result: Option<Pcm> = None;

        loop {
            trace.push(state);
            let next = match state {
                IntroMixState::Normalizing => {
                    let loaded = main
                        .as_ref()
                        .map(|m| self.load_intro(intro_path, m))
                        .transpose();
                    match loaded {
                        Ok(Some(pcm)) => {
                            intro = Some(pcm);
                            IntroMixState::CrossfadeMix
                        }
                        Ok(None) => IntroMixState::SpeechOnly,
                        Err(e) => {
                            log::warn!("Intro could not be normalized, skipping it: {:#}", e);
                            IntroMixState::SpeechOnly
                        }
                    }
                }
                IntroMixState::CrossfadeMix => match (&intro, &main) {
                    (Some(i), Some(m)) => {
                        match self
                            .tool
                            .crossfade_concat(i, m, self.settings.crossfade_duration)
                        {
                            Ok(pcm) => {
                                result = Some(pcm);
                                IntroMixState::Done
                            }
                            Err(e) => {
                                log::warn!("Intro crossfade failed, trying plain join: {:#}", e);
                                IntroMixState::FallbackConcat
                            }
                        }
                    }
                    _ => IntroMixState::SpeechOnly,
                },
                IntroMixState::FallbackConcat => {
                    let parts: Vec<Pcm> = intro.take().into_iter().chain(main.take()).collect();
                    match self.tool.concat(&parts) {
                        Ok(pcm) => {
                            result = Some(pcm);
                            IntroMixState::Done
                        }
                        Err(e) => {
                            log::warn!("Intro join failed, publishing without intro: {:#}", e);
                            main = parts.into_iter().last();
                            IntroMixState::SpeechOnly
                        }
                    }
                }
                IntroMixState::SpeechOnly => {
                    result = main.take();
                    IntroMixState::Done
                }
                IntroMixState::Done => break,
            };
            resolved_by = state;
            state = next;
        }

        log::debug!("Intro mix resolved by {:?}", resolved_by);
        IntroMixOutcome {
            pcm: result.unwrap_or_else(|| self.empty()),
            resolved_by,
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tool::NativeTool;
    use crate::script::{DialogueChunker, ScriptParser};
    use std::cell::RefCell;

    thread_local! {
        static RECORDS: RefCell<Vec<(log::Level, String)>> = const { RefCell::new(Vec::new()) };
    }

    struct CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }
        fn log(&self, record: &log::Record) {
            RECORDS.with(|r| r.borrow_mut().push((record.level(), record.args().to_string())));
        }
        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;

    fn capture_logs() {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
        RECORDS.with(|r| r.borrow_mut().clear());
    }

    fn warnings() -> Vec<String> {
        RECORDS.with(|r| {
            r.borrow()
                .iter()
                .filter(|(l, _)| *l == log::Level::Warn)
                .map(|(_, m)| m.clone())
                .collect()
        })
    }

    const SR: u32 = 8_000;

    fn settings() -> AudioSettings {
        AudioSettings {
            sample_rate: SR,
            channels: 1,
            crossfade_duration: 0.5,
            music_fade: 0.1,
            ..AudioSettings::default()
        }
    }

    fn tone(secs: f64, level: f32) -> Pcm {
        Pcm::from_mono(SR, vec![level; (SR as f64 * secs) as usize], 1)
    }

    fn wav(secs: f64, level: f32) -> Vec<u8> {
        io::wav_bytes(&tone(secs, level)).unwrap()
    }

    fn track(dir: &Path, id: &str, secs: f64) -> MusicTrack {
        let path = dir.join(format!("{}.wav", id));
        io::write_wav(&path, &tone(secs, 0.3)).unwrap();
        MusicTrack {
            id: id.to_string(),
            artist: "Kebu".into(),
            title: id.to_string(),
            filename: format!("{}.wav", id),
            path,
            categories: Default::default(),
            moods: Default::default(),
            duration: Some(secs),
            description: String::new(),
            added_at: String::new(),
            file_size: 0,
        }
    }

    fn plan(script: &str, max_chars: usize) -> ChunkPlan {
        let segments = ScriptParser::new(["Anna", "Erik"]).parse(script);
        DialogueChunker::new(max_chars).chunk(&segments)
    }

    /// Normalizes natively but fails every join.
    struct BrokenMixer(NativeTool);

    impl AudioTool for BrokenMixer {
        fn name(&self) -> &str {
            "broken"
        }
        fn normalize(&self, bytes: &[u8], hint: Option<&str>) -> Result<Pcm> {
            self.0.normalize(bytes, hint)
        }
        fn concat(&self, _: &[Pcm]) -> Result<Pcm> {
            bail!("mixer exploded")
        }
        fn crossfade_concat(&self, _: &Pcm, _: &Pcm, _: f64) -> Result<Pcm> {
            bail!("mixer exploded")
        }
        fn encode(&self, _: &Pcm, _: &Path) -> Result<()> {
            bail!("mixer exploded")
        }
    }

    #[test]
    fn test_sequence_places_music_between_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan("Anna: Hej!\n[MUSIK: a1b2c3d4]\nErik: God morgon!", 1000);
        let resolved = BTreeMap::from([(0, track(dir.path(), "a1b2c3d4", 1.0))]);
        let seq = build_sequence(&plan, &resolved);

        assert_eq!(seq.items.len(), 3);
        assert_eq!(seq.items[0], AssemblyItem::Dialogue { chunk: 0 });
        assert!(matches!(&seq.items[1], AssemblyItem::Music { cue: 0, track, .. } if track.id == "a1b2c3d4"));
        assert_eq!(seq.items[2], AssemblyItem::Dialogue { chunk: 1 });
    }

    #[test]
    fn test_unresolved_music_warns_once_each() {
        capture_logs();
        let script = "Anna: Hej!\n[MUSIK: 0badf00d]\nErik: Hallå\n[MUSIK: Okänd - Låt]\nAnna: Hej då";
        let plan = plan(script, 1000);
        let tool = NativeTool::new(&settings());
        let assembler = AudioAssembler::new(&tool, &settings());
        let audio = vec![wav(1.0, 0.1), wav(1.0, 0.1), wav(1.0, 0.1)];

        let pcm = assembler.assemble(&audio, &plan, &BTreeMap::new()).unwrap();
        assert_eq!(pcm.frames(), 3 * SR as usize);

        let warns = warnings();
        assert_eq!(warns.len(), 2, "{:?}", warns);
        assert!(warns[0].contains("[MUSIK: 0badf00d]"));
        assert!(warns[1].contains("[MUSIK: Okänd - Låt]"));
    }

    #[test]
    fn test_assemble_includes_music_with_duration_hint() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan("Anna: Hej!\n[MUSIK: Kebu - a1b2c3d4, 2 sekunder]\nErik: God morgon!", 1000);
        let resolved = BTreeMap::from([(0, track(dir.path(), "a1b2c3d4", 5.0))]);
        let tool = NativeTool::new(&settings());
        let assembler = AudioAssembler::new(&tool, &settings());

        let pcm = assembler
            .assemble(&[wav(1.0, 0.1), wav(1.5, 0.1)], &plan, &resolved)
            .unwrap();
        // 1.0 + 2.0 (trimmed music) + 1.5
        assert_eq!(pcm.frames(), (4.5 * SR as f64) as usize);
    }

    #[test]
    fn test_missing_music_file_becomes_silence() {
        capture_logs();
        let dir = tempfile::tempdir().unwrap();
        let gone = track(dir.path(), "a1b2c3d4", 1.0);
        std::fs::remove_file(&gone.path).unwrap();

        let plan = plan("Anna: Hej!\n[MUSIK: a1b2c3d4]\nErik: God morgon!", 1000);
        let tool = NativeTool::new(&settings());
        let assembler = AudioAssembler::new(&tool, &settings());
        let pcm = assembler
            .assemble(&[wav(1.0, 0.1), wav(1.0, 0.1)], &plan, &BTreeMap::from([(0, gone)]))
            .unwrap();
        assert_eq!(pcm.frames(), 2 * SR as usize);
        assert_eq!(warnings().len(), 1);
    }

    #[test]
    fn test_chunk_count_mismatch_is_fatal() {
        let plan = plan("Anna: Hej!\n[MUSIK: a1b2c3d4]\nErik: God morgon!", 1000);
        let tool = NativeTool::new(&settings());
        let assembler = AudioAssembler::new(&tool, &settings());
        assert!(assembler.assemble(&[wav(1.0, 0.1)], &plan, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_bad_dialogue_audio_is_fatal() {
        let plan = plan("Anna: Hej!", 1000);
        let tool = NativeTool::new(&settings());
        let assembler = AudioAssembler::new(&tool, &settings());
        let err = assembler
            .assemble(&[b"garbage".to_vec()], &plan, &BTreeMap::new())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("dialogue chunk 0"));
    }

    #[test]
    fn test_broken_mixer_falls_back_to_plain_join() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan("Anna: Hej!\n[MUSIK: a1b2c3d4]\nErik: God morgon!", 1000);
        let resolved = BTreeMap::from([(0, track(dir.path(), "a1b2c3d4", 1.0))]);
        let tool = BrokenMixer(NativeTool::new(&settings()));
        let assembler = AudioAssembler::new(&tool, &settings());
        let pcm = assembler
            .assemble(&[wav(1.0, 0.1), wav(1.0, 0.1)], &plan, &resolved)
            .unwrap();
        assert_eq!(pcm.frames(), 3 * SR as usize);
    }

    #[test]
    fn test_intro_crossfade() {
        let dir = tempfile::tempdir().unwrap();
        let intro = dir.path().join("intro.wav");
        io::write_wav(&intro, &tone(2.0, 0.2)).unwrap();
        let tool = NativeTool::new(&settings());
        let assembler = AudioAssembler::new(&tool, &settings());

        let out = assembler.combine_intro(Some(&intro), tone(3.0, 0.1));
        assert_eq!(out.resolved_by, IntroMixState::CrossfadeMix);
        assert_eq!(
            out.trace,
            vec![IntroMixState::Normalizing, IntroMixState::CrossfadeMix, IntroMixState::Done]
        );
        assert_eq!(out.pcm.frames(), (4.5 * SR as f64) as usize);
    }

    #[test]
    fn test_intro_double_failure_returns_main_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let intro = dir.path().join("intro.wav");
        io::write_wav(&intro, &tone(2.0, 0.2)).unwrap();
        let tool = BrokenMixer(NativeTool::new(&settings()));
        let assembler = AudioAssembler::new(&tool, &settings());

        let main = tone(3.0, 0.1);
        let out = assembler.combine_intro(Some(&intro), main.clone());
        assert_eq!(out.resolved_by, IntroMixState::SpeechOnly);
        assert_eq!(
            out.trace,
            vec![
                IntroMixState::Normalizing,
                IntroMixState::CrossfadeMix,
                IntroMixState::FallbackConcat,
                IntroMixState::SpeechOnly,
                IntroMixState::Done,
            ]
        );
        assert_eq!(out.pcm, main);
    }

    #[test]
    fn test_unreadable_intro_goes_straight_to_speech_only() {
        let dir = tempfile::tempdir().unwrap();
        let tool = NativeTool::new(&settings());
        let assembler = AudioAssembler::new(&tool, &settings());
        let main = tone(1.0, 0.1);
        let out = assembler.combine_intro(Some(&dir.path().join("missing.mp3")), main.clone());
        assert_eq!(
            out.trace,
            vec![IntroMixState::Normalizing, IntroMixState::SpeechOnly, IntroMixState::Done]
        );
        assert_eq!(out.pcm, main);

        let none = assembler.combine_intro(None, main.clone());
        assert_eq!(none.pcm, main);
    }

    #[test]
    fn test_assemble_speech_joins_parts() {
        let tool = BrokenMixer(NativeTool::new(&settings()));
        let assembler = AudioAssembler::new(&tool, &settings());
        let pcm = assembler.assemble_speech(&[wav(1.0, 0.1), wav(0.5, 0.1)]).unwrap();
        assert_eq!(pcm.frames(), (1.5 * SR as f64) as usize);
        assert!(assembler.assemble_speech(&[]).is_err());
    }
}
