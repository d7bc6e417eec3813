//! Packs dialogue turns into provider-sized chunks.
//!
//! Chunks never straddle a music cue: every cue position in the dialogue
//! stream forces a chunk break, so the music can be played between two
//! synthesized chunks without cutting a request in half.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{PodcastConfig, DEFAULT_VOICE_ID};
use crate::types::{DialogueUnit, MusicCue, Segment};

/// Result of chunking one script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPlan {
    /// Non-empty chunks in script order.
    pub chunks: Vec<Vec<DialogueUnit>>,
    /// Every music cue in script order; `cues[i].ordinal == i`.
    pub cues: Vec<MusicCue>,
    /// Cue ordinals that play before the first chunk.
    pub leading: Vec<usize>,
    /// Chunk index to the cue ordinals that play right after it.
    pub after_chunk: BTreeMap<usize, Vec<usize>>,
}

impl ChunkPlan {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn unit_count(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    /// All units in order, flattened across chunks.
    pub fn units(&self) -> impl Iterator<Item = &DialogueUnit> {
        self.chunks.iter().flatten()
    }

    /// Chunk index to the dialogue-stream positions of its music breaks.
    pub fn music_positions(&self) -> BTreeMap<usize, Vec<usize>> {
        self.after_chunk
            .iter()
            .map(|(chunk, ordinals)| {
                let positions = ordinals.iter().map(|&o| self.cues[o].position).collect();
                (*chunk, positions)
            })
            .collect()
    }

    /// Character count of one chunk.
    pub fn chunk_chars(&self, index: usize) -> usize {
        self.chunks
            .get(index)
            .map(|c| c.iter().map(|u| u.char_len()).sum())
            .unwrap_or(0)
    }
}

/// Splits a segment stream into chunks under a soft character budget.
#[derive(Debug, Clone)]
pub struct DialogueChunker {
    max_chars: usize,
    /// Lowercased speaker name to voice.
    voices: HashMap<String, String>,
    default_voice: String,
}

impl DialogueChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            voices: HashMap::new(),
            default_voice: DEFAULT_VOICE_ID.to_string(),
        }
    }

    pub fn from_config(config: &PodcastConfig) -> Self {
        let mut chunker = Self::new(config.chunking.max_chars);
        for host in &config.hosts {
            chunker = chunker.with_voice(&host.name, config.voice_for(&host.name));
        }
        chunker.default_voice = config.providers.default_voice_id.clone();
        chunker
    }

    pub fn with_voice(mut self, speaker: &str, voice_id: &str) -> Self {
        self.voices
            .insert(speaker.to_lowercase(), voice_id.to_string());
        self
    }

    fn voice_for(&self, speaker: &str) -> String {
        self.voices
            .get(&speaker.to_lowercase())
            .cloned()
            .unwrap_or_else(|| self.default_voice.clone())
    }

    pub fn chunk(&self, segments: &[Segment]) -> ChunkPlan {
        // Dialogue-only stream plus the position each cue breaks at.
        let mut units = Vec::new();
        let mut cues = Vec::new();
        for segment in segments {
            match segment {
                Segment::Dialogue(d) => units.push(DialogueUnit {
                    position: units.len(),
                    speaker: d.speaker.clone(),
                    voice_id: self.voice_for(&d.speaker),
                    text: d.text.clone(),
                }),
                Segment::Music(m) => cues.push(MusicCue {
                    ordinal: cues.len(),
                    position: units.len(),
                    segment: m.clone(),
                }),
            }
        }
        let forced: BTreeSet<usize> = cues.iter().map(|c| c.position).collect();

        let mut chunks: Vec<Vec<DialogueUnit>> = Vec::new();
        let mut current: Vec<DialogueUnit> = Vec::new();
        let mut current_chars = 0usize;
        for unit in units {
            let len = unit.char_len();
            let over_budget = current_chars + len > self.max_chars;
            if !current.is_empty() && (forced.contains(&unit.position) || over_budget) {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            if len > self.max_chars {
                log::debug!(
                    "Dialogue unit {} is {} chars, over the {} budget; keeping it whole",
                    unit.position,
                    len,
                    self.max_chars
                );
            }
            current_chars += len;
            current.push(unit);
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        // Chunk i covers positions start..=end; a cue at p belongs after the
        // chunk whose range satisfies start < p <= end + 1.
        let ends: Vec<usize> = chunks
            .iter()
            .filter_map(|c| c.last().map(|u| u.position))
            .collect();
        let mut leading = Vec::new();
        let mut after_chunk: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for cue in &cues {
            if cue.position == 0 || chunks.is_empty() {
                leading.push(cue.ordinal);
                continue;
            }
            let index = ends
                .iter()
                .position(|&end| cue.position <= end + 1)
                .unwrap_or(chunks.len() - 1);
            after_chunk.entry(index).or_default().push(cue.ordinal);
        }

        log::debug!(
            "Chunked {} dialogue units into {} chunks with {} music cues",
            ends.last().map(|e| e + 1).unwrap_or(0),
            chunks.len(),
            cues.len()
        );

        ChunkPlan {
            chunks,
            cues,
            leading,
            after_chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptParser;
    use crate::types::{MusicSegment, TrackRef};

    fn music(id: &str) -> Segment {
        Segment::Music(MusicSegment {
            raw_marker: format!("[MUSIK: {}]", id),
            track_ref: TrackRef::Id(id.to_string()),
            duration: None,
        })
    }

    fn texts(plan: &ChunkPlan) -> Vec<Vec<String>> {
        plan.chunks
            .iter()
            .map(|c| c.iter().map(|u| u.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_music_splits_short_script() {
        let parser = ScriptParser::new(["Anna", "Erik"]);
        let segments = parser.parse("Anna: Hej!\n[MUSIK: a1b2c3d4]\nErik: God morgon!");
        let plan = DialogueChunker::new(1000).chunk(&segments);

        assert_eq!(
            texts(&plan),
            vec![vec!["Anna: Hej!".to_string()], vec!["Erik: God morgon!".to_string()]]
        );
        assert!(plan.leading.is_empty());
        assert_eq!(plan.after_chunk.get(&0), Some(&vec![0]));
        assert_eq!(plan.music_positions().get(&0), Some(&vec![1]));
    }

    #[test]
    fn test_oversized_unit_gets_own_chunk() {
        let segments = vec![
            Segment::dialogue("Anna", "kort"),
            Segment::dialogue("Erik", "tjugo tecken långt!!"),
            Segment::dialogue("Anna", "ok"),
        ];
        let plan = DialogueChunker::new(10).chunk(&segments);
        assert_eq!(plan.chunks.len(), 3);
        assert_eq!(plan.chunks[1].len(), 1);
        assert_eq!(plan.chunks[1][0].char_len(), 20);
        assert_eq!(plan.chunks[1][0].text, "tjugo tecken långt!!");
    }

    #[test]
    fn test_greedy_packing_under_budget() {
        let segments: Vec<Segment> = (0..6)
            .map(|i| Segment::dialogue(if i % 2 == 0 { "Anna" } else { "Erik" }, "abcde"))
            .collect();
        let plan = DialogueChunker::new(12).chunk(&segments);
        // 5 + 5 fits, a third would be 15.
        assert_eq!(plan.chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![2, 2, 2]);
        for i in 0..plan.chunks.len() {
            assert!(plan.chunk_chars(i) <= 12);
        }
    }

    #[test]
    fn test_leading_and_trailing_music() {
        let segments = vec![
            music("00000001"),
            Segment::dialogue("Anna", "Hej"),
            Segment::dialogue("Erik", "Hallå"),
            music("00000002"),
            music("00000003"),
        ];
        let plan = DialogueChunker::new(100).chunk(&segments);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.leading, vec![0]);
        assert_eq!(plan.after_chunk.get(&0), Some(&vec![1, 2]));
    }

    #[test]
    fn test_music_only_script_has_no_chunks() {
        let plan = DialogueChunker::new(100).chunk(&[music("00000001"), music("00000002")]);
        assert!(plan.is_empty());
        assert_eq!(plan.leading, vec![0, 1]);
    }

    #[test]
    fn test_concatenation_preserves_order_and_breaks() {
        let mut segments = Vec::new();
        for i in 0..40 {
            let speaker = if i % 2 == 0 { "Anna" } else { "Erik" };
            segments.push(Segment::dialogue(speaker, &"x".repeat(7 + (i * 13) % 31)));
            if i % 7 == 3 {
                segments.push(music("abcdef01"));
            }
        }
        let expected: Vec<String> = segments
            .iter()
            .filter_map(|s| s.as_dialogue())
            .map(|d| d.text.clone())
            .collect();

        for budget in [1, 10, 50, 200, 10_000] {
            let plan = DialogueChunker::new(budget).chunk(&segments);
            let got: Vec<String> = plan.units().map(|u| u.text.clone()).collect();
            assert_eq!(got, expected, "budget {}", budget);

            let positions: Vec<usize> = plan.units().map(|u| u.position).collect();
            assert_eq!(positions, (0..expected.len()).collect::<Vec<_>>());

            // Every forced break starts a chunk.
            let starts: BTreeSet<usize> = plan.chunks.iter().map(|c| c[0].position).collect();
            for cue in &plan.cues {
                if cue.position > 0 && cue.position < expected.len() {
                    assert!(starts.contains(&cue.position), "budget {}", budget);
                }
            }
        }
    }

    #[test]
    fn test_voices_follow_config() {
        let config = PodcastConfig::with_default_hosts();
        let chunker = DialogueChunker::from_config(&config);
        let plan = chunker.chunk(&[Segment::dialogue("Erik", "Hej"), Segment::dialogue("Anna", "Hej")]);
        assert_eq!(plan.chunks[0][0].voice_id, config.voice_for("Erik"));
        assert_eq!(plan.chunks[0][1].voice_id, config.voice_for("Anna"));
    }
}
