use anyhow::Result;

use super::{DialogueInput, DialogueProvider, SpeechProvider, SynthesisError};
use crate::script::parser::strip_markers;
use crate::script::ChunkPlan;

/// Renders a chunk plan, one provider call per chunk.
///
/// Chunks are sent strictly in plan order and the first failure aborts the
/// whole run: partially synthesized episodes are never returned.
pub struct DialogueSynthesizer<'a> {
    provider: &'a dyn DialogueProvider,
}

impl<'a> DialogueSynthesizer<'a> {
    pub fn new(provider: &'a dyn DialogueProvider) -> Self {
        Self { provider }
    }

    pub fn synthesize(&self, plan: &ChunkPlan) -> Result<Vec<Vec<u8>>, SynthesisError> {
        let total = plan.chunks.len();
        if total == 0 {
            return Err(SynthesisError::NoInput);
        }

        let mut audio = Vec::with_capacity(total);
        for (index, chunk) in plan.chunks.iter().enumerate() {
            let inputs: Vec<DialogueInput> = chunk
                .iter()
                .map(|unit| DialogueInput {
                    text: unit.text.clone(),
                    voice_id: unit.voice_id.clone(),
                })
                .collect();
            log::info!(
                "Synthesizing chunk {}/{} ({} lines, {} chars) via {}",
                index + 1,
                total,
                inputs.len(),
                plan.chunk_chars(index),
                self.provider.name()
            );

            let bytes = self
                .provider
                .synthesize_dialogue(&inputs)
                .map_err(|e| SynthesisError::Chunk {
                    index,
                    total,
                    message: format!("{:#}", e),
                })?;
            if bytes.is_empty() {
                return Err(SynthesisError::EmptyAudio { index });
            }
            log::debug!("Chunk {} returned {} bytes", index, bytes.len());
            audio.push(bytes);
        }
        Ok(audio)
    }
}

/// Single-voice path for scripts that are not in dialogue form.
pub struct SingleVoiceSynthesizer<'a> {
    provider: &'a dyn SpeechProvider,
    voice_id: String,
    max_chars: usize,
}

impl<'a> SingleVoiceSynthesizer<'a> {
    pub fn new(provider: &'a dyn SpeechProvider, voice_id: &str, max_chars: usize) -> Self {
        Self {
            provider,
            voice_id: voice_id.to_string(),
            max_chars: max_chars.max(1),
        }
    }

    /// Markers are removed before splitting; music is not placed on this path.
    pub fn synthesize(&self, script: &str) -> Result<Vec<Vec<u8>>, SynthesisError> {
        let text = strip_markers(script);
        let parts = split_into_chunks(&text, self.max_chars);
        if parts.is_empty() {
            return Err(SynthesisError::NoInput);
        }

        let total = parts.len();
        let mut audio = Vec::with_capacity(total);
        for (index, part) in parts.iter().enumerate() {
            log::info!(
                "Synthesizing speech part {}/{} ({} chars)",
                index + 1,
                total,
                part.chars().count()
            );
            let bytes = self
                .provider
                .synthesize_speech(part, &self.voice_id)
                .map_err(|e| SynthesisError::Speech {
                    index,
                    total,
                    message: format!("{:#}", e),
                })?;
            if bytes.is_empty() {
                return Err(SynthesisError::EmptyAudio { index });
            }
            audio.push(bytes);
        }
        Ok(audio)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn flush(current: &mut String, chunks: &mut Vec<String>) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

/// Split text at sentence boundaries into pieces of at most `max_chars`
/// characters. Over-long sentences are split at commas; a single clause
/// longer than the budget stays whole.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if char_len(&current) + char_len(sentence) > max_chars {
            flush(&mut current, &mut chunks);

            if char_len(sentence) > max_chars {
                for part in sentence.split_inclusive(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        continue;
                    }
                    if char_len(&current) + char_len(part) > max_chars {
                        flush(&mut current, &mut chunks);
                    }
                    current.push_str(part);
                    current.push(' ');
                }
                continue;
            }
        }
        current.push_str(sentence);
        current.push(' ');
    }
    flush(&mut current, &mut chunks);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{DialogueChunker, ScriptParser};
    use anyhow::bail;
    use std::sync::Mutex;

    struct Recorder {
        calls: Mutex<Vec<Vec<DialogueInput>>>,
        fail_at: Option<usize>,
    }

    impl Recorder {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_at,
            }
        }
    }

    impl DialogueProvider for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn synthesize_dialogue(&self, inputs: &[DialogueInput]) -> Result<Vec<u8>> {
            let mut calls = self.calls.lock().unwrap();
            if Some(calls.len()) == self.fail_at {
                bail!("quota exceeded");
            }
            calls.push(inputs.to_vec());
            Ok(vec![calls.len() as u8; 4])
        }
    }

    struct Speaker;

    impl SpeechProvider for Speaker {
        fn name(&self) -> &str {
            "speaker"
        }

        fn synthesize_speech(&self, text: &str, _voice_id: &str) -> Result<Vec<u8>> {
            Ok(text.as_bytes().to_vec())
        }
    }

    fn plan(script: &str, max_chars: usize) -> ChunkPlan {
        let parser = ScriptParser::new(["Anna", "Erik"]);
        DialogueChunker::new(max_chars)
            .with_voice("Anna", "voice-a")
            .with_voice("Erik", "voice-e")
            .chunk(&parser.parse(script))
    }

    #[test]
    fn test_chunks_sent_in_order_with_voices() {
        let p = plan("Anna: Hej!\n[MUSIK: a1b2c3d4]\nErik: God morgon!", 1000);
        let provider = Recorder::new(None);
        let audio = DialogueSynthesizer::new(&provider).synthesize(&p).unwrap();

        assert_eq!(audio, vec![vec![1; 4], vec![2; 4]]);
        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0][0].voice_id, "voice-a");
        assert_eq!(calls[0][0].text, "Hej!");
        assert_eq!(calls[1][0].voice_id, "voice-e");
    }

    #[test]
    fn test_failure_aborts_with_chunk_index() {
        let p = plan("Anna: Ett.\n[MUSIK: a1b2c3d4]\nErik: Två.\n[MUSIK: a1b2c3d4]\nAnna: Tre.", 1000);
        let provider = Recorder::new(Some(1));
        let err = DialogueSynthesizer::new(&provider).synthesize(&p).unwrap_err();

        match err {
            SynthesisError::Chunk { index, total, message } => {
                assert_eq!(index, 1);
                assert_eq!(total, 3);
                assert!(message.contains("quota"));
            }
            other => panic!("unexpected error: {}", other),
        }
        // Nothing after the failing chunk is attempted.
        assert_eq!(provider.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_plan_is_an_error() {
        let provider = Recorder::new(None);
        let err = DialogueSynthesizer::new(&provider)
            .synthesize(&ChunkPlan::default())
            .unwrap_err();
        assert!(matches!(err, SynthesisError::NoInput));
    }

    #[test]
    fn test_single_voice_strips_markers_and_splits() {
        let provider = Speaker;
        let synth = SingleVoiceSynthesizer::new(&provider, "v", 20);
        let audio = synth
            .synthesize("God morgon allihop. [MUSIK: a1b2c3d4] Idag blir det sol.")
            .unwrap();
        let texts: Vec<String> = audio
            .into_iter()
            .map(|b| String::from_utf8(b).unwrap())
            .collect();
        assert_eq!(texts, vec!["God morgon allihop.", "Idag blir det sol."]);
    }

    #[test]
    fn test_single_voice_empty_script() {
        let provider = Speaker;
        let synth = SingleVoiceSynthesizer::new(&provider, "v", 100);
        assert!(matches!(synth.synthesize("   \n"), Err(SynthesisError::NoInput)));
    }

    #[test]
    fn test_split_into_chunks_respects_budget() {
        let text = "Första meningen här. Andra meningen. Tredje!";
        let chunks = split_into_chunks(text, 25);
        assert_eq!(chunks, vec!["Första meningen här.", "Andra meningen. Tredje!"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 25));
    }

    #[test]
    fn test_split_long_sentence_at_commas() {
        let text = "Ett, två, tre, fyra, fem, sex.";
        let chunks = split_into_chunks(text, 10);
        assert_eq!(chunks, vec!["Ett, två,", "tre, fyra,", "fem, sex."]);
    }

    #[test]
    fn test_split_counts_characters_not_bytes() {
        // 10 characters, 13 bytes.
        let chunks = split_into_chunks("Åäö åäö å.", 10);
        assert_eq!(chunks.len(), 1);
    }
}
