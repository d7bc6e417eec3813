//! Text-to-speech providers and the chunk synthesis discipline.

pub mod dialogue;
pub mod elevenlabs;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;

pub use dialogue::{split_into_chunks, DialogueSynthesizer, SingleVoiceSynthesizer};
pub use elevenlabs::ElevenLabsClient;

/// One line of a dialogue request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogueInput {
    pub text: String,
    pub voice_id: String,
}

/// Multi-voice provider: one call renders a whole chunk.
pub trait DialogueProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Encoded audio (typically MP3) for the given lines, in order.
    fn synthesize_dialogue(&self, inputs: &[DialogueInput]) -> Result<Vec<u8>>;
}

/// Single-voice provider used for the intro and non-dialogue scripts.
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    fn synthesize_speech(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;
}

/// Fatal synthesis failures. Any of these aborts the episode's audio stage.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Dialogue synthesis failed for chunk {index} of {total}: {message}")]
    Chunk {
        index: usize,
        total: usize,
        message: String,
    },

    #[error("Speech synthesis failed for part {index} of {total}: {message}")]
    Speech {
        index: usize,
        total: usize,
        message: String,
    },

    #[error("Provider returned no audio for chunk {index}")]
    EmptyAudio { index: usize },

    #[error("Nothing to synthesize")]
    NoInput,
}
