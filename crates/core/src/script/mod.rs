//! Script text to segment stream to provider chunks.

pub mod chunker;
pub mod parser;

pub use chunker::{ChunkPlan, DialogueChunker};
pub use parser::{parse_track_ref, strip_markers, ScriptParser};
