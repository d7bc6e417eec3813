//! Audio processing: the common PCM format, effects, backends and the
//! episode assembler.

pub mod assembler;
pub mod effects;
pub mod ffmpeg;
pub mod io;
pub mod tool;

pub use assembler::{AudioAssembler, IntroMixState};
pub use io::Pcm;
pub use tool::{get_audio_tool, AudioTool, NativeTool};
