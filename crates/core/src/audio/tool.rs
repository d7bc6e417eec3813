//! The narrow audio-processing interface the assembler talks to.
//!
//! Two backends: [`NativeTool`] does everything in-process, and
//! [`super::ffmpeg::FfmpegTool`] shells out to `ffmpeg` with a timeout.

use std::path::Path;

use anyhow::{bail, Result};

use super::effects;
use super::ffmpeg::FfmpegTool;
use super::io::{self, Pcm};
use crate::config::AudioSettings;

/// Audio backend used for normalization, joining and encoding.
pub trait AudioTool: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Decode any supported encoding to the common format.
    fn normalize(&self, bytes: &[u8], hint: Option<&str>) -> Result<Pcm>;

    /// Plain back-to-back join.
    fn concat(&self, parts: &[Pcm]) -> Result<Pcm>;

    /// Join two clips with an overlapping fade of `secs` seconds.
    fn crossfade_concat(&self, a: &Pcm, b: &Pcm, secs: f64) -> Result<Pcm>;

    /// Write the final file; the codec follows the path's extension.
    fn encode(&self, pcm: &Pcm, path: &Path) -> Result<()>;
}

/// In-process backend: symphonia, rubato, hound and LAME.
#[derive(Debug, Clone)]
pub struct NativeTool {
    sample_rate: u32,
    channels: u16,
    mp3_bitrate_kbps: u32,
}

impl NativeTool {
    pub fn new(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            mp3_bitrate_kbps: settings.mp3_bitrate_kbps,
        }
    }
}

impl Default for NativeTool {
    fn default() -> Self {
        Self::new(&AudioSettings::default())
    }
}

impl AudioTool for NativeTool {
    fn name(&self) -> &str {
        "native"
    }

    fn normalize(&self, bytes: &[u8], hint: Option<&str>) -> Result<Pcm> {
        let decoded = io::decode_bytes(bytes, hint)?;
        io::conform(&decoded, self.sample_rate, self.channels)
    }

    fn concat(&self, parts: &[Pcm]) -> Result<Pcm> {
        if parts.is_empty() {
            return Ok(Pcm::empty(self.sample_rate, self.channels));
        }
        effects::concatenate(parts, 0)
    }

    fn crossfade_concat(&self, a: &Pcm, b: &Pcm, secs: f64) -> Result<Pcm> {
        effects::crossfade(a, b, secs)
    }

    fn encode(&self, pcm: &Pcm, path: &Path) -> Result<()> {
        write_encoded(pcm, path, self.mp3_bitrate_kbps)
    }
}

/// Encode by extension: `.mp3` through LAME, anything else as WAV.
pub(crate) fn write_encoded(pcm: &Pcm, path: &Path, bitrate_kbps: u32) -> Result<()> {
    let is_mp3 = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false);
    if !is_mp3 {
        return io::write_wav(path, pcm);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = io::encode_mp3(pcm, bitrate_kbps)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Check if ffmpeg is available on the system.
pub fn ffmpeg_available() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Get an audio backend by name.
///
/// Modes:
/// - "native": in-process decoding, mixing and encoding.
/// - "ffmpeg": every operation runs through an `ffmpeg` child process.
/// - "auto": ffmpeg when installed, otherwise native.
pub fn get_audio_tool(name: &str, settings: &AudioSettings) -> Result<Box<dyn AudioTool>> {
    match name {
        "auto" => {
            if ffmpeg_available() {
                log::info!("Auto-detected ffmpeg, using ffmpeg audio backend");
                Ok(Box::new(FfmpegTool::new(settings)))
            } else {
                log::info!("ffmpeg not available, using native audio backend");
                Ok(Box::new(NativeTool::new(settings)))
            }
        }
        "native" => Ok(Box::new(NativeTool::new(settings))),
        "ffmpeg" => Ok(Box::new(FfmpegTool::new(settings))),
        _ => bail!("Unknown audio backend: '{}'. Available: native, ffmpeg, auto", name),
    }
}
