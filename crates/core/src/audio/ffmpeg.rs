//! `ffmpeg`-backed [`AudioTool`].
//!
//! Every call writes its inputs to a temp dir, runs one `ffmpeg` child and
//! reads the result back. A child that outlives the configured timeout is
//! killed so a hung process cannot stall the run.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use super::io::{self, Pcm};
use super::tool::AudioTool;
use crate::config::AudioSettings;

#[derive(Debug, Clone)]
pub struct FfmpegTool {
    binary: PathBuf,
    sample_rate: u32,
    channels: u16,
    mp3_bitrate_kbps: u32,
    timeout: Duration,
}

impl FfmpegTool {
    pub fn new(settings: &AudioSettings) -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            mp3_bitrate_kbps: settings.mp3_bitrate_kbps,
            timeout: Duration::from_secs(settings.process_timeout_secs.max(1)),
        }
    }

    /// Use a specific executable instead of `ffmpeg` from PATH.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"]).args(args);
        run_with_timeout(cmd, self.timeout)
    }

    /// Read raw s16le output in the common format.
    fn read_raw(&self, path: &Path) -> Result<Pcm> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read ffmpeg output: {}", path.display()))?;
        let n = self.channels.max(1) as usize;
        let mut channels = vec![Vec::with_capacity(bytes.len() / 2 / n); n];
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            channels[i % n].push(v as f32 / 32768.0);
        }
        let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        for ch in channels.iter_mut() {
            ch.truncate(frames);
        }
        Ok(Pcm::new(self.sample_rate, channels))
    }

    fn format_args(&self) -> Vec<String> {
        vec![
            "-ar".into(),
            self.sample_rate.to_string(),
            "-ac".into(),
            self.channels.to_string(),
        ]
    }

    /// Run a filter graph over WAV copies of `inputs`, returning PCM.
    fn filter(&self, inputs: &[&Pcm], graph: &str) -> Result<Pcm> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let mut args = Vec::new();
        for (i, pcm) in inputs.iter().enumerate() {
            let path = dir.path().join(format!("in_{}.wav", i));
            io::write_wav(&path, pcm)?;
            args.push("-i".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        let out = dir.path().join("out.raw");
        args.extend([
            "-filter_complex".to_string(),
            graph.to_string(),
            "-map".to_string(),
            "[out]".to_string(),
        ]);
        args.extend(self.format_args());
        args.extend(raw_output_args(&out));
        self.run(&args)?;
        self.read_raw(&out)
    }
}

fn raw_output_args(out: &Path) -> Vec<String> {
    vec![
        "-f".into(),
        "s16le".into(),
        "-acodec".into(),
        "pcm_s16le".into(),
        out.to_string_lossy().into_owned(),
    ]
}

impl AudioTool for FfmpegTool {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn normalize(&self, bytes: &[u8], hint: Option<&str>) -> Result<Pcm> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let input = dir.path().join(format!("in.{}", hint.unwrap_or("bin")));
        std::fs::write(&input, bytes)?;
        let out = dir.path().join("out.raw");

        let mut args = vec!["-i".to_string(), input.to_string_lossy().into_owned()];
        args.extend(self.format_args());
        args.extend(raw_output_args(&out));
        self.run(&args)?;

        let pcm = self.read_raw(&out)?;
        if pcm.is_empty() {
            bail!("ffmpeg produced no audio");
        }
        Ok(pcm)
    }

    fn concat(&self, parts: &[Pcm]) -> Result<Pcm> {
        let parts: Vec<&Pcm> = parts.iter().filter(|p| !p.is_empty()).collect();
        match parts.len() {
            0 => return Ok(Pcm::empty(self.sample_rate, self.channels)),
            1 => return Ok(parts[0].clone()),
            _ => {}
        }
        let labels: String = (0..parts.len()).map(|i| format!("[{}:a]", i)).collect();
        let graph = format!("{}concat=n={}:v=0:a=1[out]", labels, parts.len());
        self.filter(&parts, &graph)
    }

    fn crossfade_concat(&self, a: &Pcm, b: &Pcm, secs: f64) -> Result<Pcm> {
        let graph = format!("[0:a][1:a]acrossfade=d={:.3}:c1=tri:c2=tri[out]", secs);
        self.filter(&[a, b], &graph)
    }

    fn encode(&self, pcm: &Pcm, path: &Path) -> Result<()> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let input = dir.path().join("in.wav");
        io::write_wav(&input, pcm)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let is_mp3 = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("mp3"))
            .unwrap_or(false);
        let mut args = vec!["-i".to_string(), input.to_string_lossy().into_owned()];
        if is_mp3 {
            args.extend([
                "-codec:a".to_string(),
                "libmp3lame".to_string(),
                "-b:a".to_string(),
                format!("{}k", self.mp3_bitrate_kbps),
            ]);
        } else {
            args.extend(["-codec:a".to_string(), "pcm_s16le".to_string()]);
        }
        args.push(path.to_string_lossy().into_owned());
        self.run(&args)
            .with_context(|| format!("Failed to encode {}", path.display()))
    }
}

/// Keep at most this much of a failed child's stderr in the error.
const STDERR_TAIL_BYTES: usize = 4096;

/// Run a command to completion, killing it after `timeout`.
///
/// Stderr goes to an unnamed temp file, so a chatty child never blocks
/// on a full pipe.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<()> {
    use std::io::{Read, Seek, SeekFrom};

    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut stderr_file = tempfile::tempfile().context("Failed to create stderr capture file")?;
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr_file.try_clone()?))
        .spawn()
        .with_context(|| format!("Failed to start {}", program))?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            child.kill().ok();
            child.wait().ok();
            bail!("{} timed out after {:?}", program, timeout);
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    if !status.success() {
        let mut captured = Vec::new();
        stderr_file.seek(SeekFrom::Start(0))?;
        stderr_file.read_to_end(&mut captured)?;
        let tail = &captured[captured.len().saturating_sub(STDERR_TAIL_BYTES)..];
        bail!(
            "{} failed ({}): {}",
            program,
            status,
            String::from_utf8_lossy(tail).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_an_error() {
        let tool = FfmpegTool::new(&AudioSettings::default())
            .with_binary("/nonexistent/ffmpeg-binary");
        let wav = io::wav_bytes(&Pcm::silence(44_100, 2, 0.1)).unwrap();
        assert!(tool.normalize(&wav, Some("wav")).is_err());
        assert!(tool
            .crossfade_concat(&Pcm::silence(44_100, 2, 1.0), &Pcm::silence(44_100, 2, 1.0), 0.5)
            .is_err());
    }

    #[test]
    fn test_concat_trivial_cases_skip_process() {
        let tool = FfmpegTool::new(&AudioSettings::default())
            .with_binary("/nonexistent/ffmpeg-binary");
        assert!(tool.concat(&[]).unwrap().is_empty());
        let one = Pcm::silence(44_100, 2, 0.2);
        assert_eq!(tool.concat(&[one.clone(), Pcm::empty(44_100, 2)]).unwrap(), one);
    }

    #[test]
    fn test_read_raw_deinterleaves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.raw");
        let samples: [i16; 4] = [16384, -16384, 0, 8192];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();

        let tool = FfmpegTool::new(&AudioSettings::default());
        let pcm = tool.read_raw(&path).unwrap();
        assert_eq!(pcm.frames(), 2);
        assert_eq!(pcm.channels[0], vec![0.5, 0.0]);
        assert_eq!(pcm.channels[1], vec![-0.5, 0.25]);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_kills_hung_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let err = run_with_timeout(cmd, Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_survives_large_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "head -c 1000000 /dev/zero | tr '\\0' x >&2"]);
        let started = Instant::now();
        run_with_timeout(cmd, Duration::from_secs(10)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_reports_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);
        let err = run_with_timeout(cmd, Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
