//! Audio I/O: decoding, the common PCM format, WAV and MP3 output.

use std::io::{Cursor, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Planar float PCM in [-1, 1]. Every buffer is brought to one of these
/// (same rate, same channel count) before anything is joined or mixed.
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub sample_rate: u32,
    /// One `Vec` per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl Pcm {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// `channel_count` copies of a mono signal.
    pub fn from_mono(sample_rate: u32, samples: Vec<f32>, channel_count: u16) -> Self {
        let n = channel_count.max(1) as usize;
        Self::new(sample_rate, vec![samples; n])
    }

    pub fn silence(sample_rate: u32, channel_count: u16, secs: f64) -> Self {
        let frames = (secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::from_mono(sample_rate, vec![0.0; frames], channel_count)
    }

    /// Zero frames, right format.
    pub fn empty(sample_rate: u32, channel_count: u16) -> Self {
        Self::silence(sample_rate, channel_count, 0.0)
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn same_format(&self, other: &Pcm) -> bool {
        self.sample_rate == other.sample_rate && self.channels.len() == other.channels.len()
    }

    /// Seconds to a frame count at this rate.
    pub fn frames_for(&self, secs: f64) -> usize {
        (secs.max(0.0) * self.sample_rate as f64).round() as usize
    }

    /// Interleaved 16-bit samples, clipped.
    pub fn to_i16_interleaved(&self) -> Vec<i16> {
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for ch in &self.channels {
                out.push(to_i16(ch[i]));
            }
        }
        out
    }

    fn from_interleaved(sample_rate: u32, channel_count: usize, data: &[f32]) -> Self {
        let n = channel_count.max(1);
        let frames = data.len() / n;
        let mut channels = vec![Vec::with_capacity(frames); n];
        for frame in data.chunks_exact(n) {
            for (ch, &s) in channels.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        Self::new(sample_rate, channels)
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Guess a container extension from magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some("wav"),
        [b'I', b'D', b'3', ..] => Some("mp3"),
        [0xFF, b, ..] if b & 0xE0 == 0xE0 => Some("mp3"),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some("m4a"),
        _ => None,
    }
}

/// Decode any supported container (WAV, MP3, MP4/AAC) from memory.
///
/// `hint` is a file extension such as `"mp3"`.
pub fn decode_bytes(bytes: &[u8], hint: Option<&str>) -> Result<Pcm> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_MP3, CODEC_TYPE_NULL};
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    if bytes.is_empty() {
        bail!("Cannot decode empty audio buffer");
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut probe_hint = Hint::new();
    if let Some(ext) = hint {
        probe_hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &probe_hint,
            mss,
            &gapless_options(),
            &MetadataOptions::default(),
        )
        .context("Unsupported audio format")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut channel_count = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    // Tagged MP3s are trimmed by the demuxer; untagged ones still carry the delay.
    let untrimmed_mp3 =
        track.codec_params.codec == CODEC_TYPE_MP3 && track.codec_params.delay.is_none();

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channel_count = spec.channels.count();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            Err(SymphError::DecodeError(e)) => {
                log::debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if untrimmed_mp3 {
        let skip = (MP3_DEFAULT_DELAY * channel_count).min(interleaved.len());
        interleaved.drain(..skip);
    }
    if interleaved.is_empty() {
        bail!("No audio decoded");
    }
    Ok(Pcm::from_interleaved(sample_rate, channel_count, &interleaved))
}

/// LAME encoder delay (576) plus the MP3 decoder delay (529), in frames.
pub const MP3_DEFAULT_DELAY: usize = 576 + 529;

fn gapless_options() -> symphonia::core::formats::FormatOptions {
    symphonia::core::formats::FormatOptions {
        enable_gapless: true,
        ..Default::default()
    }
}

/// Decode a file, using its extension as the format hint.
pub fn decode_file(path: &Path) -> Result<Pcm> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read: {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str());
    decode_bytes(&bytes, ext).with_context(|| format!("Failed to decode: {}", path.display()))
}

/// Duration of an audio file in seconds.
///
/// Uses the container's frame count when present, otherwise decodes.
pub fn probe_duration(path: &Path) -> Result<f64> {
    use symphonia::core::codecs::CODEC_TYPE_NULL;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &gapless_options(), &MetadataOptions::default())
        .with_context(|| format!("Unsupported format: {}", path.display()))?;

    let known = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .and_then(|t| Some((t.codec_params.n_frames?, t.codec_params.sample_rate?)));
    match known {
        Some((frames, rate)) if rate > 0 => Ok(frames as f64 / rate as f64),
        _ => Ok(decode_file(path)?.duration_secs()),
    }
}

/// Resample every channel to `to_sr`.
///
/// Uses rubato for high-quality resampling.
pub fn resample(pcm: &Pcm, to_sr: u32) -> Result<Pcm> {
    if pcm.sample_rate == to_sr || pcm.is_empty() {
        return Ok(Pcm::new(to_sr, pcm.channels.clone()));
    }

    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
        WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_sr as f64 / pcm.sample_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0,
        params,
        pcm.frames(),
        pcm.channels.len(),
    )?;
    let output = resampler.process(&pcm.channels, None)?;
    Ok(Pcm::new(to_sr, output))
}

/// Up- or down-mix to `target` channels.
pub fn remix(pcm: &Pcm, target: u16) -> Pcm {
    let target = target.max(1) as usize;
    let current = pcm.channels.len();
    if current == target {
        return pcm.clone();
    }
    if current == 1 {
        return Pcm::new(pcm.sample_rate, vec![pcm.channels[0].clone(); target]);
    }
    // Average down to mono, then fan out.
    let frames = pcm.frames();
    let mut mono = vec![0.0f32; frames];
    for ch in &pcm.channels {
        for (m, s) in mono.iter_mut().zip(ch) {
            *m += *s;
        }
    }
    let scale = 1.0 / current as f32;
    for m in mono.iter_mut() {
        *m *= scale;
    }
    Pcm::new(pcm.sample_rate, vec![mono; target])
}

/// Bring a buffer to the common rate and channel count.
pub fn conform(pcm: &Pcm, sample_rate: u32, channels: u16) -> Result<Pcm> {
    let resampled = resample(pcm, sample_rate)?;
    Ok(remix(&resampled, channels))
}

fn wav_spec(pcm: &Pcm) -> WavSpec {
    WavSpec {
        channels: pcm.channel_count().max(1),
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Write 16-bit PCM WAV to any seekable writer.
pub fn write_wav_to<W: Write + Seek>(writer: W, pcm: &Pcm) -> Result<()> {
    let mut wav = WavWriter::new(writer, wav_spec(pcm)).context("Failed to start WAV stream")?;
    for sample in pcm.to_i16_interleaved() {
        wav.write_sample(sample)?;
    }
    wav.finalize().context("Failed to finalize WAV stream")?;
    Ok(())
}

/// Write a 16-bit PCM WAV file. Creates parent directories if needed.
pub fn write_wav(path: &Path, pcm: &Pcm) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    write_wav_to(std::io::BufWriter::new(file), pcm)
        .with_context(|| format!("Failed to write WAV file: {}", path.display()))
}

/// In-memory WAV encoding.
pub fn wav_bytes(pcm: &Pcm) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_wav_to(&mut cursor, pcm)?;
    Ok(cursor.into_inner())
}

/// Read a WAV file, keeping every channel.
pub fn read_wav(path: &Path) -> Result<Pcm> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("Failed to read WAV samples")?
        }
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read WAV samples")?,
    };
    Ok(Pcm::from_interleaved(
        spec.sample_rate,
        spec.channels as usize,
        &samples,
    ))
}

fn lame_bitrate(kbps: u32) -> mp3lame_encoder::Bitrate {
    use mp3lame_encoder::Bitrate;
    match kbps {
        0..=64 => Bitrate::Kbps64,
        65..=96 => Bitrate::Kbps96,
        97..=128 => Bitrate::Kbps128,
        129..=160 => Bitrate::Kbps160,
        161..=192 => Bitrate::Kbps192,
        193..=256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

/// Encode to MP3 (mono or stereo) at a constant bitrate.
pub fn encode_mp3(pcm: &Pcm, bitrate_kbps: u32) -> Result<Vec<u8>> {
    use mp3lame_encoder::{Builder, FlushGap, InterleavedPcm, MonoPcm, Quality};

    let channels = pcm.channel_count();
    if !(1..=2).contains(&channels) {
        bail!("MP3 output needs 1 or 2 channels, got {}", channels);
    }

    let mut builder = Builder::new().context("Failed to create LAME encoder")?;
    builder
        .set_num_channels(channels as u8)
        .map_err(|e| anyhow!("LAME channels: {:?}", e))?;
    builder
        .set_sample_rate(pcm.sample_rate)
        .map_err(|e| anyhow!("LAME sample rate: {:?}", e))?;
    builder
        .set_brate(lame_bitrate(bitrate_kbps))
        .map_err(|e| anyhow!("LAME bitrate: {:?}", e))?;
    builder
        .set_quality(Quality::Best)
        .map_err(|e| anyhow!("LAME quality: {:?}", e))?;
    builder
        .set_to_write_vbr_tag(true)
        .map_err(|e| anyhow!("LAME info tag: {:?}", e))?;
    let mut encoder = builder
        .build()
        .map_err(|e| anyhow!("LAME init: {:?}", e))?;

    const BLOCK_FRAMES: usize = 1152 * 32;
    let samples = pcm.to_i16_interleaved();
    let step = BLOCK_FRAMES * channels as usize;
    let mut out = Vec::new();
    for block in samples.chunks(step) {
        let frames = block.len() / channels as usize;
        out.reserve(mp3lame_encoder::max_required_buffer_size(frames));
        let written = if channels == 2 {
            encoder.encode_to_vec(InterleavedPcm(block), &mut out)
        } else {
            encoder.encode_to_vec(MonoPcm(block), &mut out)
        };
        written.map_err(|e| anyhow!("MP3 encode failed: {:?}", e))?;
    }
    out.reserve(7200);
    encoder
        .flush_to_vec::<FlushGap>(&mut out)
        .map_err(|e| anyhow!("MP3 flush failed: {:?}", e))?;

    let mut tag = Vec::with_capacity(encoder.lame_tag_size());
    if encoder.lame_tag_encode_to_vec(&mut tag).is_some() {
        write_lame_tag(&mut out, &tag)?;
    }
    Ok(out)
}

/// Fill in the Info/LAME tag (delay, padding, frame count) over the
/// placeholder frame LAME writes at the start of the stream.
fn write_lame_tag(out: &mut [u8], tag: &[u8]) -> Result<()> {
    if out.len() < tag.len() {
        bail!("MP3 stream shorter than its info tag");
    }
    out[..tag.len()].copy_from_slice(tag);
    Ok(())
}
