//! Audio effects on [`Pcm`]: fades, trimming, concatenation with
//! crossfade, volume adjustment, mixing.

use anyhow::{bail, Result};

use super::io::Pcm;

/// Half-sine fade-in over the first `secs` seconds.
pub fn fade_in(pcm: &mut Pcm, secs: f64) {
    let n = pcm.frames_for(secs).min(pcm.frames());
    if n == 0 {
        return;
    }
    for ch in pcm.channels.iter_mut() {
        for (i, s) in ch.iter_mut().take(n).enumerate() {
            let t = i as f64 / n as f64;
            *s *= (t * std::f64::consts::FRAC_PI_2).sin() as f32;
        }
    }
}

/// Half-sine fade-out over the last `secs` seconds.
pub fn fade_out(pcm: &mut Pcm, secs: f64) {
    let n = pcm.frames_for(secs).min(pcm.frames());
    let start = pcm.frames() - n;
    fade_out_range(pcm, start, n);
}

/// Fade out over `secs` starting at `start_secs`; everything after the
/// fade is cut.
pub fn fade_out_at(pcm: &mut Pcm, start_secs: f64, secs: f64) {
    let start = pcm.frames_for(start_secs).min(pcm.frames());
    let n = pcm.frames_for(secs).min(pcm.frames() - start);
    truncate(pcm, start + n);
    fade_out_range(pcm, start, n);
}

fn fade_out_range(pcm: &mut Pcm, start: usize, n: usize) {
    if n == 0 {
        return;
    }
    for ch in pcm.channels.iter_mut() {
        for i in 0..n {
            let t = i as f64 / n as f64;
            ch[start + i] *= ((1.0 - t) * std::f64::consts::FRAC_PI_2).sin() as f32;
        }
    }
}

fn truncate(pcm: &mut Pcm, frames: usize) {
    for ch in pcm.channels.iter_mut() {
        ch.truncate(frames);
    }
}

/// Cut to at most `secs` seconds.
pub fn trim_to(pcm: &mut Pcm, secs: f64) {
    let frames = pcm.frames_for(secs);
    truncate(pcm, frames);
}

/// Extend with silence to at least `frames` frames.
pub fn pad_to(pcm: &mut Pcm, frames: usize) {
    for ch in pcm.channels.iter_mut() {
        if ch.len() < frames {
            ch.resize(frames, 0.0);
        }
    }
}

/// Concatenate clips, overlapping adjacent clips by `crossfade_frames`
/// with a linear crossfade. All clips must share one format.
pub fn concatenate(clips: &[Pcm], crossfade_frames: usize) -> Result<Pcm> {
    let Some(first) = clips.first() else {
        bail!("Nothing to concatenate");
    };
    if let Some(bad) = clips.iter().find(|c| !c.same_format(first)) {
        bail!(
            "Format mismatch: {} Hz x{} vs {} Hz x{}",
            first.sample_rate,
            first.channel_count(),
            bad.sample_rate,
            bad.channel_count()
        );
    }

    let total: usize = clips.iter().map(|c| c.frames()).sum();
    let mut result = Pcm::new(
        first.sample_rate,
        vec![Vec::with_capacity(total); first.channels.len()],
    );

    for clip in clips {
        let cf = crossfade_frames.min(result.frames()).min(clip.frames());
        let start = result.frames() - cf;
        for (out, src) in result.channels.iter_mut().zip(&clip.channels) {
            // Crossfade region: fade out result tail, fade in clip head
            for i in 0..cf {
                let t = i as f32 / cf as f32;
                out[start + i] = out[start + i] * (1.0 - t) + src[i] * t;
            }
            out.extend_from_slice(&src[cf..]);
        }
    }

    Ok(result)
}

/// Two-clip crossfade of `secs` seconds.
pub fn crossfade(a: &Pcm, b: &Pcm, secs: f64) -> Result<Pcm> {
    concatenate(&[a.clone(), b.clone()], a.frames_for(secs))
}

/// Adjust volume by dB amount. Modifies samples in place.
pub fn adjust_volume(pcm: &mut Pcm, db: f64) {
    if db.abs() < 0.01 {
        return;
    }
    let gain = 10.0f64.powf(db / 20.0) as f32;
    for ch in pcm.channels.iter_mut() {
        for s in ch.iter_mut() {
            *s *= gain;
        }
    }
}

/// Mix `top` over `base`, starting `offset_frames` into `base`.
///
/// The result is as long as the longer of the two; gains are in dB.
pub fn overlay(base: &Pcm, top: &Pcm, offset_frames: usize, base_db: f64, top_db: f64) -> Result<Pcm> {
    if !base.same_format(top) {
        bail!("Cannot overlay clips of different formats");
    }
    let mut out = base.clone();
    adjust_volume(&mut out, base_db);
    pad_to(&mut out, offset_frames + top.frames());

    let gain = 10.0f64.powf(top_db / 20.0) as f32;
    for (dst, src) in out.channels.iter_mut().zip(&top.channels) {
        for (d, s) in dst[offset_frames..].iter_mut().zip(src) {
            *d += *s * gain;
        }
    }
    Ok(out)
}
