//! Short-window RMS loudness profile and noise floor estimation.

use crate::error::{Result, SliceError};
use crate::models::{LoudnessFrame, LoudnessSeries, SILENCE_FLOOR_DB};

pub const DEFAULT_WINDOW_MS: f64 = 50.0;
pub const DEFAULT_HOP_MS: f64 = 25.0;

/// Share of the quietest frames averaged into the noise floor.
const NOISE_FLOOR_FRACTION: f64 = 0.1;

/// Convert a linear RMS to dB, floored at [`SILENCE_FLOOR_DB`].
fn level_db(rms: f64) -> f64 {
    if rms > 0.0 {
        (20.0 * rms.log10()).max(SILENCE_FLOOR_DB)
    } else {
        SILENCE_FLOOR_DB
    }
}

/// Compute the RMS level of each `window_ms` window, stepping by `hop_ms`.
///
/// Frame `i` covers samples `[i * hop, i * hop + window)` and is stamped with
/// the time of its first sample. Fails when the input is shorter than one window.
pub fn compute_loudness(
    samples: &[f32],
    sample_rate: u32,
    window_ms: f64,
    hop_ms: f64,
) -> Result<LoudnessSeries> {
    let window_size = (sample_rate as f64 * window_ms / 1000.0).floor() as usize;
    let hop_size = (sample_rate as f64 * hop_ms / 1000.0).floor() as usize;

    if window_size == 0 || hop_size == 0 {
        return Err(SliceError::InsufficientData(format!(
            "window {}ms / hop {}ms is below one sample at {} Hz",
            window_ms, hop_ms, sample_rate
        )));
    }
    if samples.len() < window_size {
        return Err(SliceError::InsufficientData(format!(
            "{} samples is shorter than one {}-sample window",
            samples.len(),
            window_size
        )));
    }

    let frame_count = (samples.len() - window_size) / hop_size + 1;
    let mut frames = Vec::with_capacity(frame_count);

    for i in 0..frame_count {
        let start = i * hop_size;
        let sum_sq: f64 = samples[start..start + window_size]
            .iter()
            .map(|&s| {
                let v = s as f64;
                v * v
            })
            .sum();
        let rms = (sum_sq / window_size as f64).sqrt();
        frames.push(LoudnessFrame {
            time_secs: start as f64 / sample_rate as f64,
            level_db: level_db(rms),
        });
    }

    Ok(LoudnessSeries {
        frames,
        window_ms,
        hop_ms,
        duration_secs: samples.len() as f64 / sample_rate as f64,
    })
}

/// Average of the quietest 10% of levels (at least one frame).
pub fn estimate_noise_floor(series: &LoudnessSeries) -> Result<f64> {
    if series.is_empty() {
        return Err(SliceError::InsufficientData(
            "cannot estimate a noise floor from an empty series".to_string(),
        ));
    }

    let mut levels: Vec<f64> = series.levels().collect();
    levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let count = ((levels.len() as f64 * NOISE_FLOOR_FRACTION).floor() as usize).max(1);
    // Running mean: identical levels come back bit-exact
    let mean = levels
        .iter()
        .take(count)
        .enumerate()
        .fold(0.0, |mean, (i, &level)| mean + (level - mean) / (i + 1) as f64);
    Ok(mean)
}
