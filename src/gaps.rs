//! Silence gap detection over a loudness series.
//!
//! A frame is silent while its level is below the effective threshold. Runs of
//! silent frames long enough to be an inter-track gap become [`SilenceRegion`]s,
//! and the midpoint of each region is a candidate split marker. When nothing
//! survives, detection is retried with a threshold 5 dB more permissive until
//! the threshold reaches -25 dB.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::decode::decode_mono_with_progress;
use crate::error::Result;
use crate::loudness::{compute_loudness, estimate_noise_floor, DEFAULT_HOP_MS, DEFAULT_WINDOW_MS};
use crate::models::{Detection, LoudnessFrame, LoudnessSeries, SilenceRegion};

/// Upper anchor for the auto threshold.
const AUTO_CEILING_DB: f64 = -20.0;
const SENSITIVITY_SCALE: f64 = 0.3;
/// Markers closer than this to either end of the source are dropped.
const BOUNDARY_MARGIN_SECS: f64 = 5.0;
/// Relaxation retries only while the effective threshold is below this.
const RELAX_LIMIT_DB: f64 = -25.0;
const RELAX_STEP_DB: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Manual threshold; acts as a ceiling when `auto_threshold` is set
    pub threshold_db: f64,
    pub min_duration_ms: f64,
    /// 0.0 keeps the threshold at the noise floor, 1.0 moves it furthest toward -20 dB
    pub sensitivity: f64,
    pub auto_threshold: bool,
    pub window_ms: f64,
    /// Must match the hop the series was profiled with
    pub hop_ms: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            threshold_db: -40.0,
            min_duration_ms: 1500.0,
            sensitivity: 0.5,
            auto_threshold: true,
            window_ms: DEFAULT_WINDOW_MS,
            hop_ms: DEFAULT_HOP_MS,
        }
    }
}

/// Reconcile the auto-calibrated threshold with the manual one.
///
/// The manual value is a ceiling: the result is never above `threshold_db`.
pub fn effective_threshold(noise_floor_db: f64, params: &DetectionParams) -> f64 {
    let auto = noise_floor_db
        + (AUTO_CEILING_DB - noise_floor_db) * params.sensitivity * SENSITIVITY_SCALE;
    auto.min(params.threshold_db)
}

struct Pass {
    regions: Vec<SilenceRegion>,
    markers: Vec<f64>,
    effective_db: f64,
    noise_floor_db: Option<f64>,
}

fn region(frames: &[LoudnessFrame], start: usize, end: usize) -> SilenceRegion {
    let start_time = frames[start].time_secs;
    let end_time = frames[end].time_secs;
    SilenceRegion {
        start_frame: start,
        end_frame: end,
        start_time,
        end_time,
        duration: end_time - start_time,
    }
}

/// Maximal runs of frames below `threshold_db` lasting at least `min_frames`.
pub fn find_silence_regions(
    series: &LoudnessSeries,
    threshold_db: f64,
    min_frames: usize,
) -> Vec<SilenceRegion> {
    let frames = &series.frames;
    let mut regions = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, frame) in frames.iter().enumerate() {
        if frame.level_db < threshold_db {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else if let Some(start) = run_start.take() {
            // End is the first loud frame
            if i - start >= min_frames {
                regions.push(region(frames, start, i));
            }
        }
    }

    // A run still open at the end closes on the last frame
    if let Some(start) = run_start {
        let last = frames.len() - 1;
        if frames.len() - start >= min_frames && last > start {
            regions.push(region(frames, start, last));
        }
    }

    regions
}

fn run_pass(series: &LoudnessSeries, params: &DetectionParams) -> Result<Pass> {
    let (effective_db, noise_floor_db) = if params.auto_threshold && !series.is_empty() {
        let floor = estimate_noise_floor(series)?;
        (effective_threshold(floor, params), Some(floor))
    } else {
        (params.threshold_db, None)
    };

    let min_frames = (params.min_duration_ms / params.hop_ms).ceil() as usize;
    let regions = find_silence_regions(series, effective_db, min_frames);

    let last_frame = series.len().saturating_sub(1);
    let total = series.duration_secs;
    let markers = regions
        .iter()
        // A run covering the whole input has no track on either side of it
        .filter(|r| !(r.start_frame == 0 && r.end_frame == last_frame))
        .map(SilenceRegion::midpoint)
        .filter(|&m| m > BOUNDARY_MARGIN_SECS && m < total - BOUNDARY_MARGIN_SECS)
        .collect();

    Ok(Pass {
        regions,
        markers,
        effective_db,
        noise_floor_db,
    })
}

/// Find inter-track silence and derive split markers.
///
/// Zero markers is a valid outcome (the source is one track), never an error.
pub fn detect_gaps(series: &LoudnessSeries, params: &DetectionParams) -> Result<Detection> {
    let mut params = *params;
    let mut passes = 0;

    loop {
        passes += 1;
        let pass = run_pass(series, &params)?;
        debug!(
            "Detection pass {}: threshold {:.2} dB, {} silence regions, {} markers",
            passes,
            pass.effective_db,
            pass.regions.len(),
            pass.markers.len()
        );

        if pass.markers.is_empty() && pass.effective_db < RELAX_LIMIT_DB && !series.is_empty() {
            params.threshold_db = pass.effective_db + RELAX_STEP_DB;
            params.auto_threshold = false;
            debug!(
                "No gaps detected, retrying with threshold {:.2} dB",
                params.threshold_db
            );
            continue;
        }

        let track_count = pass.markers.len() + 1;
        return Ok(Detection {
            silence_regions: pass.regions,
            markers: pass.markers,
            effective_threshold_db: pass.effective_db,
            noise_floor_db: pass.noise_floor_db,
            track_count,
            passes,
            duration_secs: series.duration_secs,
        });
    }
}

/// Decode `path`, profile it and run [`detect_gaps`].
pub fn detect_file(path: &Path, params: &DetectionParams) -> Result<Detection> {
    detect_file_with_progress(path, params, |_| {})
}

/// [`detect_file`], reporting decode progress as a fraction in `[0, 1]`.
pub fn detect_file_with_progress(
    path: &Path,
    params: &DetectionParams,
    on_progress: impl Fn(f32),
) -> Result<Detection> {
    let audio = decode_mono_with_progress(path, on_progress)?;
    info!(
        "Decoded {}: {:.2}s at {} Hz, {} channel(s)",
        path.display(),
        audio.duration_secs,
        audio.sample_rate,
        audio.channels
    );
    let series = compute_loudness(&audio.samples, audio.sample_rate, params.window_ms, params.hop_ms)?;
    let detection = detect_gaps(&series, params)?;
    info!(
        "Detected {} track(s) at {:.2} dB after {} pass(es)",
        detection.track_count, detection.effective_threshold_db, detection.passes
    );
    Ok(detection)
}
