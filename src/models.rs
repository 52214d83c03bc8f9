use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lowest level a loudness frame can report, in dB.
pub const SILENCE_FLOOR_DB: f64 = -100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessFrame {
    pub time_secs: f64,
    pub level_db: f64,
}

/// Short-window RMS levels at a fixed hop, plus the duration of the source they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessSeries {
    pub frames: Vec<LoudnessFrame>,
    pub window_ms: f64,
    pub hop_ms: f64,
    pub duration_secs: f64,
}

impl LoudnessSeries {
    /// Build a series from raw levels spaced `hop_ms` apart, starting at 0.
    pub fn from_levels(levels: &[f64], hop_ms: f64, duration_secs: f64) -> Self {
        let frames = levels
            .iter()
            .enumerate()
            .map(|(i, &level)| LoudnessFrame {
                time_secs: i as f64 * hop_ms / 1000.0,
                level_db: level.max(SILENCE_FLOOR_DB),
            })
            .collect();
        Self {
            frames,
            window_ms: hop_ms * 2.0,
            hop_ms,
            duration_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn levels(&self) -> impl Iterator<Item = f64> + '_ {
        self.frames.iter().map(|f| f.level_db)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceRegion {
    pub start_frame: usize,
    pub end_frame: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
}

impl SilenceRegion {
    pub fn midpoint(&self) -> f64 {
        (self.start_time + self.end_time) / 2.0
    }
}

/// Result of silence detection over one loudness series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub silence_regions: Vec<SilenceRegion>,
    pub markers: Vec<f64>,
    pub effective_threshold_db: f64,
    pub noise_floor_db: Option<f64>,
    pub track_count: usize,
    /// Number of threshold passes run, including relaxation retries
    pub passes: usize,
    pub duration_secs: f64,
}

/// Audio to be physically removed from whatever segment it falls within.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExcludedRegion {
    pub start: f64,
    pub end: f64,
}

impl ExcludedRegion {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Overlap test against `[start, end)`; `None` end means open-ended.
    pub fn overlaps(&self, start: f64, end: Option<f64>) -> bool {
        let end = end.unwrap_or(f64::INFINITY);
        self.start < end && self.end > start
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A time range kept in the output; `None` end runs to the end of the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeptRange {
    pub start: f64,
    pub end: Option<f64>,
}

impl KeptRange {
    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }
}

/// One output track, derived fresh from markers, exclusions and names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub start: f64,
    pub end: Option<f64>,
    pub track_number: usize,
    pub name: String,
    pub artist: String,
    /// Exclusions clamped to the segment bounds, ascending by start
    pub exclusions: Vec<ExcludedRegion>,
    /// Complement of `exclusions` within the segment, in order
    pub kept_ranges: Vec<KeptRange>,
    pub file_name: String,
}

impl Segment {
    pub fn has_exclusions(&self) -> bool {
        !self.exclusions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub track_number: usize,
    pub name: String,
    pub file_name: String,
    pub file_path: PathBuf,
    pub start: f64,
    pub end: Option<f64>,
    /// Attempts consumed, including the successful one
    pub attempts: u32,
}

impl ExportResult {
    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReport {
    pub tracks: Vec<ExportResult>,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracklistEntry {
    pub position: String,
    pub title: String,
    pub artists: Vec<String>,
    pub duration_seconds: f64,
}

/// Start/end/duration of a detected segment, as fed to the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpan {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl SegmentSpan {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            duration: end - start,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub index: usize,
    pub segment: Option<SegmentSpan>,
    pub track: Option<TracklistEntry>,
    pub confidence: Confidence,
    /// Track title, or the default track name when only a segment exists
    pub title: String,
}

/// Sent from the export thread to whatever is watching progress
#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    Init {
        total_tracks: usize,
    },
    StartTrack {
        track_number: usize,
        total_tracks: usize,
        track_name: String,
    },
    EncodeProgress {
        track_number: usize,
        percent: f64,
    },
    RetryScheduled {
        track_number: usize,
        attempt: u32,
        message: String,
    },
    TrackCompleted {
        result: ExportResult,
    },
    Finished {
        report: ExportReport,
    },
    Failed {
        track_number: Option<usize>,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    #[default]
    Flac,
    Mp3,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Flac => "flac",
            OutputFormat::Mp3 => "mp3",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(OutputFormat::Wav),
            "flac" => Ok(OutputFormat::Flac),
            "mp3" => Ok(OutputFormat::Mp3),
            other => Err(format!("unsupported output format '{}' (expected wav, flac or mp3)", other)),
        }
    }
}
