//! Export orchestration: one transcode per planned segment, strictly in order.
//!
//! Each segment goes through a small bounded state machine
//! (`Pending -> Encoding -> Succeeded | RetryScheduled -> Encoding | FailedFatal`)
//! with [`MAX_ATTEMPTS`] attempts and a fixed [`RETRY_BACKOFF`] between them.
//! A segment that runs out of attempts aborts the whole run; files already
//! written for earlier segments stay on disk.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Result, SliceError};
use crate::export_log::ExportLog;
use crate::models::{ExportEvent, ExportReport, ExportResult, OutputFormat, Segment};
use crate::planner::sanitize;
use crate::tagging::{LoftyTagWriter, TagWriter, TrackTags};
use crate::transcode::{Cut, TranscodeProgress, TranscodeRequest, Transcoder};

pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Receives export progress. Implementations must not block for long.
pub trait ProgressSink {
    fn emit(&self, event: ExportEvent);
}

impl ProgressSink for Sender<ExportEvent> {
    fn emit(&self, event: ExportEvent) {
        // The receiver going away (e.g. the TUI quit) must not stop the export
        let _ = self.send(event);
    }
}

/// Discards every event.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ExportEvent) {}
}

/// Waits between attempts. Swapped out in tests to observe the backoff.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Album-level settings shared by every exported track.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Base directory; tracks land in `{output_dir}/{artist}/{album}/`
    pub output_dir: PathBuf,
    pub artist: String,
    pub album: String,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub album_artist: Option<String>,
    pub comment: Option<String>,
    pub cover_art: Option<PathBuf>,
    pub format: OutputFormat,
    pub mp3_bitrate_kbps: u32,
    pub sample_rate: Option<u32>,
    pub normalize: bool,
}

impl ExportOptions {
    pub fn new(output_dir: impl Into<PathBuf>, artist: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            artist: artist.into(),
            album: album.into(),
            year: None,
            genre: None,
            album_artist: None,
            comment: None,
            cover_art: None,
            format: OutputFormat::default(),
            mp3_bitrate_kbps: 320,
            sample_rate: None,
            normalize: false,
        }
    }

    pub fn album_dir(&self) -> PathBuf {
        let or_default = |value: String, default: &str| {
            if value.is_empty() {
                default.to_string()
            } else {
                value
            }
        };
        self.output_dir
            .join(or_default(sanitize(&self.artist), UNKNOWN_ARTIST))
            .join(or_default(sanitize(&self.album), UNKNOWN_ALBUM))
    }

    fn tags_for(&self, segment: &Segment) -> TrackTags {
        TrackTags {
            title: segment.name.clone(),
            artist: segment.artist.clone(),
            album: self.album.clone(),
            track_number: segment.track_number as u32,
            year: self.year.clone(),
            genre: self.genre.clone(),
            album_artist: self.album_artist.clone(),
            comment: self.comment.clone(),
            cover_art: self.cover_art.clone(),
        }
    }

    fn request_for(&self, input: &Path, segment: &Segment, output: PathBuf) -> TranscodeRequest {
        TranscodeRequest {
            input: input.to_path_buf(),
            output,
            cut: Cut::from_kept_ranges(&segment.kept_ranges, segment.has_exclusions()),
            normalize: self.normalize,
            format: self.format,
            mp3_bitrate_kbps: self.mp3_bitrate_kbps,
            sample_rate: self.sample_rate,
            cover_art: self.cover_art.clone(),
            metadata: self.tags_for(segment).ffmpeg_metadata(),
        }
    }
}

/// Where a single segment's encode stands.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    Pending,
    Encoding { attempt: u32 },
    RetryScheduled { attempt: u32, error: String },
    Succeeded { attempts: u32 },
    FailedFatal { attempts: u32, error: String },
}

impl AttemptState {
    /// State after attempt `attempt` finished with `outcome`.
    pub fn after_attempt(attempt: u32, outcome: std::result::Result<(), String>) -> Self {
        match outcome {
            Ok(()) => AttemptState::Succeeded { attempts: attempt },
            Err(error) if attempt < MAX_ATTEMPTS => AttemptState::RetryScheduled { attempt, error },
            Err(error) => AttemptState::FailedFatal {
                attempts: attempt,
                error,
            },
        }
    }
}

fn underlying_message(err: &SliceError) -> String {
    match err {
        SliceError::Transcode(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Fail unless `dir` (or, when it does not exist yet, its nearest existing
/// ancestor) is a directory we can create files in. Creates nothing permanent.
pub fn check_writable(dir: &Path) -> Result<()> {
    let not_writable = |reason: String| SliceError::OutputNotWritable {
        path: dir.to_path_buf(),
        reason,
    };

    let existing = dir
        .ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let metadata = fs::metadata(&existing).map_err(|e| not_writable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(not_writable(format!("{} is not a directory", existing.display())));
    }
    if metadata.permissions().readonly() {
        return Err(not_writable(format!("{} is read-only", existing.display())));
    }

    let scratch = existing.join(format!(".autoslice-write-test-{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&scratch)
        .map_err(|e| not_writable(e.to_string()))?;
    let _ = fs::remove_file(&scratch);
    Ok(())
}

/// Runs planned segments through a [`Transcoder`].
pub struct Exporter {
    transcoder: Box<dyn Transcoder + Send>,
    tag_writer: Box<dyn TagWriter + Send>,
    sleeper: Box<dyn Sleeper + Send>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Exporter {
    pub fn new(transcoder: impl Transcoder + Send + 'static) -> Self {
        Self {
            transcoder: Box::new(transcoder),
            tag_writer: Box::new(LoftyTagWriter::new()),
            sleeper: Box::new(ThreadSleeper),
            cancel: None,
        }
    }

    pub fn with_tag_writer(mut self, tag_writer: impl TagWriter + Send + 'static) -> Self {
        self.tag_writer = Box::new(tag_writer);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + Send + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Checked between segments; a set flag stops the run after the current track.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Export every segment of `input` into the album directory.
    ///
    /// Any failure is reported to `sink` as [`ExportEvent::Failed`] before it is returned.
    pub fn export_tracks(
        &self,
        input: &Path,
        segments: &[Segment],
        options: &ExportOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ExportReport> {
        let mut failed_track = None;
        let result = self.run_export(input, segments, options, sink, &mut failed_track);
        if let Err(ref e) = result {
            sink.emit(ExportEvent::Failed {
                track_number: failed_track,
                message: e.to_string(),
            });
        }
        result
    }

    fn run_export(
        &self,
        input: &Path,
        segments: &[Segment],
        options: &ExportOptions,
        sink: &dyn ProgressSink,
        failed_track: &mut Option<usize>,
    ) -> Result<ExportReport> {
        let album_dir = options.album_dir();
        check_writable(&album_dir)?;
        fs::create_dir_all(&album_dir).map_err(|e| SliceError::OutputNotWritable {
            path: album_dir.clone(),
            reason: e.to_string(),
        })?;

        let mut log = ExportLog::open(&album_dir).unwrap_or_else(|e| {
            warn!("Could not open export log in {}: {}", album_dir.display(), e);
            ExportLog::disabled(&album_dir)
        });

        let total_tracks = segments.len();
        sink.emit(ExportEvent::Init { total_tracks });
        info!("Exporting {} tracks to {}", total_tracks, album_dir.display());
        log.log(&format!(
            "Export started: {} tracks from {} to {}",
            total_tracks,
            input.display(),
            album_dir.display()
        ));

        let mut tracks = Vec::with_capacity(total_tracks);

        for segment in segments {
            if self.cancelled() {
                let completed = tracks.len();
                log.log(&format!("Export cancelled after {} track(s)", completed));
                return Err(SliceError::Cancelled { completed });
            }

            sink.emit(ExportEvent::StartTrack {
                track_number: segment.track_number,
                total_tracks,
                track_name: segment.name.clone(),
            });

            let result = self
                .export_segment(input, segment, options, &album_dir, sink, &mut log)
                .inspect_err(|e| {
                    log.log(&format!("FATAL: {}", e));
                    *failed_track = Some(segment.track_number);
                })?;
            sink.emit(ExportEvent::TrackCompleted {
                result: result.clone(),
            });
            tracks.push(result);
        }

        let report = ExportReport {
            tracks,
            output_path: album_dir,
            log_path: log.path().to_path_buf(),
        };
        log.log(&format!("Export finished: {} tracks", report.tracks.len()));
        info!("Export finished: {} tracks", report.tracks.len());
        sink.emit(ExportEvent::Finished {
            report: report.clone(),
        });

        Ok(report)
    }

    fn export_segment(
        &self,
        input: &Path,
        segment: &Segment,
        options: &ExportOptions,
        album_dir: &Path,
        sink: &dyn ProgressSink,
        log: &mut ExportLog,
    ) -> Result<ExportResult> {
        let track_number = segment.track_number;
        if segment.kept_ranges.is_empty() {
            return Err(SliceError::EmptySegment { track_number });
        }

        let output = album_dir.join(&segment.file_name);
        let request = options.request_for(input, segment, output.clone());
        let estimated = request.cut.estimated_duration();

        log.log(&format!(
            "Track {}: {} ({:.2}s - {}) -> {}",
            track_number,
            segment.name,
            segment.start,
            segment
                .end
                .map(|e| format!("{:.2}s", e))
                .unwrap_or_else(|| "end".to_string()),
            segment.file_name
        ));
        if segment.has_exclusions() {
            log.log(&format!(
                "Track {}: splicing {} kept ranges around {} exclusion(s)",
                track_number,
                segment.kept_ranges.len(),
                segment.exclusions.len()
            ));
        }

        let mut state = AttemptState::Pending;
        let attempts = loop {
            state = match state {
                AttemptState::Pending => AttemptState::Encoding { attempt: 1 },
                AttemptState::Encoding { attempt } => {
                    let mut on_progress = |progress: TranscodeProgress| {
                        let percent = match progress {
                            TranscodeProgress::Percent(p) => p,
                            TranscodeProgress::ElapsedSecs(secs) if estimated > 0.0 => {
                                secs / estimated * 100.0
                            }
                            TranscodeProgress::ElapsedSecs(_) => 0.0,
                        };
                        sink.emit(ExportEvent::EncodeProgress {
                            track_number,
                            percent: percent.clamp(0.0, 100.0),
                        });
                    };
                    let outcome = self
                        .transcoder
                        .transcode(&request, &mut on_progress)
                        .map_err(|e| underlying_message(&e));
                    AttemptState::after_attempt(attempt, outcome)
                }
                AttemptState::RetryScheduled { attempt, error } => {
                    warn!(
                        "Track {} attempt {}/{} failed: {}",
                        track_number, attempt, MAX_ATTEMPTS, error
                    );
                    log.log(&format!(
                        "Track {}: attempt {}/{} failed: {}; retrying in {}s",
                        track_number,
                        attempt,
                        MAX_ATTEMPTS,
                        error,
                        RETRY_BACKOFF.as_secs()
                    ));
                    sink.emit(ExportEvent::RetryScheduled {
                        track_number,
                        attempt,
                        message: error,
                    });
                    self.sleeper.sleep(RETRY_BACKOFF);
                    AttemptState::Encoding {
                        attempt: attempt + 1,
                    }
                }
                AttemptState::Succeeded { attempts } => break attempts,
                AttemptState::FailedFatal { attempts, error } => {
                    log.log(&format!(
                        "Track {}: giving up after {} attempts: {}",
                        track_number, attempts, error
                    ));
                    return Err(SliceError::ExportFatal {
                        track_number,
                        message: error,
                    });
                }
            };
        };

        if options.format == OutputFormat::Mp3 {
            if let Err(e) = self.tag_writer.write_tags(&output, &options.tags_for(segment)) {
                warn!("Track {}: tag pass failed: {}", track_number, e);
                log.log(&format!("Warning: track {} tag pass failed: {}", track_number, e));
            }
        }

        log.log(&format!(
            "Track {}: done ({} attempt(s))",
            track_number, attempts
        ));

        Ok(ExportResult {
            track_number,
            name: segment.name.clone(),
            file_name: segment.file_name.clone(),
            file_path: output,
            start: segment.start,
            end: segment.end,
            attempts,
        })
    }
}
