//! Transcoder capability and its ffmpeg implementation.
//!
//! The export pipeline never decodes or encodes audio itself: it describes each
//! output file as a [`TranscodeRequest`] and hands it to a [`Transcoder`].

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{Result, SliceError};
use crate::models::{KeptRange, OutputFormat};

/// EBU R128 loudness normalization: -16 LUFS integrated, -1.5 dBTP, 11 LU range.
pub const LOUDNORM_FILTER: &str = "loudnorm=I=-16:TP=-1.5:LRA=11";

/// Duration assumed for an open-ended segment when estimating progress.
pub const OPEN_END_ESTIMATE_SECS: f64 = 300.0;

/// Lines of ffmpeg stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Which part of the source ends up in the output.
#[derive(Debug, Clone, PartialEq)]
pub enum Cut {
    /// Seek to `start` and keep until `end` (or the end of the source)
    Trim { start: f64, end: Option<f64> },
    /// Trim each chunk, reset its timestamps and concatenate in order
    Splice { chunks: Vec<KeptRange> },
}

impl Cut {
    /// Single trim when there is one chunk that needs no splicing.
    pub fn from_kept_ranges(kept: &[KeptRange], has_exclusions: bool) -> Self {
        match kept {
            [only] if !has_exclusions => Cut::Trim {
                start: only.start,
                end: only.end,
            },
            _ => Cut::Splice {
                chunks: kept.to_vec(),
            },
        }
    }

    /// Expected output length in seconds, used for elapsed-time progress.
    pub fn estimated_duration(&self) -> f64 {
        let span = |start: f64, end: Option<f64>| end.unwrap_or(start + OPEN_END_ESTIMATE_SECS) - start;
        match self {
            Cut::Trim { start, end } => span(*start, *end),
            Cut::Splice { chunks } => chunks.iter().map(|c| span(c.start, c.end)).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub cut: Cut,
    pub normalize: bool,
    pub format: OutputFormat,
    pub mp3_bitrate_kbps: u32,
    /// Output sample rate override
    pub sample_rate: Option<u32>,
    /// Embedded as the attached picture when set
    pub cover_art: Option<PathBuf>,
    /// Output tags, written in order
    pub metadata: Vec<(String, String)>,
}

/// Progress as reported by a transcoder: either a native percentage or the
/// amount of output produced so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TranscodeProgress {
    Percent(f64),
    ElapsedSecs(f64),
}

pub trait Transcoder {
    /// Produce `request.output`. Returning `Err` marks this attempt as failed.
    fn transcode(
        &self,
        request: &TranscodeRequest,
        on_progress: &mut dyn FnMut(TranscodeProgress),
    ) -> Result<()>;
}

fn secs(value: f64) -> String {
    format!("{:.3}", value)
}

fn atrim(chunk: &KeptRange) -> String {
    match chunk.end {
        Some(end) => format!("atrim=start={}:end={}", secs(chunk.start), secs(end)),
        None => format!("atrim=start={}", secs(chunk.start)),
    }
}

/// Build the `-filter_complex` graph for a splice, returning it with its output label.
pub fn splice_filter(chunks: &[KeptRange], normalize: bool) -> (String, String) {
    let mut specs: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[0:a]{},asetpts=PTS-STARTPTS[a{}]", atrim(chunk), i))
        .collect();

    let mut label = if chunks.len() > 1 {
        let inputs: String = (0..chunks.len()).map(|i| format!("[a{}]", i)).collect();
        specs.push(format!("{}concat=n={}:v=0:a=1[concatOut]", inputs, chunks.len()));
        "concatOut".to_string()
    } else {
        "a0".to_string()
    };

    if normalize {
        specs.push(format!("[{}]{}[outa]", label, LOUDNORM_FILTER));
        label = "outa".to_string();
    }

    (specs.join(";"), label)
}

/// Full ffmpeg argument list for a request.
pub fn build_ffmpeg_args(request: &TranscodeRequest, cover_exists: bool) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-hide_banner", "-nostats", "-v", "error", "-progress", "pipe:2"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if let Cut::Trim { start, end } = &request.cut {
        args.push("-ss".to_string());
        args.push(secs(*start));
        if let Some(end) = end {
            args.push("-t".to_string());
            args.push(secs(end - start));
        }
    }

    args.push("-i".to_string());
    args.push(request.input.to_string_lossy().to_string());

    let cover = request.cover_art.as_ref().filter(|_| cover_exists);
    if let Some(cover) = cover {
        args.push("-i".to_string());
        args.push(cover.to_string_lossy().to_string());
    }

    match &request.cut {
        Cut::Trim { .. } => {
            if cover.is_some() {
                args.extend(["-map", "0:a"].map(String::from));
            }
            if request.normalize {
                args.push("-af".to_string());
                args.push(LOUDNORM_FILTER.to_string());
            }
        }
        Cut::Splice { chunks } => {
            let (graph, label) = splice_filter(chunks, request.normalize);
            args.push("-filter_complex".to_string());
            args.push(graph);
            args.push("-map".to_string());
            args.push(format!("[{}]", label));
        }
    }

    if cover.is_some() {
        args.extend(["-map", "1:v", "-c:v", "copy", "-disposition:v:0", "attached_pic"].map(String::from));
    }

    if let Some(rate) = request.sample_rate {
        args.push("-ar".to_string());
        args.push(rate.to_string());
    }

    match request.format {
        OutputFormat::Wav => {
            args.extend(["-c:a", "pcm_s16le", "-f", "wav"].map(String::from));
        }
        OutputFormat::Flac => {
            args.extend(["-c:a", "flac", "-f", "flac"].map(String::from));
        }
        OutputFormat::Mp3 => {
            args.extend(["-c:a", "libmp3lame", "-b:a"].map(String::from));
            args.push(format!("{}k", request.mp3_bitrate_kbps));
            args.extend(["-f", "mp3"].map(String::from));
            if cover.is_some() {
                // ID3v2.3 for players that ignore v2.4 pictures
                args.extend(["-id3v2_version", "3"].map(String::from));
            }
        }
    }

    for (key, value) in &request.metadata {
        args.push("-metadata".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(request.output.to_string_lossy().to_string());
    args
}

/// Parse one line of `-progress` output into elapsed output time.
pub fn parse_progress_line(line: &str) -> Option<TranscodeProgress> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // Both keys carry microseconds
        "out_time_us" | "out_time_ms" => value
            .parse::<i64>()
            .ok()
            .filter(|us| *us >= 0)
            .map(|us| TranscodeProgress::ElapsedSecs(us as f64 / 1_000_000.0)),
        _ => None,
    }
}

fn is_progress_key(line: &str) -> bool {
    line.split_once('=')
        .map(|(key, _)| !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(false)
}

/// Drain ffmpeg's stderr, forwarding progress and keeping the last diagnostic lines.
///
/// Bytes that are not UTF-8 (file names and tags echoed back) are replaced, not rejected.
fn read_stderr(
    stderr: impl Read,
    on_progress: &mut dyn FnMut(TranscodeProgress),
) -> io::Result<VecDeque<String>> {
    let mut reader = BufReader::new(stderr);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(progress) = parse_progress_line(line) {
            on_progress(progress);
        } else if !is_progress_key(line) && !line.trim().is_empty() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }

    Ok(tail)
}

/// Runs the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    /// Locate `ffmpeg` on `PATH`.
    pub fn new() -> Result<Self> {
        let binary = which::which("ffmpeg")
            .map_err(|_| SliceError::Transcode("ffmpeg not found on PATH".to_string()))?;
        Ok(Self { binary })
    }

    pub fn with_binary(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(
        &self,
        request: &TranscodeRequest,
        on_progress: &mut dyn FnMut(TranscodeProgress),
    ) -> Result<()> {
        let cover_exists = request.cover_art.as_ref().map(|p| p.exists()).unwrap_or(false);
        let args = build_ffmpeg_args(request, cover_exists);
        debug!("Running FFmpeg: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SliceError::Transcode(format!("failed to spawn ffmpeg: {}", e)))?;

        let read = match child.stderr.take() {
            Some(stderr) => read_stderr(stderr, on_progress),
            None => Ok(VecDeque::new()),
        };

        // Reap the child even when its output could not be read
        let status = child
            .wait()
            .map_err(|e| SliceError::Transcode(format!("ffmpeg process error: {}", e)))?;
        let tail = read
            .map_err(|e| SliceError::Transcode(format!("failed to read ffmpeg output: {}", e)))?;

        if status.success() {
            Ok(())
        } else if tail.is_empty() {
            Err(SliceError::Transcode(format!(
                "ffmpeg exited with code {:?}",
                status.code()
            )))
        } else {
            Err(SliceError::Transcode(Vec::from(tail).join("\n")))
        }
    }
}
