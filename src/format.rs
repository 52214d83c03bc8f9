use serde::Serialize;

use crate::lookup::{Release, ReleaseSummary};
use crate::matcher::segment_spans;
use crate::models::{Detection, ExportReport, MatchResult, Segment};

/// Format a duration in seconds as "M:SS".
pub fn format_duration(secs: f64) -> String {
    let total_secs = secs.max(0.0).round() as u64;
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    format!("{}:{:02}", minutes, seconds)
}

/// Format a position in seconds as "M:SS.ss".
pub fn format_time(secs: f64) -> String {
    let secs = secs.max(0.0);
    let minutes = (secs / 60.0).floor() as u64;
    let seconds = secs - minutes as f64 * 60.0;
    format!("{}:{:05.2}", minutes, seconds)
}

fn separator(width: usize) -> String {
    "\u{2500}".repeat(width)
}

/// Detected tracks and the silence they were split on.
pub fn format_detection_table(detection: &Detection) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{:>5}  {:>10}  {:>10}  {:>10}\n",
        "Track", "Start", "End", "Duration"
    ));
    output.push_str(&separator(42));
    output.push('\n');

    for (i, span) in segment_spans(&detection.markers, detection.duration_secs)
        .iter()
        .enumerate()
    {
        output.push_str(&format!(
            "{:>5}  {:>10}  {:>10}  {:>10}\n",
            format!("{:02}", i + 1),
            format_time(span.start),
            format_time(span.end),
            format_duration(span.duration),
        ));
    }

    output.push_str(&separator(42));
    output.push('\n');

    let floor = detection
        .noise_floor_db
        .map(|f| format!("{:.2} dB", f))
        .unwrap_or_else(|| "n/a (manual)".to_string());
    output.push_str(&format!(
        "Silence regions:   {}\n\
         Threshold:         {:.2} dB\n\
         Noise floor:       {}\n\
         Passes:            {}\n\
         Number of tracks:  {}",
        detection.silence_regions.len(),
        detection.effective_threshold_db,
        floor,
        detection.passes,
        detection.track_count,
    ));

    output
}

/// Planned output files, with exclusions.
pub fn format_segments_table(segments: &[Segment]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{:>5}  {:>10}  {:>10}  {:>5}  {}\n",
        "Track", "Start", "End", "Cuts", "File"
    ));
    output.push_str(&separator(58));
    output.push('\n');

    for segment in segments {
        output.push_str(&format!(
            "{:>5}  {:>10}  {:>10}  {:>5}  {}\n",
            format!("{:02}", segment.track_number),
            format_time(segment.start),
            segment.end.map(format_time).unwrap_or_else(|| "end".to_string()),
            segment.exclusions.len(),
            segment.file_name,
        ));
    }

    output
}

/// Segment vs. reference track, one row per position.
pub fn format_match_table(results: &[MatchResult]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{:>3}  {:>8}  {:>8}  {:<10}  {}\n",
        "#", "Segment", "Track", "Match", "Title"
    ));
    output.push_str(&separator(58));
    output.push('\n');

    for result in results {
        let segment = result
            .segment
            .map(|s| format_duration(s.duration))
            .unwrap_or_else(|| "-".to_string());
        let track = result
            .track
            .as_ref()
            .filter(|t| t.duration_seconds > 0.0)
            .map(|t| format_duration(t.duration_seconds))
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!(
            "{:>3}  {:>8}  {:>8}  {:<10}  {}\n",
            result.index + 1,
            segment,
            track,
            result.confidence.as_str(),
            result.title,
        ));
    }

    output
}

/// Summary of a finished export.
pub fn format_export_table(report: &ExportReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{:>5}  {:>10}  {:>8}  {}\n",
        "Track", "Start", "Attempts", "File"
    ));
    output.push_str(&separator(58));
    output.push('\n');

    for track in &report.tracks {
        output.push_str(&format!(
            "{:>5}  {:>10}  {:>8}  {}\n",
            format!("{:02}", track.track_number),
            format_time(track.start),
            track.attempts,
            track.file_name,
        ));
    }

    output.push_str(&separator(58));
    output.push('\n');
    output.push_str(&format!(
        "Number of tracks:  {}\n\
         Output:            {}\n\
         Log:               {}",
        report.tracks.len(),
        report.output_path.display(),
        report.log_path.display(),
    ));

    output
}

pub fn format_releases_table(releases: &[ReleaseSummary]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{:>10}  {:>4}  {:<8}  {}\n",
        "ID", "Year", "Country", "Title"
    ));
    output.push_str(&separator(58));
    output.push('\n');

    for release in releases {
        output.push_str(&format!(
            "{:>10}  {:>4}  {:<8}  {}\n",
            release.id, release.year, release.country, release.title,
        ));
        if !release.format.is_empty() || !release.label.is_empty() {
            output.push_str(&format!("{:>26}{} / {}\n", "", release.format, release.label));
        }
    }

    output
}

pub fn format_release(release: &Release) -> String {
    let info = &release.info;
    let mut output = format!("{} ({})\n", info.title, info.year);
    if !info.labels.is_empty() {
        output.push_str(&format!("Label: {}\n", info.labels));
    }
    if !info.genres.is_empty() || !info.styles.is_empty() {
        let tags: Vec<&str> = info
            .genres
            .iter()
            .chain(info.styles.iter())
            .map(String::as_str)
            .collect();
        output.push_str(&format!("Genre: {}\n", tags.join(", ")));
    }
    output.push_str(&separator(58));
    output.push('\n');

    for entry in &release.tracklist {
        let duration = if entry.duration_seconds > 0.0 {
            format_duration(entry.duration_seconds)
        } else {
            "-".to_string()
        };
        output.push_str(&format!("{:>4}  {:>8}  {}\n", entry.position, duration, entry.title));
    }

    output
}

/// Pretty-printed JSON for any result type.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
