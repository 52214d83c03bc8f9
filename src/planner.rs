//! Turn markers, exclusions and names into the ordered list of output segments.

use crate::error::{Result, SliceError};
use crate::models::{ExcludedRegion, KeptRange, OutputFormat, Segment};

/// Characters that are unsafe in file names on at least one common platform.
const UNSAFE_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Per-track naming inputs. Missing or empty entries fall back to defaults.
#[derive(Debug, Clone, Default)]
pub struct TrackNaming {
    pub names: Vec<String>,
    pub artists: Vec<String>,
    pub default_artist: String,
    pub format: OutputFormat,
}

/// Make a string safe to use as a path component.
///
/// Unsafe characters become `_`, surrounding whitespace and trailing dots are removed.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    replaced
        .trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

pub fn default_track_name(track_number: usize) -> String {
    format!("Track {:02}", track_number)
}

fn non_empty(values: &[String], index: usize) -> Option<&str> {
    values
        .get(index)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Exclusions overlapping `[start, end)`, clamped to it and sorted by start.
pub fn clamp_exclusions(
    start: f64,
    end: Option<f64>,
    excluded: &[ExcludedRegion],
) -> Vec<ExcludedRegion> {
    let upper = end.unwrap_or(f64::INFINITY);
    let mut clamped: Vec<ExcludedRegion> = excluded
        .iter()
        .filter(|r| r.overlaps(start, end))
        .map(|r| ExcludedRegion::new(r.start.max(start), r.end.min(upper)))
        .collect();
    clamped.sort_by(|a, b| a.start.total_cmp(&b.start));
    clamped
}

/// Complement of `exclusions` within `[start, end)`.
///
/// `limit` is where the source really ends when `end` is open; it only decides
/// whether anything is left after the last exclusion.
pub fn kept_ranges(
    start: f64,
    end: Option<f64>,
    exclusions: &[ExcludedRegion],
    limit: Option<f64>,
) -> Vec<KeptRange> {
    let mut kept = Vec::new();
    let mut cursor = start;

    for excl in exclusions {
        if excl.start > cursor {
            kept.push(KeptRange {
                start: cursor,
                end: Some(excl.start),
            });
        }
        cursor = cursor.max(excl.end);
    }

    match end.or(limit) {
        Some(stop) if cursor >= stop => {}
        _ => kept.push(KeptRange { start: cursor, end }),
    }

    kept
}

/// Compute every output segment.
///
/// `markers` are split points in seconds; N markers give N + 1 segments and the
/// last segment runs to the end of the source. A segment left with no audio
/// after exclusions fails the whole plan rather than being skipped, so track
/// numbering never shifts silently.
pub fn plan_segments(
    markers: &[f64],
    excluded: &[ExcludedRegion],
    naming: &TrackNaming,
    total_duration: Option<f64>,
) -> Result<Vec<Segment>> {
    let mut sorted = markers.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let extension = naming.format.extension();
    let mut segments = Vec::with_capacity(sorted.len() + 1);

    for index in 0..=sorted.len() {
        let start = if index == 0 { 0.0 } else { sorted[index - 1] };
        let end = sorted.get(index).copied();
        let track_number = index + 1;

        let name = non_empty(&naming.names, index)
            .map(str::to_string)
            .unwrap_or_else(|| default_track_name(track_number));
        let artist = non_empty(&naming.artists, index)
            .unwrap_or(&naming.default_artist)
            .to_string();
        let file_name = format!("{:02} - {}.{}", track_number, sanitize(&name), extension);

        let exclusions = clamp_exclusions(start, end, excluded);
        let kept = kept_ranges(start, end, &exclusions, total_duration);
        if kept.is_empty() {
            return Err(SliceError::EmptySegment { track_number });
        }

        segments.push(Segment {
            index,
            start,
            end,
            track_number,
            name,
            artist,
            exclusions,
            kept_ranges: kept,
            file_name,
        });
    }

    Ok(segments)
}
