//! Positional matching of detected segments against a reference tracklist,
//! plus the text parsers that produce tracklists.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Confidence, MatchResult, SegmentSpan, TracklistEntry};
use crate::planner::default_track_name;

/// Largest duration difference still rated `high`.
pub const HIGH_TOLERANCE_SECS: f64 = 3.0;
/// Largest duration difference still rated `medium`.
pub const MEDIUM_TOLERANCE_SECS: f64 = 10.0;

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,3}[.)\-]\s+").unwrap());
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2}:\d{2}(?::\d{2})?)").unwrap());
static ARTIST_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+[-–]\s+").unwrap());
static LEADING_DASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-–]\s+").unwrap());

pub fn confidence_for(segment_duration: f64, track_duration: f64) -> Confidence {
    if track_duration <= 0.0 {
        return Confidence::None;
    }
    let diff = (segment_duration - track_duration).abs();
    if diff <= HIGH_TOLERANCE_SECS {
        Confidence::High
    } else if diff <= MEDIUM_TOLERANCE_SECS {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Pair segment `i` with track `i` for every index either side has.
///
/// A missing side, or a track without a known duration, rates `none`.
pub fn match_segments_to_tracklist(
    segments: &[SegmentSpan],
    tracklist: &[TracklistEntry],
) -> Vec<MatchResult> {
    (0..segments.len().max(tracklist.len()))
        .map(|index| {
            let segment = segments.get(index).copied();
            let track = tracklist.get(index).cloned();

            let confidence = match (&segment, &track) {
                (Some(seg), Some(t)) => confidence_for(seg.duration, t.duration_seconds),
                _ => Confidence::None,
            };
            let title = match (&segment, &track) {
                (_, Some(t)) => t.title.clone(),
                (Some(_), None) => default_track_name(index + 1),
                (None, None) => String::new(),
            };

            MatchResult {
                index,
                segment,
                track,
                confidence,
                title,
            }
        })
        .collect()
}

/// Spans between consecutive markers; the last one ends at `total_duration`.
pub fn segment_spans(markers: &[f64], total_duration: f64) -> Vec<SegmentSpan> {
    let mut sorted = markers.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut bounds = Vec::with_capacity(sorted.len() + 2);
    bounds.push(0.0);
    bounds.extend(sorted);
    bounds.push(total_duration);

    bounds
        .windows(2)
        .map(|pair| SegmentSpan::new(pair[0], pair[1]))
        .collect()
}

/// `"M:SS"` or `"H:MM:SS"` to seconds; anything else is 0.
pub fn parse_duration(text: &str) -> f64 {
    let parts: Option<Vec<f64>> = text
        .trim()
        .split(':')
        .map(|p| p.trim().parse::<f64>().ok())
        .collect();

    match parts.as_deref() {
        Some([m, s]) => m * 60.0 + s,
        Some([h, m, s]) => h * 3600.0 + m * 60.0 + s,
        _ => 0.0,
    }
}

/// One line of a pasted tracklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTrack {
    /// Start time in seconds, when the line carried a timestamp
    pub time: Option<f64>,
    pub time_label: Option<String>,
    pub artist: String,
    pub title: String,
}

/// Parse free-form tracklist text, one track per line.
///
/// Accepts lines such as `01. 0:00 Artist - Title`, `3:45 Title` or
/// `1) Artist – Title 1:02:03`. Leading numbering is dropped, the first
/// timestamp becomes the start time, and `Artist - Title` is split on the
/// first dash surrounded by whitespace.
pub fn parse_tracklist_text(text: &str) -> Vec<ParsedTrack> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_tracklist_line)
        .collect()
}

fn parse_tracklist_line(line: &str) -> Option<ParsedTrack> {
    let mut content = LEADING_NUMBER.replace(line, "").to_string();

    let mut time = None;
    let mut time_label = None;
    if let Some(m) = TIMESTAMP.find(&content) {
        let label = m.as_str().to_string();
        time = Some(parse_duration(&label));
        content = content.replacen(&label, "", 1).trim().to_string();
        time_label = Some(label);
    }

    let parts: Vec<&str> = ARTIST_SEPARATOR.split(&content).collect();
    let (artist, title) = if parts.len() >= 2 {
        (parts[0].trim().to_string(), parts[1..].join(" - ").trim().to_string())
    } else {
        (String::new(), content.clone())
    };
    let title = LEADING_DASH.replace(&title, "").trim().to_string();

    if title.is_empty() && time_label.is_none() {
        return None;
    }

    Some(ParsedTrack {
        time,
        time_label,
        artist,
        title,
    })
}

/// Reference entries from a parsed tracklist.
///
/// A track's duration runs from its start time to the next track's start, and
/// the last one to `total_duration`. Tracks without a usable start get 0,
/// which the matcher rates `none`.
pub fn tracklist_from_parsed(tracks: &[ParsedTrack], total_duration: f64) -> Vec<TracklistEntry> {
    tracks
        .iter()
        .enumerate()
        .map(|(i, track)| {
            let next_start = match tracks.get(i + 1) {
                Some(next) => next.time,
                None => Some(total_duration),
            };
            let duration_seconds = match (track.time, next_start) {
                (Some(start), Some(end)) if end > start => end - start,
                _ => 0.0,
            };
            TracklistEntry {
                position: (i + 1).to_string(),
                title: track.title.clone(),
                artists: if track.artist.is_empty() {
                    Vec::new()
                } else {
                    vec![track.artist.clone()]
                },
                duration_seconds,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, duration: f64) -> TracklistEntry {
        TracklistEntry {
            position: String::new(),
            title: title.to_string(),
            artists: Vec::new(),
            duration_seconds: duration,
        }
    }

    fn span(duration: f64) -> SegmentSpan {
        SegmentSpan::new(0.0, duration)
    }

    #[test]
    fn test_confidence_bands() {
        let segments = [span(180.0), span(200.0), span(400.0)];
        let tracks = [entry("a", 181.0), entry("b", 250.0), entry("c", 50.0)];
        let confidences: Vec<Confidence> = match_segments_to_tracklist(&segments, &tracks)
            .iter()
            .map(|m| m.confidence)
            .collect();
        assert_eq!(confidences, vec![Confidence::High, Confidence::Low, Confidence::Low]);
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(confidence_for(100.0, 103.0), Confidence::High);
        assert_eq!(confidence_for(100.0, 103.5), Confidence::Medium);
        assert_eq!(confidence_for(100.0, 90.0), Confidence::Medium);
        assert_eq!(confidence_for(100.0, 89.9), Confidence::Low);
        assert_eq!(confidence_for(100.0, 0.0), Confidence::None);
    }

    #[test]
    fn test_uneven_lengths() {
        let segments = [span(60.0), span(60.0)];
        let tracks = [entry("Only", 60.0)];
        let results = match_segments_to_tracklist(&segments, &tracks);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].confidence, Confidence::High);
        assert_eq!(results[0].title, "Only");
        assert_eq!(results[1].confidence, Confidence::None);
        assert!(results[1].track.is_none());
        assert_eq!(results[1].title, "Track 02");

        let results = match_segments_to_tracklist(&[], &tracks);
        assert_eq!(results.len(), 1);
        assert!(results[0].segment.is_none());
        assert_eq!(results[0].confidence, Confidence::None);
    }

    #[test]
    fn test_segment_spans() {
        let spans = segment_spans(&[90.0, 30.0], 120.0);
        assert_eq!(
            spans,
            vec![
                SegmentSpan::new(0.0, 30.0),
                SegmentSpan::new(30.0, 90.0),
                SegmentSpan::new(90.0, 120.0),
            ]
        );
        assert_eq!(spans[1].duration, 60.0);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3:45"), 225.0);
        assert_eq!(parse_duration("1:02:03"), 3723.0);
        assert_eq!(parse_duration("12:30"), 750.0);
        assert_eq!(parse_duration(""), 0.0);
        assert_eq!(parse_duration("abc"), 0.0);
        assert_eq!(parse_duration("1:2:3:4"), 0.0);
        assert_eq!(parse_duration("3:xx"), 0.0);
    }

    #[test]
    fn test_parse_numbered_lines() {
        let tracks = parse_tracklist_text(
            "01. 0:00 Gangrene Discharge - Conjoined\n\
             2) 3:45 Second Band – Second Song\n\
             \n\
             3- 1:02:03 Third - Title - With Dashes\n",
        );
        assert_eq!(tracks.len(), 3);

        assert_eq!(tracks[0].time, Some(0.0));
        assert_eq!(tracks[0].time_label.as_deref(), Some("0:00"));
        assert_eq!(tracks[0].artist, "Gangrene Discharge");
        assert_eq!(tracks[0].title, "Conjoined");

        assert_eq!(tracks[1].time, Some(225.0));
        assert_eq!(tracks[1].artist, "Second Band");
        assert_eq!(tracks[1].title, "Second Song");

        assert_eq!(tracks[2].time, Some(3723.0));
        assert_eq!(tracks[2].artist, "Third");
        assert_eq!(tracks[2].title, "Title - With Dashes");
    }

    #[test]
    fn test_parse_title_only_and_time_only() {
        let tracks = parse_tracklist_text("Just A Title\n4:20\n   \n");
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].time, None);
        assert_eq!(tracks[0].artist, "");
        assert_eq!(tracks[0].title, "Just A Title");
        assert_eq!(tracks[1].time, Some(260.0));
        assert_eq!(tracks[1].title, "");
    }

    #[test]
    fn test_hyphenated_words_are_not_separators() {
        let tracks = parse_tracklist_text("Jay-Z Intro");
        assert_eq!(tracks[0].artist, "");
        assert_eq!(tracks[0].title, "Jay-Z Intro");
    }

    #[test]
    fn test_trailing_timestamp() {
        let tracks = parse_tracklist_text("Artist - Song 12:34");
        assert_eq!(tracks[0].time, Some(754.0));
        assert_eq!(tracks[0].title, "Song");
    }

    #[test]
    fn test_tracklist_from_parsed_durations() {
        let parsed = parse_tracklist_text("0:00 Intro\n1:30 Artist - Song\nNo Time");
        let entries = tracklist_from_parsed(&parsed, 400.0);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].duration_seconds, 90.0);
        assert_eq!(entries[1].artists, vec!["Artist".to_string()]);
        // next track has no start time
        assert_eq!(entries[1].duration_seconds, 0.0);
        assert_eq!(entries[2].duration_seconds, 0.0);
        assert_eq!(entries[2].position, "3");

        let parsed = parse_tracklist_text("0:00 A\n3:00 B");
        let entries = tracklist_from_parsed(&parsed, 400.0);
        assert_eq!(entries[1].duration_seconds, 220.0);
    }
}
