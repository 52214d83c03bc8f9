//! Editing session: markers, exclusions and names for one source file.
//!
//! The session is the only mutable owner of this state. Detection, planning
//! and export take a [`SessionSnapshot`] and never write back.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SliceError};
use crate::matcher::ParsedTrack;
use crate::models::{ExcludedRegion, Segment, TracklistEntry};
use crate::planner::{plan_segments, TrackNaming};

/// Markers closer than this to an existing marker are treated as duplicates.
pub const MARKER_MERGE_SECS: f64 = 0.1;
pub const HISTORY_LIMIT: usize = 50;
pub const SESSION_FILENAME: &str = "session.json";

/// Immutable view of a session at one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub total_duration: Option<f64>,
    #[serde(default)]
    pub markers: Vec<f64>,
    #[serde(default)]
    pub excluded_regions: Vec<ExcludedRegion>,
    #[serde(default)]
    pub track_names: Vec<String>,
    #[serde(default)]
    pub track_artists: Vec<String>,
}

impl SessionSnapshot {
    pub fn track_count(&self) -> usize {
        self.markers.len() + 1
    }

    /// Plan output segments from this snapshot.
    pub fn plan(&self, naming: &TrackNaming) -> Result<Vec<Segment>> {
        let naming = TrackNaming {
            names: self.track_names.clone(),
            artists: self.track_artists.clone(),
            ..naming.clone()
        };
        plan_segments(&self.markers, &self.excluded_regions, &naming, self.total_duration)
    }
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    version: u64,
    #[serde(flatten)]
    state: SessionSnapshot,
}

fn in_range(time: f64, total_duration: Option<f64>) -> bool {
    time.is_finite() && time > 0.0 && total_duration.map(|d| time < d).unwrap_or(true)
}

fn sorted_unique_markers(times: &[f64], total_duration: Option<f64>) -> Vec<f64> {
    let mut sorted: Vec<f64> = times
        .iter()
        .copied()
        .filter(|t| in_range(*t, total_duration))
        .collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut unique: Vec<f64> = Vec::with_capacity(sorted.len());
    for t in sorted {
        if unique.last().map(|last| t - last >= MARKER_MERGE_SECS).unwrap_or(true) {
            unique.push(t);
        }
    }
    unique
}

/// Insert `region`, absorbing every stored region it overlaps or touches. Keeps `regions` sorted.
fn merge_region(regions: &mut Vec<ExcludedRegion>, region: ExcludedRegion) {
    let mut merged = region;
    regions.retain(|r| {
        let overlapping = r.start <= merged.end && r.end >= merged.start;
        if overlapping {
            merged = ExcludedRegion::new(r.start.min(merged.start), r.end.max(merged.end));
        }
        !overlapping
    });
    regions.push(merged);
    regions.sort_by(|a, b| a.start.total_cmp(&b.start));
}

fn set_at(values: &mut Vec<String>, index: usize, value: String) {
    if values.len() <= index {
        values.resize(index + 1, String::new());
    }
    values[index] = value;
}

/// Versioned, undoable editing state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    version: u64,
    state: SessionSnapshot,
    undo_stack: VecDeque<SessionSnapshot>,
    redo_stack: Vec<SessionSnapshot>,
}

impl Session {
    pub fn new(source: Option<PathBuf>, total_duration: Option<f64>) -> Self {
        Self {
            state: SessionSnapshot {
                source,
                total_duration,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.clone()
    }

    pub fn markers(&self) -> &[f64] {
        &self.state.markers
    }

    pub fn excluded_regions(&self) -> &[ExcludedRegion] {
        &self.state.excluded_regions
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Replace the state with `next`, recording history. No-op when nothing changed.
    fn commit(&mut self, next: SessionSnapshot) -> bool {
        if next == self.state {
            return false;
        }
        let previous = std::mem::replace(&mut self.state, next);
        self.undo_stack.push_back(previous);
        if self.undo_stack.len() > HISTORY_LIMIT {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
        self.version += 1;
        true
    }

    fn edit(&mut self, f: impl FnOnce(&mut SessionSnapshot)) -> bool {
        let mut next = self.state.clone();
        f(&mut next);
        self.commit(next)
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo_stack.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.state, previous);
        self.redo_stack.push(current);
        self.version += 1;
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo_stack.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.state, next);
        self.undo_stack.push_back(current);
        self.version += 1;
        true
    }

    pub fn set_total_duration(&mut self, total_duration: Option<f64>) -> bool {
        self.edit(|s| {
            s.total_duration = total_duration;
            s.markers = sorted_unique_markers(&s.markers, total_duration);
        })
    }

    /// Add a split point. Returns `false` if it is out of range or within
    /// [`MARKER_MERGE_SECS`] of an existing marker.
    pub fn add_marker(&mut self, time: f64) -> bool {
        if !in_range(time, self.state.total_duration)
            || self
                .state
                .markers
                .iter()
                .any(|m| (m - time).abs() < MARKER_MERGE_SECS)
        {
            return false;
        }
        self.edit(|s| {
            let at = s.markers.partition_point(|m| *m < time);
            s.markers.insert(at, time);
        })
    }

    pub fn remove_marker(&mut self, index: usize) -> bool {
        if index >= self.state.markers.len() {
            return false;
        }
        self.edit(|s| {
            s.markers.remove(index);
        })
    }

    pub fn set_markers(&mut self, times: &[f64]) -> bool {
        let markers = sorted_unique_markers(times, self.state.total_duration);
        self.edit(|s| s.markers = markers)
    }

    pub fn clear_markers(&mut self) -> bool {
        self.edit(|s| s.markers.clear())
    }

    /// Add an excluded region, merging it with any stored region it overlaps.
    pub fn add_excluded_region(&mut self, start: f64, end: f64) -> Result<bool> {
        if !(start.is_finite() && end.is_finite()) || end <= start {
            return Err(SliceError::Session(format!(
                "excluded region must have end > start (got {:.3}..{:.3})",
                start, end
            )));
        }

        let start = start.max(0.0);
        let end = match self.state.total_duration {
            Some(total) => end.min(total),
            None => end,
        };
        if end <= start {
            return Err(SliceError::Session(format!(
                "excluded region {:.3}..{:.3} lies outside the source",
                start, end
            )));
        }

        Ok(self.edit(|s| merge_region(&mut s.excluded_regions, ExcludedRegion::new(start, end))))
    }

    pub fn remove_excluded_region(&mut self, index: usize) -> bool {
        if index >= self.state.excluded_regions.len() {
            return false;
        }
        self.edit(|s| {
            s.excluded_regions.remove(index);
        })
    }

    pub fn clear_excluded_regions(&mut self) -> bool {
        self.edit(|s| s.excluded_regions.clear())
    }

    pub fn set_track_name(&mut self, index: usize, name: impl Into<String>) -> bool {
        let name = name.into();
        self.edit(|s| set_at(&mut s.track_names, index, name))
    }

    pub fn set_track_artist(&mut self, index: usize, artist: impl Into<String>) -> bool {
        let artist = artist.into();
        self.edit(|s| set_at(&mut s.track_artists, index, artist))
    }

    /// Apply a parsed text tracklist.
    ///
    /// With `replace` and at least one timestamp, timestamps are track start
    /// times: markers become every unique start after 0.1 s and names and
    /// artists are replaced wholesale. Otherwise titles (and non-empty
    /// artists) are laid over the existing tracks in order.
    pub fn apply_tracklist(&mut self, tracks: &[ParsedTrack], replace: bool) -> bool {
        let has_times = tracks.iter().any(|t| t.time.is_some());

        if replace && has_times {
            let starts: Vec<f64> = tracks
                .iter()
                .filter_map(|t| t.time)
                .filter(|t| *t > MARKER_MERGE_SECS)
                .collect();
            let markers = sorted_unique_markers(&starts, self.state.total_duration);
            self.edit(|s| {
                s.markers = markers;
                s.track_names = tracks.iter().map(|t| t.title.clone()).collect();
                s.track_artists = tracks.iter().map(|t| t.artist.clone()).collect();
            })
        } else {
            self.edit(|s| {
                let count = tracks.len().min(s.markers.len() + 1);
                for (i, track) in tracks.iter().take(count).enumerate() {
                    set_at(&mut s.track_names, i, track.title.clone());
                    if !track.artist.is_empty() {
                        set_at(&mut s.track_artists, i, track.artist.clone());
                    }
                }
            })
        }
    }

    /// Use a reference tracklist's titles as track names, in order.
    pub fn apply_tracklist_titles(&mut self, entries: &[TracklistEntry]) -> bool {
        self.edit(|s| {
            let count = entries.len().min(s.markers.len() + 1);
            for (i, entry) in entries.iter().take(count).enumerate() {
                set_at(&mut s.track_names, i, entry.title.clone());
            }
        })
    }

    /// Write the current state (not the history) as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = SessionFile {
            version: self.version,
            state: self.state.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let file: SessionFile = serde_json::from_str(&data)?;
        let mut state = file.state;
        state.markers = sorted_unique_markers(&state.markers, state.total_duration);
        if let Some(bad) = state.excluded_regions.iter().find(|r| r.end <= r.start) {
            return Err(SliceError::Session(format!(
                "excluded region {:.3}..{:.3} has end <= start",
                bad.start, bad.end
            )));
        }
        // Hand-edited files may carry overlapping regions
        let stored = std::mem::take(&mut state.excluded_regions);
        for region in stored {
            merge_region(&mut state.excluded_regions, region);
        }
        Ok(Self {
            version: file.version,
            state,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parsed(time: Option<f64>, artist: &str, title: &str) -> ParsedTrack {
        ParsedTrack {
            time,
            time_label: None,
            artist: artist.to_string(),
            title: title.to_string(),
        }
    }

    #[test]
    fn test_add_marker_keeps_order_and_ignores_near_duplicates() {
        let mut session = Session::new(None, Some(120.0));
        assert!(session.add_marker(90.0));
        assert!(session.add_marker(30.0));
        assert!(!session.add_marker(30.05));
        assert!(!session.add_marker(0.0));
        assert!(!session.add_marker(120.0));
        assert_eq!(session.markers(), &[30.0, 90.0]);
        assert_eq!(session.version(), 2);
    }

    #[test]
    fn test_set_markers_dedups() {
        let mut session = Session::new(None, Some(100.0));
        session.set_markers(&[50.0, 10.0, 10.05, -1.0, 150.0, 50.0]);
        assert_eq!(session.markers(), &[10.0, 50.0]);
        assert!(session.remove_marker(0));
        assert!(!session.remove_marker(5));
        assert_eq!(session.markers(), &[50.0]);
    }

    #[test]
    fn test_excluded_regions_merge() {
        let mut session = Session::new(None, Some(120.0));
        session.add_excluded_region(10.0, 20.0).unwrap();
        session.add_excluded_region(40.0, 45.0).unwrap();
        session.add_excluded_region(15.0, 42.0).unwrap();
        assert_eq!(session.excluded_regions(), &[ExcludedRegion::new(10.0, 45.0)]);

        session.add_excluded_region(100.0, 200.0).unwrap();
        assert_eq!(session.excluded_regions()[1], ExcludedRegion::new(100.0, 120.0));
    }

    #[test]
    fn test_invalid_region_rejected() {
        let mut session = Session::new(None, None);
        assert!(matches!(
            session.add_excluded_region(5.0, 5.0),
            Err(SliceError::Session(_))
        ));
        assert_eq!(session.version(), 0);
    }

    #[test]
    fn test_undo_redo() {
        let mut session = Session::new(None, None);
        session.add_marker(10.0);
        session.add_marker(20.0);
        assert!(session.undo());
        assert_eq!(session.markers(), &[10.0]);
        assert!(session.redo());
        assert_eq!(session.markers(), &[10.0, 20.0]);

        session.undo();
        session.add_marker(30.0);
        assert!(!session.can_redo());
        assert_eq!(session.markers(), &[10.0, 30.0]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut session = Session::new(None, None);
        for i in 1..=60 {
            session.add_marker(i as f64);
        }
        let mut undone = 0;
        while session.undo() {
            undone += 1;
        }
        assert_eq!(undone, HISTORY_LIMIT);
        assert_eq!(session.markers().len(), 10);
    }

    #[test]
    fn test_noop_edit_does_not_bump_version() {
        let mut session = Session::new(None, None);
        session.set_track_name(0, "Intro");
        let version = session.version();
        assert!(!session.set_track_name(0, "Intro"));
        assert_eq!(session.version(), version);
    }

    #[test]
    fn test_apply_tracklist_replace() {
        let mut session = Session::new(None, Some(600.0));
        session.add_marker(42.0);
        let tracks = vec![
            parsed(Some(0.0), "A", "One"),
            parsed(Some(225.0), "B", "Two"),
            parsed(Some(225.0), "", "Dup"),
            parsed(Some(100.0), "C", "Three"),
        ];
        session.apply_tracklist(&tracks, true);
        assert_eq!(session.markers(), &[100.0, 225.0]);
        let snap = session.snapshot();
        assert_eq!(snap.track_names, vec!["One", "Two", "Dup", "Three"]);
        assert_eq!(snap.track_artists, vec!["A", "B", "", "C"]);
    }

    #[test]
    fn test_apply_tracklist_sequential() {
        let mut session = Session::new(None, None);
        session.add_marker(60.0);
        session.set_track_artist(0, "Keep");
        let tracks = vec![
            parsed(None, "", "First"),
            parsed(None, "Guest", "Second"),
            parsed(None, "X", "Ignored"),
        ];
        session.apply_tracklist(&tracks, true);
        let snap = session.snapshot();
        assert_eq!(snap.markers, vec![60.0]);
        assert_eq!(snap.track_names, vec!["First", "Second"]);
        assert_eq!(snap.track_artists, vec!["Keep", "Guest"]);
    }

    #[test]
    fn test_apply_tracklist_titles() {
        let mut session = Session::new(None, None);
        let entries = vec![
            TracklistEntry {
                position: "A1".to_string(),
                title: "Opener".to_string(),
                artists: vec![],
                duration_seconds: 225.0,
            },
            TracklistEntry {
                position: "A2".to_string(),
                title: "Extra".to_string(),
                artists: vec![],
                duration_seconds: 10.0,
            },
        ];
        session.apply_tracklist_titles(&entries);
        assert_eq!(session.snapshot().track_names, vec!["Opener"]);
    }

    #[test]
    fn test_snapshot_plans_segments() {
        let mut session = Session::new(None, Some(120.0));
        session.set_markers(&[30.0, 90.0]);
        session.add_excluded_region(40.0, 45.0).unwrap();
        session.set_track_name(1, "Middle");
        let segments = session.snapshot().plan(&TrackNaming::default()).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].name, "Middle");
        assert_eq!(segments[1].kept_ranges.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SESSION_FILENAME);
        let mut session = Session::new(Some(PathBuf::from("set.wav")), Some(120.0));
        session.set_markers(&[30.0]);
        session.add_excluded_region(40.0, 45.0).unwrap();
        session.save(&path).unwrap();

        let loaded = Session::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), session.snapshot());
        assert_eq!(loaded.version(), session.version());
        assert!(!loaded.can_undo());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SESSION_FILENAME);
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Session::load(&path), Err(SliceError::Session(_))));
    }

    #[test]
    fn test_load_minimal_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SESSION_FILENAME);
        std::fs::write(&path, r#"{"version": 3, "markers": [30.0, 10.0]}"#).unwrap();
        let session = Session::load(&path).unwrap();
        assert_eq!(session.markers(), &[10.0, 30.0]);
        assert_eq!(session.version(), 3);
    }

    #[test]
    fn test_load_merges_overlapping_exclusions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SESSION_FILENAME);
        std::fs::write(
            &path,
            r#"{"version": 1, "markers": [60.0], "excluded_regions": [
                {"start": 70.0, "end": 80.0},
                {"start": 15.0, "end": 25.0},
                {"start": 10.0, "end": 20.0}
            ]}"#,
        )
        .unwrap();

        let session = Session::load(&path).unwrap();
        assert_eq!(
            session.excluded_regions(),
            &[ExcludedRegion::new(10.0, 25.0), ExcludedRegion::new(70.0, 80.0)]
        );
        let segments = session.snapshot().plan(&TrackNaming::default()).unwrap();
        assert_eq!(segments[0].exclusions, vec![ExcludedRegion::new(10.0, 25.0)]);
    }
}
