use std::path::PathBuf;

use crate::models::{ExportEvent, ExportResult, Segment};

#[derive(Debug, Clone, PartialEq)]
pub enum TrackStatus {
    Pending,
    /// Percent complete, 0..=100
    Encoding(f64),
    Retrying { attempt: u32, message: String },
    Done(ExportResult),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Main,
    About,
}

/// How the export run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finished { output_path: PathBuf },
    Failed { message: String },
}

pub struct App {
    /// `(display name, status)` per planned track, in track order
    pub tracks: Vec<(String, TrackStatus)>,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub view: View,
    pub selected: usize,
    pub scroll_offset: usize,
    pub should_quit: bool,
    pub cancel_requested: bool,
    pub outcome: Option<Outcome>,
    /// Visible height of the track table (updated each frame by the renderer)
    pub visible_rows: usize,
}

impl App {
    pub fn new(segments: &[Segment], source: PathBuf, destination: PathBuf) -> Self {
        let tracks = segments
            .iter()
            .map(|s| (s.file_name.clone(), TrackStatus::Pending))
            .collect();
        Self {
            tracks,
            source,
            destination,
            view: View::Main,
            selected: 0,
            scroll_offset: 0,
            should_quit: false,
            cancel_requested: false,
            outcome: None,
            visible_rows: 20,
        }
    }

    fn track_mut(&mut self, track_number: usize) -> Option<&mut TrackStatus> {
        track_number
            .checked_sub(1)
            .and_then(|i| self.tracks.get_mut(i))
            .map(|(_, status)| status)
    }

    pub fn apply(&mut self, event: ExportEvent) {
        match event {
            ExportEvent::Init { .. } => {}
            ExportEvent::StartTrack { track_number, .. } => {
                if let Some(status) = self.track_mut(track_number) {
                    *status = TrackStatus::Encoding(0.0);
                }
                self.selected = track_number.saturating_sub(1);
                self.ensure_visible();
            }
            ExportEvent::EncodeProgress {
                track_number,
                percent,
            } => {
                if let Some(status) = self.track_mut(track_number) {
                    *status = TrackStatus::Encoding(percent);
                }
            }
            ExportEvent::RetryScheduled {
                track_number,
                attempt,
                message,
            } => {
                if let Some(status) = self.track_mut(track_number) {
                    *status = TrackStatus::Retrying { attempt, message };
                }
            }
            ExportEvent::TrackCompleted { result } => {
                if let Some(status) = self.track_mut(result.track_number) {
                    *status = TrackStatus::Done(result);
                }
            }
            ExportEvent::Finished { report } => {
                self.outcome = Some(Outcome::Finished {
                    output_path: report.output_path,
                });
            }
            ExportEvent::Failed {
                track_number,
                message,
            } => {
                if let Some(status) = track_number.and_then(|n| self.track_mut(n)) {
                    *status = TrackStatus::Failed(message.clone());
                }
                self.outcome = Some(Outcome::Failed { message });
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn completed_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|(_, s)| matches!(s, TrackStatus::Done(_)))
            .count()
    }

    pub fn select_next(&mut self) {
        if !self.tracks.is_empty() {
            self.selected = (self.selected + 1).min(self.tracks.len() - 1);
            self.ensure_visible();
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
        self.ensure_visible();
    }

    /// Adjust scroll_offset so that self.selected is within the visible window.
    fn ensure_visible(&mut self) {
        if self.visible_rows == 0 {
            return;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + self.visible_rows {
            self.scroll_offset = self.selected - self.visible_rows + 1;
        }
    }
}
