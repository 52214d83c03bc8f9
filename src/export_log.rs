//! Per-export log file written next to the exported tracks.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::warn;

pub const EXPORT_LOG_NAME: &str = "export.log";

/// Appends `[timestamp] message` lines to `export.log`.
///
/// Write failures are reported through `tracing` and otherwise ignored; a
/// broken log never fails an export.
pub struct ExportLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl ExportLog {
    /// Open (or create) `export.log` inside `dir` for appending.
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = dir.as_ref().join(EXPORT_LOG_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// A log that only remembers where it would have written.
    pub fn disabled(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(EXPORT_LOG_NAME),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&mut self, message: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let line = format_line(&Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true), message);
        let result = writeln!(writer, "{}", line).and_then(|_| writer.flush());
        if let Err(e) = result {
            warn!("Could not write to {}: {}", self.path.display(), e);
            self.writer = None;
        }
    }
}

fn format_line(timestamp: &str, message: &str) -> String {
    format!("[{}] {}", timestamp, message)
}
