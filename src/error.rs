//! Error types for detection, planning and export.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for autoslice operations
pub type Result<T> = std::result::Result<T, SliceError>;

#[derive(Error, Debug)]
pub enum SliceError {
    /// Input is too short for the requested window or analysis
    #[error("Insufficient audio data: {0}")]
    InsufficientData(String),

    /// A planned segment has no audio left once exclusions are removed
    #[error("Track {track_number} is completely excluded; cannot export an empty track")]
    EmptySegment { track_number: usize },

    #[error("Output directory is not writable: {} ({reason})", path.display())]
    OutputNotWritable { path: PathBuf, reason: String },

    /// A single transcoder attempt failed
    #[error("Transcode failed: {0}")]
    Transcode(String),

    /// A segment exhausted its attempt budget; the export run is aborted
    #[error("Failed to encode track {track_number}: {message}")]
    ExportFatal { track_number: usize, message: String },

    #[error("Export cancelled after {completed} track(s)")]
    Cancelled { completed: usize },

    #[error("Tag write failed: {0}")]
    TagWrite(String),

    #[error("Metadata lookup failed: {0}")]
    Lookup(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid session: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<symphonia::core::errors::Error> for SliceError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<lofty::error::LoftyError> for SliceError {
    fn from(err: lofty::error::LoftyError) -> Self {
        Self::TagWrite(err.to_string())
    }
}

impl From<reqwest::Error> for SliceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Lookup(err.to_string())
    }
}

impl From<serde_json::Error> for SliceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Session(err.to_string())
    }
}

impl From<toml::de::Error> for SliceError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
