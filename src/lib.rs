pub mod config;
pub mod decode;
pub mod error;
pub mod export;
pub mod export_log;
pub mod format;
pub mod gaps;
pub mod lookup;
pub mod loudness;
pub mod matcher;
pub mod models;
pub mod planner;
pub mod session;
pub mod tagging;
pub mod transcode;
pub mod tui;

pub use error::{Result, SliceError};
