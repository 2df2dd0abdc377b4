//! Error types for the line-crossing counter.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid or unreadable configuration. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Reasons a single detection is rejected before tracking. Never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("bounding box has non-finite coordinates")]
    NonFinite,

    #[error("degenerate bounding box {width}x{height}")]
    Degenerate { width: f32, height: f32 },

    #[error("confidence {0} outside [0, 1]")]
    Confidence(f32),

    #[error("class id {0} is not in the whitelist")]
    UnknownClass(u32),
}

/// Numeric failure inside the motion model.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterError {
    #[error("innovation covariance is singular")]
    SingularInnovation,
}

/// Failure writing count snapshots to their persistence sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("sink is closed")]
    Closed,
}

/// Failure reading recorded detections.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("frame {frame} has timestamp {timestamp}, earlier than the previous frame")]
    OutOfOrder { frame: u64, timestamp: f64 },
}

/// Fatal errors that end a counting run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("snapshot sink failed before any successful write: {0}")]
    Sink(#[from] SinkError),

    #[error("frame source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}
