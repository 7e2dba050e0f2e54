use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Datapoint keys or value shapes do not match the dataset spec, or two
    /// specs that must agree differ.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("index {index} out of range (len {len})")]
    Index { index: u64, len: u64 },

    /// A sub-range of a list-valued key falls outside its element count.
    #[error("range {lo}..{hi} out of bounds for key '{key}' with {count} elements")]
    Range {
        key: String,
        lo: u64,
        hi: u64,
        count: u64,
    },

    #[error("{0} is closed")]
    Closed(&'static str),

    /// A write failed partway through, so the writer's view of the file can no
    /// longer be trusted. Data made durable by earlier flushes stays readable.
    #[error("{0} is poisoned by an earlier write failure")]
    Poisoned(&'static str),

    #[error("shard {shard} is outside this writer's shard window (stop {stop})")]
    Capacity { shard: u64, stop: u64 },

    /// Header, index, or refs are missing, truncated, or inconsistent.
    #[error("format error in {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("spec file error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
