//! Fatal error cases for index building, motif expansion, and the scan pipeline.
//!
//! Every variant here is process-fatal: callers in this crate propagate with `?`
//! and the binary prints the final error and exits 1 (see `main.rs`).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotifScanError {
    #[error("could not open {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not stat {path}: {source}")]
    StatFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not memory-map {path}: {source}")]
    MapFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed FASTA at line {line}: {reason}")]
    MalformedFasta { line: u64, reason: String },

    #[error("malformed index file {path} at line {line}: expected 5 tab-separated fields")]
    MalformedIndex { path: PathBuf, line: u64 },

    #[error("sequence {0:?} not found in index")]
    NameNotFound(String),

    #[error("duplicate sequence name {0:?} in FASTA index")]
    DuplicateName(String),

    #[error("invalid motif character {ch:?} at position {pos}")]
    InvalidMotif { ch: char, pos: usize },

    #[error("motif expands to more than {max} patterns")]
    TooManyPatterns { max: usize },

    #[error("thread pool queue is full")]
    QueueFull,

    #[error("thread pool queue is closed")]
    QueueClosed,

    #[error("a worker panicked while processing a job")]
    WorkerPanic,

    #[error("failed writing scan output: {0}")]
    OutputWriteFailed(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MotifScanError>;
