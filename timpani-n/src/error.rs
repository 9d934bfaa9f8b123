//! Structured error types at the crate's module boundaries: every fallible
//! constructor returns one of these instead of an out-of-band sentinel
//! value.

use thiserror::Error;

/// Failures while assembling a [`crate::config::RunConfig`] from CLI flags,
/// a fixture file, or interactive stdin prompts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("task {index}: compute time {compute_ms}ms exceeds period {period_ms}ms")]
    ComputeExceedsPeriod {
        index: usize,
        compute_ms: u64,
        period_ms: u64,
    },

    #[error("no tasks specified")]
    NoTasks,

    #[error("unknown scheduling algorithm {0:?} (expected one of rma, edf, sct)")]
    UnknownAlgorithm(String),

    #[error("invalid integer in interactive input: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("failed to read fixture file {path}: {source}")]
    FixtureIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fixture file {path}: {source}")]
    FixtureParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to read from stdin: {0}")]
    StdinIo(#[source] std::io::Error),
}

/// Failures bringing up the OS-level resources a test run needs before any
/// task worker can be trusted to run (thread spawn, priority range checks).
#[derive(Debug, Error)]
pub enum ResourceInitError {
    #[error("task count {0} exceeds the realtime priority range available on this system")]
    PriorityRangeExhausted(usize),

    #[error("failed to spawn task worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}
