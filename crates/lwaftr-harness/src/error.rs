use std::path::PathBuf;

use thiserror::Error;

use crate::subject::Exit;

// ── Errors ──────────────────────────────────────────────────────────

/// Everything that can stop a harness run.
///
/// Every variant is fatal for the batch that raised it. Missing resources
/// and mode incompatibilities are not errors; they surface as
/// [`crate::report::RunOutcome::Skipped`].
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Malformed input detected before any subprocess was spawned.
    #[error("usage error: {0}")]
    Usage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The subject exited unsuccessfully.
    #[error("{message} (exit {exit})")]
    SubjectFailed { exit: Exit, message: String },

    /// Produced output differs from the golden fixture.
    #[error("{message}\n{listing}")]
    Mismatch {
        message: String,
        actual: PathBuf,
        golden: PathBuf,
        listing: String,
    },

    #[error("daemon: {0}")]
    Daemon(String),

    #[error("interface {name}: {source}")]
    Interface {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
