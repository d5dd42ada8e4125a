// ABOUTME: Error taxonomy for the dump pipeline
// ABOUTME: Separates pre-flight, connection, query, dump, and I/O failures

use std::path::PathBuf;
use std::time::Duration;

/// Every way a backup run can fail.
///
/// Only the capability probe recovers from its own errors; everything else
/// propagates to `main`, which prints the message and exits non-zero.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// A required parameter is missing or invalid. Reported with usage text.
    #[error("{0}")]
    Config(String),

    /// The database is unreachable or rejected the credentials.
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// A metadata query failed, typically because of a malformed predicate.
    #[error("{context}: {source}")]
    Query {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// The external dump tool could not be started or exited unsuccessfully.
    #[error("{0}")]
    Dump(String),

    /// Reading an intermediate file or writing the output failed.
    #[error("{context} '{}': {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run-wide dump deadline expired.
    #[error("Dump did not finish within {0:?}")]
    TimedOut(Duration),

    /// The operator interrupted the run.
    #[error("Interrupted, intermediate files removed")]
    Cancelled,
}

impl BackupError {
    pub fn query(context: impl Into<String>, source: sqlx::Error) -> Self {
        BackupError::Query {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// True when the error should be followed by usage text.
    pub fn is_config(&self) -> bool {
        matches!(self, BackupError::Config(_))
    }
}

pub type Result<T, E = BackupError> = std::result::Result<T, E>;
