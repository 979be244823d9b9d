//! Cleanup error types

/// Errors raised while talking to the data store
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// The administrative connection could not be opened or failed its ping
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// `host:port/database` that was dialed
        endpoint: String,
        /// Underlying driver error
        source: sqlx::Error,
    },

    /// Enumerating managed databases failed
    #[error("failed to list managed databases: {source}")]
    Query {
        /// Underlying driver error
        source: sqlx::Error,
    },

    /// A drop failed; drops before `index` completed and are not undone
    #[error("failed to drop database #{index} '{identifier}': {source}")]
    Drop {
        /// Position of the failed target in the drop sequence
        index: usize,
        /// Name of the database that could not be dropped
        identifier: String,
        /// Underlying driver error
        source: sqlx::Error,
    },
}

impl CleanupError {
    /// Stage of the cleanup that failed, for log fields
    pub fn stage(&self) -> &'static str {
        match self {
            CleanupError::Connect { .. } => "connect",
            CleanupError::Query { .. } => "enumerate",
            CleanupError::Drop { .. } => "drop",
        }
    }
}
