//! Reconcile error type

use std::time::Duration;

use sde_cleanup::CleanupError;

/// Failure of one reconcile pass
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Kubernetes API, lookup, provisioning or validation failure
    #[error("{0}")]
    Common(#[from] sde_common::Error),

    /// A direct cleanup stage failed against the data store
    #[error("cleanup failed: {0}")]
    Cleanup(#[from] CleanupError),

    /// The pass was cancelled by controller shutdown
    #[error("cleanup pass cancelled")]
    Cancelled,

    /// The pass ran past its deadline
    #[error("cleanup pass exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    /// The Sde has no namespace, so it has no scope
    #[error("Sde {0} has no namespace")]
    MissingNamespace(String),
}

impl ReconcileError {
    /// Whether the pass can only succeed after someone edits configuration
    pub fn needs_intervention(&self) -> bool {
        match self {
            ReconcileError::Common(e) => !e.is_retryable(),
            ReconcileError::MissingNamespace(_) => true,
            _ => false,
        }
    }

    /// Short label for the failing stage, used as a log and event field
    pub fn stage(&self) -> &'static str {
        match self {
            ReconcileError::Common(sde_common::Error::Validation { .. }) => "validate",
            ReconcileError::Common(sde_common::Error::Provision { .. }) => "provision",
            ReconcileError::Common(sde_common::Error::NotFound { .. }) => "lookup",
            ReconcileError::Common(_) => "kubernetes",
            ReconcileError::Cleanup(e) => e.stage(),
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::DeadlineExceeded(_) => "deadline",
            ReconcileError::MissingNamespace(_) => "validate",
        }
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(e: kube::Error) -> Self {
        ReconcileError::Common(sde_common::Error::from(e))
    }
}
