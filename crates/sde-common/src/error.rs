//! Error types for the SDE operator
//!
//! Errors carry the environment and resource they concern so that a failed
//! reconcile pass can be logged meaningfully without extra context.

use thiserror::Error;

/// Main error type for operator operations against the Kubernetes API
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A resource the pass depends on does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (e.g. "ConfigMap")
        kind: String,
        /// Resource name
        name: String,
        /// Namespace the resource was looked up in
        namespace: String,
    },

    /// A supporting resource could not be created
    #[error("failed to provision {resource}: {message}")]
    Provision {
        /// Resource being created (e.g. "Job/staging-db-cleanup")
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid environment spec or connection settings
    #[error("validation error for {environment}: {message}")]
    Validation {
        /// Name of the environment with invalid configuration
        environment: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field or key (e.g. "spec.databaseCount", "DATABASE_PORT")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "reconciler", "runner")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for a namespaced resource
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a provisioning error for the given resource
    pub fn provision(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provision {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with environment context and field path
    pub fn validation_for_field(
        environment: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            environment: environment.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec or config fix.
    /// Missing resources may appear later, so they are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 409
            ),
            Error::NotFound { .. } => true,
            Error::Provision { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

/// Whether a kube error is an API error with the given HTTP status code
pub fn is_api_code(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == code)
}

/// Whether a kube error means the object already exists (HTTP 409)
pub fn is_already_exists(error: &kube::Error) -> bool {
    is_api_code(error, 409)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} error", reason),
            reason: reason.to_string(),
            code,
        })
    }

    /// Story: a missing connection ConfigMap names exactly what is missing
    #[test]
    fn story_not_found_names_the_missing_resource() {
        let err = Error::not_found("ConfigMap", "team-a", "team-a-db-configmap");
        assert_eq!(
            err.to_string(),
            "ConfigMap team-a/team-a-db-configmap not found"
        );
        assert!(err.is_retryable());
    }

    /// Story: provisioning failures say which object could not be created
    #[test]
    fn story_provision_errors_identify_resource() {
        let err = Error::provision("Job/staging-db-cleanup", "quota exceeded");
        assert!(err.to_string().contains("Job/staging-db-cleanup"));
        assert!(err.to_string().contains("quota exceeded"));
        assert!(err.is_retryable());
    }

    /// Story: bad connection settings are not retried until fixed
    #[test]
    fn story_validation_errors_are_permanent() {
        let err = Error::validation_for_field("staging", "DATABASE_PORT", "not a number: abc");
        assert!(!err.is_retryable());
        match &err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("DATABASE_PORT")),
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn kube_conflict_and_not_found_are_retryable() {
        assert!(Error::from(api_error(404, "NotFound")).is_retryable());
        assert!(Error::from(api_error(409, "AlreadyExists")).is_retryable());
        assert!(!Error::from(api_error(403, "Forbidden")).is_retryable());
        assert!(Error::from(api_error(500, "InternalError")).is_retryable());
    }

    #[test]
    fn already_exists_detects_409_only() {
        assert!(is_already_exists(&api_error(409, "AlreadyExists")));
        assert!(!is_already_exists(&api_error(404, "NotFound")));
    }

    #[test]
    fn serialization_errors_are_not_retryable() {
        assert!(!Error::serialization("invalid json").is_retryable());
    }

    #[test]
    fn internal_error_names_its_context() {
        let err = Error::internal_with_context("provisioner", "Sde staging has no UID");
        assert_eq!(
            err.to_string(),
            "internal error [provisioner]: Sde staging has no UID"
        );
    }
}
