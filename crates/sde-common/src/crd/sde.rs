//! Sde CRD types
//!
//! An `Sde` describes one environment: the namespace it lives in is the scope
//! of the managed databases, and `spec.databaseCount` is the number of newest
//! versioned databases to keep. Everything older is retired by the controller.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of an environment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sde.sde.domain",
    version = "v1beta1",
    kind = "Sde",
    plural = "sdes",
    namespaced,
    status = "SdeStatus",
    printcolumn = r#"{"name":"Retain","type":"integer","jsonPath":".spec.databaseCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SdeSpec {
    /// Number of newest managed databases to retain.
    ///
    /// A value of 0 retires every managed database. There is no safety floor:
    /// the operator applies the declared count verbatim.
    #[schemars(range(min = 0))]
    pub database_count: i64,
}

/// Observed state of an environment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SdeStatus {
    /// References to cleanup Jobs currently running for this environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active: Vec<ObjectReference>,
}

impl Sde {
    /// Name of the ConfigMap holding the cleanup script
    pub fn script_config_name(&self) -> String {
        format!("{}-run-scripts", self.name_any())
    }

    /// Name of the cleanup Job
    pub fn cleanup_job_name(&self) -> String {
        format!("{}-db-cleanup", self.name_any())
    }

    /// Whether `status.active` currently references any Job
    pub fn has_active_jobs(&self) -> bool {
        self.status.as_ref().is_some_and(|s| !s.active.is_empty())
    }
}

/// Name of the ConfigMap carrying non-secret connection settings for a scope
pub fn connection_config_map_name(scope: &str) -> String {
    format!("{}-db-configmap", scope)
}

/// Name of the Secret carrying the administrative credential for a scope
pub fn connection_secret_name(scope: &str) -> String {
    format!("{}-database-secrets", scope)
}
