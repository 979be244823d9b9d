//! Common types for the SDE operator: CRDs, errors, events and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod telemetry;

pub use error::Error;

/// Field manager used for server-side apply and the events reporting component
pub const FIELD_MANAGER: &str = "sde-controller";

/// Label key marking resources created by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label key naming the Sde environment that owns a resource
pub const ENVIRONMENT_LABEL: &str = "sde.domain/environment";
