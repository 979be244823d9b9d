//! Sde controller
//!
//! Reconciles `Sde` environments toward their declared database retention:
//! - Provisions the cleanup script ConfigMap and a cleanup Job per environment
//! - Polls the Job and records it in `status.active` while it runs
//! - Alternatively drops surplus databases in-process over one administrative
//!   PostgreSQL connection per pass

pub mod connection;
pub mod controller;
pub mod direct;
pub mod error;
pub mod kube_client;
pub mod provisioner;
pub mod resources;
pub mod strategy;

pub use controller::{error_policy, reconcile, reconcile_pass, Context, ContextBuilder, Directive};
pub use error::ReconcileError;
pub use provisioner::{ensure_job, ensure_script_config, EnsureOutcome};
pub use strategy::{CleanupSettings, CleanupStrategy};
