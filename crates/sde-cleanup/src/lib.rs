//! Retention of versioned databases
//!
//! Ranks database names by the semantic version embedded in them, decides
//! which of them fall outside the retention count, and drops those through a
//! single administrative PostgreSQL connection:
//!
//! - [`version`] - version extraction and stable ordering of identifiers
//! - [`policy`] - which prefix of the ordered list is surplus
//! - [`postgres`] - connection settings, the administrative connection and
//!   enumeration of managed databases
//! - [`drop`] - one-at-a-time drops with partial-failure reporting

#![warn(missing_docs)]

pub mod drop;
pub mod error;
pub mod policy;
pub mod postgres;
pub mod version;

pub use drop::{drop_databases, drop_statement, quote_identifier};
pub use error::CleanupError;
pub use policy::{plan_retention, select_for_deletion, RetentionPlan};
pub use postgres::{
    list_managed, managed_name_pattern, AdminConnection, AdminConnector, ConnectionConfig,
    DatabaseCatalog, PostgresConnector, TlsMode,
};
#[cfg(any(test, feature = "testing"))]
pub use postgres::{MockAdminConnector, MockDatabaseCatalog};
pub use version::{compare, embedded_version, sort_by_version, DatabaseIdentifier};

use tracing::info;

/// Outcome of one retention run against the data store
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Managed databases kept, oldest first
    pub retained: Vec<DatabaseIdentifier>,
    /// Managed databases dropped, in the order they were dropped
    pub dropped: Vec<DatabaseIdentifier>,
}

/// Enumerate managed databases, order them and drop everything beyond
/// `desired_count`.
///
/// Drops stop at the first failure; databases dropped before it stay dropped.
pub async fn run_retention(
    catalog: &mut dyn DatabaseCatalog,
    prefix: &str,
    desired_count: i64,
) -> Result<CleanupReport, CleanupError> {
    let live = list_managed(catalog, prefix).await?;
    let plan = plan_retention(live, desired_count);

    info!(
        retained = plan.retained.len(),
        surplus = plan.to_drop.len(),
        desired_count,
        "Computed retention plan"
    );

    drop_databases(catalog, &plan.to_drop).await?;

    Ok(CleanupReport {
        retained: plan.retained,
        dropped: plan.to_drop,
    })
}
