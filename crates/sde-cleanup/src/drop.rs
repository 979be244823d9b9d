//! Dropping surplus databases
//!
//! Each database is dropped with its own statement. The sequence stops at the
//! first failure and reports which target failed; earlier drops stay done.

use tracing::{info, warn};

use crate::error::CleanupError;
use crate::postgres::DatabaseCatalog;
use crate::version::DatabaseIdentifier;

/// SQLSTATE for "database does not exist"
const INVALID_CATALOG_NAME: &str = "3D000";

/// Quote a name as a PostgreSQL identifier.
///
/// Embedded double quotes are doubled. Quoting is required for managed names
/// since the dots of their versions are not valid in bare identifiers.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Statement dropping one database.
///
/// `IF EXISTS` makes re-issuing the drop safe when an overlapping pass
/// already removed the database.
pub fn drop_statement(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {}", quote_identifier(name))
}

/// Drop `targets` in order, one statement each.
///
/// Returns the number of databases dropped. A database that vanished between
/// enumeration and drop counts as dropped.
pub async fn drop_databases(
    catalog: &mut dyn DatabaseCatalog,
    targets: &[DatabaseIdentifier],
) -> Result<usize, CleanupError> {
    for (index, target) in targets.iter().enumerate() {
        match catalog.drop_database(target.as_str()).await {
            Ok(()) => info!(database = %target, "Dropped database"),
            Err(e) if is_missing_database(&e) => {
                warn!(database = %target, "Database already absent, skipping")
            }
            Err(source) => {
                return Err(CleanupError::Drop {
                    index,
                    identifier: target.to_string(),
                    source,
                })
            }
        }
    }
    Ok(targets.len())
}

fn is_missing_database(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == INVALID_CATALOG_NAME)
}
