//! Administrative PostgreSQL connection
//!
//! One connection per cleanup pass, opened against the control database
//! (never one of the managed databases), pinged before use, and closed before
//! the pass returns. It is only used to enumerate and drop databases.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection, Executor};
use tracing::{debug, warn};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::error::CleanupError;
use crate::version::DatabaseIdentifier;

/// Catalog query for managed database names.
///
/// `~` is a true POSIX regex match against `pg_database`; templates are never
/// candidates.
pub const LIST_MANAGED_SQL: &str =
    "SELECT datname FROM pg_database WHERE datistemplate = false AND datname ~ $1";

/// TLS mode for the administrative connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain TCP only
    #[default]
    Disable,
    /// TLS if the server offers it
    Prefer,
    /// TLS required, certificate not verified
    Require,
    /// TLS required, certificate chain verified
    VerifyCa,
    /// TLS required, certificate chain and host name verified
    VerifyFull,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" | "disabled" | "false" => Ok(TlsMode::Disable),
            "prefer" => Ok(TlsMode::Prefer),
            "require" | "enabled" | "true" => Ok(TlsMode::Require),
            "verify-ca" => Ok(TlsMode::VerifyCa),
            "verify-full" => Ok(TlsMode::VerifyFull),
            other => Err(format!("unknown TLS mode '{}'", other)),
        }
    }
}

impl From<TlsMode> for PgSslMode {
    fn from(mode: TlsMode) -> Self {
        match mode {
            TlsMode::Disable => PgSslMode::Disable,
            TlsMode::Prefer => PgSslMode::Prefer,
            TlsMode::Require => PgSslMode::Require,
            TlsMode::VerifyCa => PgSslMode::VerifyCa,
            TlsMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// Settings for the administrative connection
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Data store host
    pub host: String,
    /// Data store port
    pub port: u16,
    /// Administrative user
    pub user: String,
    /// Administrative password
    pub password: String,
    /// Control database to connect to
    pub database: String,
    /// TLS mode
    pub tls: TlsMode,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("tls", &self.tls)
            .finish()
    }
}

impl ConnectionConfig {
    /// `host:port/database`, for logs and errors
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(self.tls.into())
            .application_name("sde-controller")
    }
}

/// Operations the cleanup needs from the data store catalog
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait DatabaseCatalog: Send {
    /// Names of databases whose name matches the POSIX regex `pattern`
    async fn list_matching(&mut self, pattern: &str) -> Result<Vec<String>, sqlx::Error>;

    /// Drop one database
    async fn drop_database(&mut self, identifier: &str) -> Result<(), sqlx::Error>;

    /// Release the connection. Calls after this fail.
    async fn close(&mut self);
}

/// Opens administrative connections
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait AdminConnector: Send + Sync {
    /// Open and ping a connection described by `config`
    async fn open(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn DatabaseCatalog>, CleanupError>;
}

/// Connector producing [`AdminConnection`]s
#[derive(Clone, Copy, Debug, Default)]
pub struct PostgresConnector;

#[async_trait]
impl AdminConnector for PostgresConnector {
    async fn open(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn DatabaseCatalog>, CleanupError> {
        Ok(Box::new(AdminConnection::open(config).await?))
    }
}

/// A single administrative session owned by one cleanup pass
pub struct AdminConnection {
    conn: Option<PgConnection>,
    endpoint: String,
}

impl AdminConnection {
    /// Connect and verify liveness.
    ///
    /// A failed ping closes the half-open connection and surfaces as
    /// [`CleanupError::Connect`].
    pub async fn open(config: &ConnectionConfig) -> Result<Self, CleanupError> {
        let endpoint = config.endpoint();
        let mut conn = PgConnection::connect_with(&config.connect_options())
            .await
            .map_err(|source| CleanupError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        if let Err(source) = conn.ping().await {
            let _ = conn.close().await;
            return Err(CleanupError::Connect { endpoint, source });
        }

        debug!(endpoint = %endpoint, "Opened administrative connection");
        Ok(Self {
            conn: Some(conn),
            endpoint,
        })
    }

    /// `host:port/database` of this connection
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn live(&mut self) -> Result<&mut PgConnection, sqlx::Error> {
        self.conn.as_mut().ok_or_else(|| {
            sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "administrative connection already closed",
            ))
        })
    }
}

#[async_trait]
impl DatabaseCatalog for AdminConnection {
    async fn list_matching(&mut self, pattern: &str) -> Result<Vec<String>, sqlx::Error> {
        let conn = self.live()?;
        sqlx::query_scalar::<_, String>(LIST_MANAGED_SQL)
            .bind(pattern)
            .fetch_all(conn)
            .await
    }

    async fn drop_database(&mut self, identifier: &str) -> Result<(), sqlx::Error> {
        let statement = crate::drop::drop_statement(identifier);
        let conn = self.live()?;
        conn.execute(sqlx::raw_sql(&statement)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            match conn.close().await {
                Ok(()) => debug!(endpoint = %self.endpoint, "Closed administrative connection"),
                Err(e) => warn!(
                    endpoint = %self.endpoint,
                    error = %e,
                    "Error closing administrative connection"
                ),
            }
        }
    }
}

/// POSIX regex matching managed database names: the escaped prefix followed
/// by a `MAJOR.MINOR.PATCH` version and any suffix.
pub fn managed_name_pattern(prefix: &str) -> String {
    format!(r"^{}[0-9]+\.[0-9]+\.[0-9]+.*$", regex::escape(prefix))
}

/// Enumerate managed databases. Order is whatever the catalog returns.
pub async fn list_managed(
    catalog: &mut dyn DatabaseCatalog,
    prefix: &str,
) -> Result<Vec<DatabaseIdentifier>, CleanupError> {
    let pattern = managed_name_pattern(prefix);
    let names = catalog
        .list_matching(&pattern)
        .await
        .map_err(|source| CleanupError::Query { source })?;

    debug!(count = names.len(), pattern = %pattern, "Enumerated managed databases");
    Ok(names.into_iter().map(DatabaseIdentifier::from).collect())
}
