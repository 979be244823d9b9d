//! Connection settings for the direct cleanup path
//!
//! Read fresh on every pass from the scope's connection ConfigMap and
//! credential Secret, so an edited Secret takes effect on the next event.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use sde_cleanup::{ConnectionConfig, TlsMode};
use sde_common::crd::{connection_config_map_name, connection_secret_name};
use sde_common::Error;

use crate::error::ReconcileError;
use crate::kube_client::SdeKubeClient;
use crate::resources::PASSWORD_KEY;

/// Data store host
pub const HOST_KEY: &str = "DATABASE_HOST";
/// Data store port
pub const PORT_KEY: &str = "DATABASE_PORT";
/// Administrative user
pub const USER_KEY: &str = "ADMIN_DATABASE_USER";
/// Control database, defaults to [`DEFAULT_ADMIN_DATABASE`]
pub const DATABASE_KEY: &str = "ADMIN_DATABASE_NAME";
/// TLS mode, defaults to `disable`
pub const SSLMODE_KEY: &str = "DATABASE_SSLMODE";

/// Control database used when the ConfigMap does not name one
pub const DEFAULT_ADMIN_DATABASE: &str = "postgres";

/// Assemble the administrative connection settings for `scope`.
///
/// A missing ConfigMap or Secret is `NotFound`; a missing key or a value
/// that does not parse is a validation error naming the key.
pub async fn load_connection_config(
    kube: &dyn SdeKubeClient,
    environment: &str,
    scope: &str,
) -> Result<ConnectionConfig, ReconcileError> {
    let cm_name = connection_config_map_name(scope);
    let config_map = kube
        .get_config_map(scope, &cm_name)
        .await?
        .ok_or_else(|| Error::not_found("ConfigMap", scope, &cm_name))?;

    let secret_name = connection_secret_name(scope);
    let secret = kube
        .get_secret(scope, &secret_name)
        .await?
        .ok_or_else(|| Error::not_found("Secret", scope, &secret_name))?;

    let data = config_map.data.unwrap_or_default();
    let required = |key: &str| -> Result<String, Error> {
        data.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::validation_for_field(
                    environment,
                    key,
                    format!("{} is missing from ConfigMap {}", key, cm_name),
                )
            })
    };

    let host = required(HOST_KEY)?;
    let port = required(PORT_KEY)?.parse::<u16>().map_err(|e| {
        Error::validation_for_field(environment, PORT_KEY, format!("invalid port: {}", e))
    })?;
    let user = required(USER_KEY)?;
    let database =
        optional(&data, DATABASE_KEY).unwrap_or_else(|| DEFAULT_ADMIN_DATABASE.to_string());
    let tls = match optional(&data, SSLMODE_KEY) {
        Some(mode) => mode
            .parse::<TlsMode>()
            .map_err(|e| Error::validation_for_field(environment, SSLMODE_KEY, e))?,
        None => TlsMode::default(),
    };
    let password = secret_value(&secret, PASSWORD_KEY).ok_or_else(|| {
        Error::validation_for_field(
            environment,
            PASSWORD_KEY,
            format!("{} is missing from Secret {}", PASSWORD_KEY, secret_name),
        )
    })??;

    debug!(host = %host, port, database = %database, tls = ?tls, "Loaded connection settings");

    Ok(ConnectionConfig {
        host,
        port,
        user,
        password,
        database,
        tls,
    })
}

fn optional(data: &BTreeMap<String, String>, key: &str) -> Option<String> {
    data.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Value of `key` from `data`, falling back to `stringData`.
///
/// Trailing newlines are stripped, as `kubectl create secret --from-file`
/// usually leaves one.
fn secret_value(secret: &Secret, key: &str) -> Option<Result<String, Error>> {
    let raw = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| {
            String::from_utf8(b.0.clone())
                .map_err(|_| Error::serialization(format!("{} is not valid UTF-8", key)))
        })
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|s| Ok(s.clone()))
        })?;

    Some(raw.map(|v| v.trim_end_matches(['\r', '\n']).to_string()))
}
