//! Direct cleanup: drop surplus databases from inside the controller
//!
//! The pass owns one administrative connection. Opening it and running the
//! retention both race the controller's cancellation token and a single
//! deadline; whichever way the race ends, the connection is closed before
//! the pass returns.

use kube::ResourceExt;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use sde_cleanup::{run_retention, CleanupReport};
use sde_common::crd::Sde;

use crate::connection::load_connection_config;
use crate::controller::Context;
use crate::error::ReconcileError;

/// Retire the surplus databases of `sde` over a fresh administrative connection.
pub async fn run_direct_cleanup(
    ctx: &Context,
    sde: &Sde,
    namespace: &str,
) -> Result<CleanupReport, ReconcileError> {
    let settings = &ctx.settings;
    let deadline = Instant::now() + settings.pass_timeout;

    let config = load_connection_config(ctx.kube.as_ref(), &sde.name_any(), namespace).await?;

    let mut catalog = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(ReconcileError::Cancelled),
        opened = timeout_at(deadline, ctx.connector.open(&config)) => match opened {
            Ok(result) => result?,
            Err(_) => return Err(ReconcileError::DeadlineExceeded(settings.pass_timeout)),
        },
    };
    debug!(endpoint = %config.endpoint(), "Administrative connection open");

    let outcome = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(ReconcileError::Cancelled),
        ran = timeout_at(
            deadline,
            run_retention(&mut *catalog, &settings.database_prefix, sde.spec.database_count),
        ) => match ran {
            Ok(result) => result.map_err(ReconcileError::from),
            Err(_) => Err(ReconcileError::DeadlineExceeded(settings.pass_timeout)),
        },
    };

    catalog.close().await;

    if let Ok(report) = &outcome {
        info!(
            dropped = report.dropped.len(),
            retained = report.retained.len(),
            "Direct cleanup finished"
        );
    }
    outcome
}
