//! Controller runner - builds the Sde controller future
//!
//! Controller construction is kept apart from `main` so the wiring of
//! watches, context and shutdown can be read in one place.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use sde_common::crd::Sde;
use sde_common::{FIELD_MANAGER, MANAGED_BY_LABEL};
use sde_controller::{error_policy, reconcile, CleanupSettings, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Label selector matching Jobs created by this operator
pub fn owned_job_selector() -> String {
    format!("{}={}", MANAGED_BY_LABEL, FIELD_MANAGER)
}

/// Build the Sde controller future.
///
/// Watches Sde resources and the cleanup Jobs they own, so a Job finishing
/// triggers a pass without waiting for the poll interval. `cancel` is handed
/// to every pass; the caller cancels it on SIGINT/SIGTERM, which is also
/// when the controller stops.
pub fn build_sde_controller(
    client: Client,
    namespace: Option<&str>,
    settings: CleanupSettings,
    cancel: CancellationToken,
) -> impl Future<Output = ()> + Send {
    let (sdes, jobs): (Api<Sde>, Api<Job>) = match namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    tracing::info!(
        namespace = namespace.unwrap_or("*"),
        strategy = %settings.strategy,
        "- Sde controller"
    );

    let ctx = Arc::new(
        Context::builder(client)
            .settings(settings)
            .cancellation(cancel)
            .build(),
    );

    Controller::new(sdes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .owns(
            jobs,
            WatcherConfig::default()
                .labels(&owned_job_selector())
                .timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Sde"))
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
