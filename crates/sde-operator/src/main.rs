//! SDE Operator - retires the oldest versioned databases of Sde environments

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use sde_common::crd::Sde;
use sde_common::telemetry::init_telemetry;
use sde_common::FIELD_MANAGER;
use sde_operator::config::Cli;
use sde_operator::controller_runner::build_sde_controller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube's TLS stack needs a process-wide provider before the first client is built
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Sde::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry("sde-operator")
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    tracing::info!("Starting SDE operator...");
    build_sde_controller(
        client,
        cli.namespace.as_deref(),
        cli.cleanup.into_settings(),
        cancel,
    )
    .await;

    tracing::info!("SDE operator shutting down");
    Ok(())
}

/// Install the Sde CRD with server-side apply so it always matches this build
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing Sde CRD...");
    crds.patch("sdes.sde.sde.domain", &params, &Patch::Apply(&Sde::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Sde CRD: {}", e))?;

    Ok(())
}

/// Cancel in-flight direct passes on SIGINT or SIGTERM
async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM, watching SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received, cancelling in-flight cleanup");
    cancel.cancel();
}
