//! Sde reconciliation controller
//!
//! Each pass converges one environment toward its declared retention count.
//! With the Job strategy the pass walks
//!
//! - `Start` → re-read the Sde; gone means done
//! - `EnsureConfig` → create the script ConfigMap, requeue at once if created
//! - `EnsureJob` → create the cleanup Job, requeue at once if created
//! - `AwaitCompletion` → poll the Job, retrying after the poll interval
//! - `Done`
//!
//! With the Direct strategy the pass drops surplus databases itself.
//! Every write is an idempotent ensure, so overlapping passes for the same
//! Sde converge instead of duplicating work.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::runtime::events::Event;
use kube::{Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use sde_cleanup::{AdminConnector, PostgresConnector};
use sde_common::crd::{Sde, SdeStatus};
use sde_common::events::{self, actions, reasons, EventPublisher, KubeEventPublisher};

use crate::direct::run_direct_cleanup;
use crate::error::ReconcileError;
use crate::kube_client::{SdeKubeClient, SdeKubeClientImpl};
use crate::provisioner::{ensure_job, ensure_script_config, EnsureOutcome};
use crate::resources::{is_job_complete, is_job_failed, job_failure_message, job_reference};
use crate::strategy::{CleanupSettings, CleanupStrategy};

/// Delay before a failed Job is recreated
pub const FAILED_JOB_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Requeue delay after a transient error
pub const ERROR_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Requeue delay after an error that needs a configuration fix
pub const INTERVENTION_RETRY_DELAY: Duration = Duration::from_secs(300);

/// What the scheduler should do after a successful pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Converged; wait for the next change
    Done,
    /// Run another pass right away
    RequeueNow,
    /// Run another pass after the delay
    RetryAfter(Duration),
}

impl From<Directive> for Action {
    fn from(directive: Directive) -> Self {
        match directive {
            Directive::Done => Action::await_change(),
            Directive::RequeueNow => Action::requeue(Duration::ZERO),
            Directive::RetryAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Controller context shared by every reconcile pass
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .settings(settings)
///     .cancellation(token)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes operations (trait object for testability)
    pub kube: Arc<dyn SdeKubeClient>,
    /// Opens administrative data store connections for the direct strategy
    pub connector: Arc<dyn AdminConnector>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Operator-wide cleanup settings
    pub settings: CleanupSettings,
    /// Cancelled when the controller shuts down
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock clients
    ///
    /// Events go to a no-op publisher.
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn SdeKubeClient>,
        connector: Arc<dyn AdminConnector>,
        settings: CleanupSettings,
    ) -> Self {
        Self {
            kube,
            connector,
            events: Arc::new(sde_common::events::NoopEventPublisher),
            settings,
            cancel: CancellationToken::new(),
        }
    }

    async fn publish(&self, sde: &Sde, event: Event) {
        self.events.publish(&sde.object_ref(&()), event).await;
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn SdeKubeClient>>,
    connector: Option<Arc<dyn AdminConnector>>,
    events: Option<Arc<dyn EventPublisher>>,
    settings: CleanupSettings,
    cancel: Option<CancellationToken>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            connector: None,
            events: None,
            settings: CleanupSettings::default(),
            cancel: None,
        }
    }

    /// Set the cleanup settings
    pub fn settings(mut self, settings: CleanupSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a cancellation token with the caller
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn SdeKubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the data store connector
    pub fn connector(mut self, connector: Arc<dyn AdminConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(SdeKubeClientImpl::new(self.client.clone()))),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(PostgresConnector)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client))),
            settings: self.settings,
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}

/// Reconcile an Sde.
///
/// Runs one pass inside a span naming the environment; every log line the
/// pass emits carries it.
#[instrument(
    skip(sde, ctx),
    fields(
        sde = %sde.name_any(),
        namespace = %sde.namespace().unwrap_or_default(),
        strategy = %ctx.settings.strategy,
    )
)]
pub async fn reconcile(sde: Arc<Sde>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let directive = reconcile_pass(&sde, &ctx).await?;
    debug!(?directive, "pass finished");
    Ok(directive.into())
}

/// One pass of the state machine, returning the scheduling directive.
pub async fn reconcile_pass(sde: &Sde, ctx: &Context) -> Result<Directive, ReconcileError> {
    let name = sde.name_any();
    let namespace = sde
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace(name.clone()))?;

    // Start
    let Some(current) = ctx.kube.get_sde(&namespace, &name).await? else {
        debug!("Sde no longer exists, nothing to do");
        return Ok(Directive::Done);
    };
    if current.metadata.deletion_timestamp.is_some() {
        debug!("Sde is being deleted, children are garbage collected");
        return Ok(Directive::Done);
    }

    info!(database_count = current.spec.database_count, "reconciling Sde");

    match ctx.settings.strategy {
        CleanupStrategy::Job => reconcile_with_job(&current, &namespace, ctx).await,
        CleanupStrategy::Direct => reconcile_direct(&current, &namespace, ctx).await,
    }
}

async fn reconcile_with_job(
    sde: &Sde,
    namespace: &str,
    ctx: &Context,
) -> Result<Directive, ReconcileError> {
    let kube = ctx.kube.as_ref();

    // EnsureConfig
    if ensure_script_config(kube, sde, namespace).await?.was_created() {
        ctx.publish(
            sde,
            events::normal(
                reasons::SCRIPT_CONFIG_CREATED,
                actions::PROVISION,
                format!("Created ConfigMap {}", sde.script_config_name()),
            ),
        )
        .await;
        return Ok(Directive::RequeueNow);
    }

    // EnsureJob
    let job = match ensure_job(kube, sde, namespace, &ctx.settings).await? {
        EnsureOutcome::Created(job) => {
            ctx.publish(
                sde,
                events::normal(
                    reasons::CLEANUP_JOB_CREATED,
                    actions::PROVISION,
                    format!(
                        "Created Job {} retaining {} databases",
                        sde.cleanup_job_name(),
                        sde.spec.database_count
                    ),
                ),
            )
            .await;
            set_active(ctx, sde, namespace, vec![job_reference(&job)]).await?;
            return Ok(Directive::RequeueNow);
        }
        EnsureOutcome::AlreadyExists(job) => job,
    };

    // AwaitCompletion
    if job.metadata.deletion_timestamp.is_some() {
        debug!("Previous cleanup Job is still being deleted");
        return Ok(Directive::RetryAfter(ctx.settings.job_poll_interval));
    }

    if is_job_failed(&job) {
        let msg = job_failure_message(&job).unwrap_or_else(|| "unknown failure".to_string());
        warn!(job = %job.name_any(), error = %msg, "Cleanup Job failed, recreating it");
        ctx.publish(
            sde,
            events::warning(
                reasons::CLEANUP_JOB_FAILED,
                actions::CLEANUP,
                format!("Job {} failed: {}", job.name_any(), msg),
            ),
        )
        .await;
        ctx.kube.delete_job(namespace, &job.name_any()).await?;
        set_active(ctx, sde, namespace, Vec::new()).await?;
        return Ok(Directive::RetryAfter(FAILED_JOB_RETRY_DELAY));
    }

    if !is_job_complete(&job) {
        debug!(job = %job.name_any(), "Cleanup Job still running");
        set_active(ctx, sde, namespace, vec![job_reference(&job)]).await?;
        return Ok(Directive::RetryAfter(ctx.settings.job_poll_interval));
    }

    // Done
    if sde.has_active_jobs() {
        info!(job = %job.name_any(), "Cleanup Job completed");
        ctx.publish(
            sde,
            events::normal(
                reasons::CLEANUP_COMPLETED,
                actions::CLEANUP,
                format!("Job {} completed", job.name_any()),
            ),
        )
        .await;
        set_active(ctx, sde, namespace, Vec::new()).await?;
    }
    Ok(Directive::Done)
}

async fn reconcile_direct(
    sde: &Sde,
    namespace: &str,
    ctx: &Context,
) -> Result<Directive, ReconcileError> {
    match run_direct_cleanup(ctx, sde, namespace).await {
        Ok(report) => {
            if !report.dropped.is_empty() {
                let dropped: Vec<&str> = report.dropped.iter().map(|d| d.as_str()).collect();
                ctx.publish(
                    sde,
                    events::normal(
                        reasons::DATABASES_DROPPED,
                        actions::CLEANUP,
                        format!("Dropped {}: {}", dropped.len(), dropped.join(", ")),
                    ),
                )
                .await;
            }
            Ok(Directive::Done)
        }
        Err(ReconcileError::Cancelled) => Err(ReconcileError::Cancelled),
        Err(e) => {
            ctx.publish(
                sde,
                events::warning(
                    reasons::CLEANUP_FAILED,
                    actions::CLEANUP,
                    e.to_string(),
                ),
            )
            .await;
            Err(e)
        }
    }
}

/// Point `status.active` at `active`, skipping the write when unchanged.
async fn set_active(
    ctx: &Context,
    sde: &Sde,
    namespace: &str,
    active: Vec<ObjectReference>,
) -> Result<(), ReconcileError> {
    let current = sde.status.as_ref().map(|s| s.active.as_slice()).unwrap_or_default();
    if current == active.as_slice() {
        return Ok(());
    }

    ctx.kube
        .patch_sde_status(namespace, &sde.name_any(), &SdeStatus { active })
        .await?;
    Ok(())
}

/// Error policy for the Sde controller.
///
/// Errors that need a configuration fix back off longer than transient ones.
pub fn error_policy(sde: Arc<Sde>, error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        sde = %sde.name_any(),
        stage = error.stage(),
        "reconciliation failed"
    );

    if error.needs_intervention() {
        Action::requeue(INTERVENTION_RETRY_DELAY)
    } else {
        Action::requeue(ERROR_RETRY_DELAY)
    }
}
