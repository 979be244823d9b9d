//! Idempotent provisioning of the script ConfigMap and cleanup Job
//!
//! Each `ensure_*` fetches the named object first and only creates it when
//! absent. A 409 from a create that raced another pass is reported as
//! [`EnsureOutcome::AlreadyExists`], never as an error.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::{debug, info};

use sde_common::crd::Sde;
use sde_common::error::is_already_exists;
use sde_common::Error;

use crate::error::ReconcileError;
use crate::kube_client::SdeKubeClient;
use crate::resources::{build_cleanup_job, build_script_config_map, owner_reference};
use crate::strategy::CleanupSettings;

/// Result of an `ensure_*` call
#[derive(Clone, Debug, PartialEq)]
pub enum EnsureOutcome<T = ()> {
    /// This call created the object
    Created(T),
    /// The object was already there; nothing was written
    AlreadyExists(T),
}

impl<T> EnsureOutcome<T> {
    /// Whether this call created the object
    pub fn was_created(&self) -> bool {
        matches!(self, EnsureOutcome::Created(_))
    }

    /// The ensured object
    pub fn into_inner(self) -> T {
        match self {
            EnsureOutcome::Created(t) | EnsureOutcome::AlreadyExists(t) => t,
        }
    }
}

fn owner_or_err(sde: &Sde) -> Result<OwnerReference, Error> {
    owner_reference(sde).ok_or_else(|| {
        Error::internal_with_context("provisioner", format!("Sde {} has no UID", sde.name_any()))
    })
}

fn is_conflict(error: &Error) -> bool {
    matches!(error, Error::Kube { source } if is_already_exists(source))
}

/// Ensure the ConfigMap holding the cleanup script exists.
pub async fn ensure_script_config(
    kube: &dyn SdeKubeClient,
    sde: &Sde,
    namespace: &str,
) -> Result<EnsureOutcome, ReconcileError> {
    let name = sde.script_config_name();

    if kube.get_config_map(namespace, &name).await?.is_some() {
        debug!(config_map = %name, "Script ConfigMap already exists");
        return Ok(EnsureOutcome::AlreadyExists(()));
    }

    let config_map = build_script_config_map(sde, namespace, owner_or_err(sde)?);

    info!(config_map = %name, "Creating script ConfigMap");
    match kube.create_config_map(namespace, &config_map).await {
        Ok(()) => Ok(EnsureOutcome::Created(())),
        Err(e) if is_conflict(&e) => {
            debug!(config_map = %name, "Script ConfigMap created concurrently");
            Ok(EnsureOutcome::AlreadyExists(()))
        }
        Err(e) => Err(Error::provision(format!("ConfigMap/{}", name), e.to_string()).into()),
    }
}

/// Ensure the cleanup Job exists, returning it either way.
///
/// The Job's command carries `databaseCount` as it was when the Job was
/// created. An existing Job is never updated, so once it has completed a
/// later change to the count does not trigger another cleanup until the Job
/// is deleted.
pub async fn ensure_job(
    kube: &dyn SdeKubeClient,
    sde: &Sde,
    namespace: &str,
    settings: &CleanupSettings,
) -> Result<EnsureOutcome<Job>, ReconcileError> {
    let name = sde.cleanup_job_name();

    if let Some(existing) = kube.get_job(namespace, &name).await? {
        debug!(job = %name, "Cleanup Job already exists");
        return Ok(EnsureOutcome::AlreadyExists(existing));
    }

    let job = build_cleanup_job(sde, namespace, owner_or_err(sde)?, settings);

    info!(job = %name, database_count = sde.spec.database_count, "Creating cleanup Job");
    match kube.create_job(namespace, &job).await {
        Ok(()) => Ok(EnsureOutcome::Created(job)),
        Err(e) if is_conflict(&e) => match kube.get_job(namespace, &name).await? {
            Some(existing) => {
                debug!(job = %name, "Cleanup Job created concurrently");
                Ok(EnsureOutcome::AlreadyExists(existing))
            }
            None => Err(Error::provision(
                format!("Job/{}", name),
                "create conflicted but the Job is not readable",
            )
            .into()),
        },
        Err(e) => Err(Error::provision(format!("Job/{}", name), e.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use k8s_openapi::api::core::v1::ConfigMap;
    use sde_common::crd::SdeSpec;

    use crate::kube_client::MockSdeKubeClient;

    fn sample_sde() -> Sde {
        let mut sde = Sde::new("staging", SdeSpec { database_count: 2 });
        sde.metadata.namespace = Some("team-a".to_string());
        sde.metadata.uid = Some("uid-123".to_string());
        sde
    }

    fn conflict() -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "already exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        }))
    }

    /// A mock whose ConfigMap store is shared state, so a second call
    /// observes what the first one created.
    fn stateful_config_map_client() -> (MockSdeKubeClient, Arc<Mutex<Vec<ConfigMap>>>) {
        let store: Arc<Mutex<Vec<ConfigMap>>> = Arc::new(Mutex::new(Vec::new()));
        let mut mock = MockSdeKubeClient::new();

        let reads = store.clone();
        mock.expect_get_config_map().returning(move |_, name| {
            Ok(reads
                .lock()
                .unwrap()
                .iter()
                .find(|cm| cm.metadata.name.as_deref() == Some(name))
                .cloned())
        });

        let writes = store.clone();
        mock.expect_create_config_map().returning(move |_, cm| {
            writes.lock().unwrap().push(cm.clone());
            Ok(())
        });

        (mock, store)
    }

    #[tokio::test]
    async fn ensure_script_config_is_idempotent() {
        let (mock, store) = stateful_config_map_client();
        let sde = sample_sde();

        let first = ensure_script_config(&mock, &sde, "team-a").await.unwrap();
        let second = ensure_script_config(&mock, &sde, "team-a").await.unwrap();

        assert_eq!(first, EnsureOutcome::Created(()));
        assert_eq!(second, EnsureOutcome::AlreadyExists(()));
        assert_eq!(store.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn existing_script_config_is_not_recreated() {
        let mut mock = MockSdeKubeClient::new();
        mock.expect_get_config_map()
            .withf(|ns, name| ns == "team-a" && name == "staging-run-scripts")
            .returning(|_, _| Ok(Some(ConfigMap::default())));
        mock.expect_create_config_map().never();

        let outcome = ensure_script_config(&mock, &sample_sde(), "team-a")
            .await
            .unwrap();
        assert!(!outcome.was_created());
    }

    #[tokio::test]
    async fn script_config_conflict_is_already_exists() {
        let mut mock = MockSdeKubeClient::new();
        mock.expect_get_config_map().returning(|_, _| Ok(None));
        mock.expect_create_config_map()
            .times(1)
            .returning(|_, _| Err(conflict()));

        let outcome = ensure_script_config(&mock, &sample_sde(), "team-a")
            .await
            .unwrap();
        assert_eq!(outcome, EnsureOutcome::AlreadyExists(()));
    }

    #[tokio::test]
    async fn script_config_create_failure_is_provision_error() {
        let mut mock = MockSdeKubeClient::new();
        mock.expect_get_config_map().returning(|_, _| Ok(None));
        mock.expect_create_config_map()
            .returning(|_, _| Err(Error::internal_with_context("kube", "quota exceeded")));

        let err = ensure_script_config(&mock, &sample_sde(), "team-a")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Common(Error::Provision { ref resource, .. })
                if resource == "ConfigMap/staging-run-scripts"
        ));
    }

    #[tokio::test]
    async fn sde_without_uid_cannot_own_children() {
        let mut sde = sample_sde();
        sde.metadata.uid = None;
        let mut mock = MockSdeKubeClient::new();
        mock.expect_get_config_map().returning(|_, _| Ok(None));
        mock.expect_create_config_map().never();

        assert!(ensure_script_config(&mock, &sde, "team-a").await.is_err());
    }

    #[tokio::test]
    async fn ensure_job_is_idempotent() {
        let store: Arc<Mutex<Option<Job>>> = Arc::new(Mutex::new(None));
        let mut mock = MockSdeKubeClient::new();
        let reads = store.clone();
        mock.expect_get_job()
            .returning(move |_, _| Ok(reads.lock().unwrap().clone()));
        let writes = store.clone();
        mock.expect_create_job().times(1).returning(move |_, job| {
            *writes.lock().unwrap() = Some(job.clone());
            Ok(())
        });

        let sde = sample_sde();
        let settings = CleanupSettings::default();
        let first = ensure_job(&mock, &sde, "team-a", &settings).await.unwrap();
        let second = ensure_job(&mock, &sde, "team-a", &settings).await.unwrap();

        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(
            second.into_inner().metadata.name.as_deref(),
            Some("staging-db-cleanup")
        );
    }

    #[tokio::test]
    async fn existing_job_keeps_the_count_it_was_created_with() {
        let store: Arc<Mutex<Option<Job>>> = Arc::new(Mutex::new(None));
        let mut mock = MockSdeKubeClient::new();
        let reads = store.clone();
        mock.expect_get_job()
            .returning(move |_, _| Ok(reads.lock().unwrap().clone()));
        let writes = store.clone();
        mock.expect_create_job().times(1).returning(move |_, job| {
            *writes.lock().unwrap() = Some(job.clone());
            Ok(())
        });

        let settings = CleanupSettings::default();
        let mut sde = sample_sde();
        ensure_job(&mock, &sde, "team-a", &settings).await.unwrap();

        sde.spec.database_count += 3;
        let job = ensure_job(&mock, &sde, "team-a", &settings)
            .await
            .unwrap()
            .into_inner();

        let command = job.spec.unwrap().template.spec.unwrap().containers[0]
            .command
            .clone()
            .unwrap();
        assert_eq!(
            command.last().map(String::as_str),
            Some((sde.spec.database_count - 3).to_string().as_str())
        );
    }

    #[tokio::test]
    async fn job_conflict_returns_the_existing_job() {
        let mut mock = MockSdeKubeClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_get_job()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        mock.expect_create_job()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(conflict()));
        mock.expect_get_job()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, name| {
                let mut job = Job::default();
                job.metadata.name = Some(name.to_string());
                Ok(Some(job))
            });

        let outcome = ensure_job(&mock, &sample_sde(), "team-a", &CleanupSettings::default())
            .await
            .unwrap();
        assert!(matches!(outcome, EnsureOutcome::AlreadyExists(_)));
    }
}
