//! Kubernetes operations used by the Sde reconciler
//!
//! Every read or write the reconcile pass performs goes through
//! [`SdeKubeClient`] so passes can be driven against a mock in tests.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use sde_common::crd::{Sde, SdeStatus};
use sde_common::error::is_api_code;
use sde_common::{Error, FIELD_MANAGER};

/// Trait abstracting the Kubernetes API for Sde reconciliation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SdeKubeClient: Send + Sync {
    /// Get an Sde, `None` when it has been deleted
    async fn get_sde(&self, namespace: &str, name: &str) -> Result<Option<Sde>, Error>;

    /// Merge-patch the status subresource of an Sde
    async fn patch_sde_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SdeStatus,
    ) -> Result<(), Error>;

    /// Get a ConfigMap
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Create a ConfigMap. A 409 is returned as an error for the caller to map.
    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap)
        -> Result<(), Error>;

    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Get a Job
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, Error>;

    /// Create a Job. A 409 is returned as an error for the caller to map.
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error>;

    /// Delete a Job and its Pods in the background. Deleting a missing Job succeeds.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct SdeKubeClientImpl {
    client: Client,
}

impl SdeKubeClientImpl {
    /// Create a new SdeKubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SdeKubeClient for SdeKubeClientImpl {
    async fn get_sde(&self, namespace: &str, name: &str) -> Result<Option<Sde>, Error> {
        let api: Api<Sde> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_sde_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SdeStatus,
    ) -> Result<(), Error> {
        let api: Api<Sde> = Api::namespaced(self.client.clone(), namespace);

        // an empty list is omitted by serde, so send it explicitly to clear it
        let status_patch = serde_json::json!({
            "status": { "active": status.active }
        });

        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.create(&post_params(), config_map).await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&post_params(), job).await?;
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match api.delete(name, &dp).await {
            Ok(_) => Ok(()),
            Err(e) if is_api_code(&e, 404) => {
                debug!(job = %name, "Job already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}
