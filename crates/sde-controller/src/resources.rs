//! Supporting resource construction
//!
//! Builds the ConfigMap holding the cleanup script and the Job that runs it.
//! Both carry a controller owner reference to their Sde so deleting the
//! environment garbage-collects them.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, EnvFromSource,
    ObjectReference, PodSpec, PodTemplateSpec, ResourceRequirements, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use sde_common::crd::{connection_config_map_name, connection_secret_name, Sde};
use sde_common::{ENVIRONMENT_LABEL, FIELD_MANAGER, MANAGED_BY_LABEL};

use crate::strategy::CleanupSettings;

/// Cleanup script shipped in the script ConfigMap
pub const CLEANUP_SCRIPT: &str = include_str!("../scripts/db_cleanup.sh");

/// ConfigMap key (and file name under the mount) of the cleanup script
pub const SCRIPT_KEY: &str = "db_cleanup.sh";

/// Secret key holding the administrative password
pub const PASSWORD_KEY: &str = "ADMIN_DATABASE_PASSWORD";

const SCRIPTS_MOUNT_PATH: &str = "/scripts";
const SECRETS_MOUNT_PATH: &str = "/secrets";
const SCRIPT_VOLUME: &str = "task-script-volume";
const SECRET_VOLUME: &str = "db-secret-volume";
const CONTAINER_NAME: &str = "db-cleanup";

/// r-xr-xr-- so the script is executable from a read-only mount
const SCRIPT_MODE: i32 = 0o554;

/// Controller owner reference pointing at `sde`.
///
/// `None` until the API server has assigned the Sde a UID.
pub fn owner_reference(sde: &Sde) -> Option<OwnerReference> {
    sde.controller_owner_ref(&())
}

/// Labels stamped on every supporting object
pub fn resource_labels(sde: &Sde) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string()),
        (ENVIRONMENT_LABEL.to_string(), sde.name_any()),
    ])
}

fn owned_metadata(sde: &Sde, name: String, namespace: &str, owner: OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(resource_labels(sde)),
        owner_references: Some(vec![owner]),
        ..Default::default()
    }
}

/// Build the ConfigMap carrying the cleanup script.
pub fn build_script_config_map(sde: &Sde, namespace: &str, owner: OwnerReference) -> ConfigMap {
    ConfigMap {
        metadata: owned_metadata(sde, sde.script_config_name(), namespace, owner),
        data: Some(BTreeMap::from([(
            SCRIPT_KEY.to_string(),
            CLEANUP_SCRIPT.to_string(),
        )])),
        ..Default::default()
    }
}

/// Script path followed by its five positional arguments
pub fn cleanup_command(settings: &CleanupSettings, database_count: i64) -> Vec<String> {
    vec![
        format!("{}/{}", SCRIPTS_MOUNT_PATH, SCRIPT_KEY),
        settings.engine.clone(),
        format!("{}/{}", SECRETS_MOUNT_PATH, PASSWORD_KEY),
        settings.extra_arg.clone(),
        settings.database_prefix.clone(),
        database_count.to_string(),
    ]
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

/// Build the cleanup Job.
///
/// The Job:
/// - Runs a single container executing the mounted script
/// - Mounts the script ConfigMap read-only at `/scripts` with mode 0554
/// - Mounts the scope's credential Secret read-only at `/secrets`
/// - Loads the scope's connection ConfigMap into the environment
/// - Restarts the container on failure, up to `backoffLimit: 3` retries
pub fn build_cleanup_job(
    sde: &Sde,
    namespace: &str,
    owner: OwnerReference,
    settings: &CleanupSettings,
) -> Job {
    let labels = resource_labels(sde);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(settings.image.clone()),
        command: Some(cleanup_command(settings, sde.spec.database_count)),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: connection_config_map_name(namespace),
                optional: Some(false),
            }),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(quantities("50m", "250M")),
            limits: Some(quantities("100m", "500M")),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: SCRIPT_VOLUME.to_string(),
                mount_path: SCRIPTS_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: SECRET_VOLUME.to_string(),
                mount_path: SECRETS_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: SCRIPT_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: sde.script_config_name(),
                default_mode: Some(SCRIPT_MODE),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: SECRET_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(connection_secret_name(namespace)),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    Job {
        metadata: owned_metadata(sde, sde.cleanup_job_name(), namespace, owner),
        spec: Some(JobSpec {
            backoff_limit: Some(3),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    restart_policy: Some("OnFailure".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Check if a Job has completed successfully.
///
/// Complete once `succeeded` reaches `completions` (1 when unset) or the
/// Job carries a `Complete=True` condition.
pub fn is_job_complete(job: &Job) -> bool {
    let completions = job
        .spec
        .as_ref()
        .and_then(|s| s.completions)
        .unwrap_or(1);
    let succeeded = job.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0);

    succeeded >= completions || has_condition(job, "Complete")
}

/// Check if a Job has failed
pub fn is_job_failed(job: &Job) -> bool {
    has_condition(job, "Failed")
}

fn has_condition(job: &Job, type_: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == "True")
        })
}

/// Extract failure message from a failed Job
pub fn job_failure_message(job: &Job) -> Option<String> {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Failed" && c.status == "True")
                .and_then(|c| c.message.clone().or_else(|| c.reason.clone()))
        })
}

/// Reference to a Job as recorded in `status.active`
pub fn job_reference(job: &Job) -> ObjectReference {
    let mut reference = job.object_ref(&());
    // the watch resourceVersion would make every poll look like a change
    reference.resource_version = None;
    reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use sde_common::crd::SdeSpec;

    fn sample_sde() -> Sde {
        let mut sde = Sde::new("staging", SdeSpec { database_count: 2 });
        sde.metadata.namespace = Some("team-a".to_string());
        sde.metadata.uid = Some("uid-123".to_string());
        sde
    }

    fn owner() -> OwnerReference {
        owner_reference(&sample_sde()).unwrap()
    }

    fn sample_job() -> Job {
        build_cleanup_job(&sample_sde(), "team-a", owner(), &CleanupSettings::default())
    }

    fn pod_spec(job: &Job) -> &PodSpec {
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn owner_reference_requires_uid() {
        let mut sde = sample_sde();
        sde.metadata.uid = None;
        assert!(owner_reference(&sde).is_none());
    }

    #[test]
    fn owner_reference_is_controller() {
        let owner = owner();
        assert_eq!(owner.kind, "Sde");
        assert_eq!(owner.api_version, "sde.sde.domain/v1beta1");
        assert_eq!(owner.name, "staging");
        assert_eq!(owner.uid, "uid-123");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn script_config_map_carries_script() {
        let cm = build_script_config_map(&sample_sde(), "team-a", owner());
        assert_eq!(cm.metadata.name.as_deref(), Some("staging-run-scripts"));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("team-a"));
        assert_eq!(cm.metadata.owner_references.as_ref().unwrap().len(), 1);
        let script = cm.data.as_ref().unwrap().get(SCRIPT_KEY).unwrap();
        assert!(script.starts_with("#!/bin/sh"));
    }

    /// Runs the script's own prefix-escaping line under `sh`.
    #[cfg(unix)]
    #[test]
    fn script_escapes_regex_metacharacters_in_prefix() {
        let escape_line = CLEANUP_SCRIPT
            .lines()
            .find(|l| l.starts_with("escaped_prefix="))
            .expect("script escapes the prefix");
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("prefix='app.v1+_'; {escape_line}; printf '%s' \"$escaped_prefix\""))
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8(output.stdout).unwrap(), r"app\.v1\+_");
        assert!(CLEANUP_SCRIPT.contains("pattern=\"^${escaped_prefix}"));
    }

    #[test]
    fn job_identity_and_ownership() {
        let job = sample_job();
        assert_eq!(job.metadata.name.as_deref(), Some("staging-db-cleanup"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("team-a"));
        let refs = job.metadata.owner_references.as_ref().unwrap();
        assert_eq!(refs[0].uid, "uid-123");
        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(
            labels.get(MANAGED_BY_LABEL).map(String::as_str),
            Some("sde-controller")
        );
        assert_eq!(
            labels.get(ENVIRONMENT_LABEL).map(String::as_str),
            Some("staging")
        );
    }

    #[test]
    fn job_command_passes_positional_arguments() {
        let command = pod_spec(&sample_job()).containers[0].command.clone().unwrap();
        assert_eq!(
            command,
            vec![
                "/scripts/db_cleanup.sh",
                "postgres",
                "/secrets/ADMIN_DATABASE_PASSWORD",
                "",
                "sde_",
                "2",
            ]
        );
    }

    #[test]
    fn job_mounts_script_and_secret_read_only() {
        let job = sample_job();
        let spec = pod_spec(&job);

        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 2);
        assert!(mounts.iter().all(|m| m.read_only == Some(true)));

        let volumes = spec.volumes.as_ref().unwrap();
        let script = volumes[0].config_map.as_ref().unwrap();
        assert_eq!(script.name, "staging-run-scripts");
        assert_eq!(script.default_mode, Some(0o554));
        let secret = volumes[1].secret.as_ref().unwrap();
        assert_eq!(secret.secret_name.as_deref(), Some("team-a-database-secrets"));
    }

    #[test]
    fn job_loads_connection_settings_from_config_map() {
        let job = sample_job();
        let env_from = pod_spec(&job).containers[0].env_from.as_ref().unwrap();
        assert_eq!(
            env_from[0].config_map_ref.as_ref().unwrap().name,
            "team-a-db-configmap"
        );
    }

    #[test]
    fn job_has_modest_resources_and_bounded_retries() {
        let job = sample_job();
        assert_eq!(job.spec.as_ref().unwrap().backoff_limit, Some(3));
        let spec = pod_spec(&job);
        assert_eq!(spec.restart_policy.as_deref(), Some("OnFailure"));

        let resources = spec.containers[0].resources.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(requests["cpu"], Quantity("50m".to_string()));
        assert_eq!(requests["memory"], Quantity("250M".to_string()));
        assert_eq!(limits["cpu"], Quantity("100m".to_string()));
        assert_eq!(limits["memory"], Quantity("500M".to_string()));
    }

    #[test]
    fn job_uses_configured_image() {
        let settings = CleanupSettings {
            image: "registry.internal/pg-tools:15".to_string(),
            ..Default::default()
        };
        let job = build_cleanup_job(&sample_sde(), "team-a", owner(), &settings);
        assert_eq!(
            pod_spec(&job).containers[0].image.as_deref(),
            Some("registry.internal/pg-tools:15")
        );
    }

    // =========================================================================
    // Job status helper tests
    // =========================================================================

    fn job_with_status(status: JobStatus) -> Job {
        Job {
            status: Some(status),
            ..Default::default()
        }
    }

    fn job_with_condition(type_: &str, status: &str) -> Job {
        job_with_status(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: type_.to_string(),
                status: status.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        })
    }

    #[test]
    fn complete_when_succeeded_reaches_completions() {
        let job = job_with_status(JobStatus {
            succeeded: Some(1),
            ..Default::default()
        });
        assert!(is_job_complete(&job));
    }

    #[test]
    fn incomplete_while_running() {
        let job = job_with_status(JobStatus {
            active: Some(1),
            ..Default::default()
        });
        assert!(!is_job_complete(&job));
        assert!(!is_job_complete(&Job::default()));
    }

    #[test]
    fn respects_explicit_completions() {
        let mut job = job_with_status(JobStatus {
            succeeded: Some(1),
            ..Default::default()
        });
        job.spec = Some(JobSpec {
            completions: Some(2),
            ..Default::default()
        });
        assert!(!is_job_complete(&job));
    }

    #[test]
    fn complete_condition_counts() {
        assert!(is_job_complete(&job_with_condition("Complete", "True")));
        assert!(!is_job_complete(&job_with_condition("Complete", "False")));
    }

    #[test]
    fn failed_condition_detected() {
        assert!(is_job_failed(&job_with_condition("Failed", "True")));
        assert!(!is_job_failed(&job_with_condition("Complete", "True")));
        assert!(!is_job_failed(&Job::default()));
    }

    #[test]
    fn failure_message_falls_back_to_reason() {
        let job = job_with_status(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                reason: Some("BackoffLimitExceeded".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(
            job_failure_message(&job).as_deref(),
            Some("BackoffLimitExceeded")
        );
        assert_eq!(job_failure_message(&job_with_condition("Complete", "True")), None);
    }

    #[test]
    fn job_reference_names_the_job() {
        let mut job = sample_job();
        job.metadata.resource_version = Some("42".to_string());
        job.metadata.uid = Some("job-uid".to_string());
        let reference = job_reference(&job);
        assert_eq!(reference.kind.as_deref(), Some("Job"));
        assert_eq!(reference.name.as_deref(), Some("staging-db-cleanup"));
        assert_eq!(reference.namespace.as_deref(), Some("team-a"));
        assert_eq!(reference.uid.as_deref(), Some("job-uid"));
        assert_eq!(reference.resource_version, None);
    }
}
