//! Batch jobs for platform initialization.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job as BatchJob, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use erda_common::crd::{Job, ResourceState};
use erda_common::labels::{JOB_NAME_LABEL, JOB_TYPE_LABEL, MANAGED_LABEL};
use erda_common::Result;

use super::{affinity, envs_to_k8s, host_aliases, resources_to_k8s};

const JOB_TTL_SECONDS_AFTER_FINISHED: i32 = 600;
const DEFAULT_BACKOFF_LIMIT: i32 = 6;

/// Name of the batch job realized for a platform job
pub fn job_name(platform_name: &str, job: &Job) -> String {
    format!("{}-{}-{}", platform_name, job.kind.label_value(), job.name)
}

/// Labels on the job and its pod template
pub fn job_labels(job: &Job) -> BTreeMap<String, String> {
    let mut labels = job.labels.clone();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(JOB_NAME_LABEL.to_string(), job.name.clone());
    labels.insert(JOB_TYPE_LABEL.to_string(), job.kind.label_value().to_string());
    labels
}

fn job_tolerations() -> Vec<Toleration> {
    ["node-role.kubernetes.io/master", "node-role.kubernetes.io/lb"]
        .into_iter()
        .map(|key| Toleration {
            key: Some(key.to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        })
        .collect()
}

/// Render the batch job for a platform initialization job
pub fn compose_job(platform_name: &str, job: &Job, owner: &OwnerReference) -> Result<BatchJob> {
    let labels = job_labels(job);

    let container = Container {
        name: job.name.clone(),
        image: Some(job.image_info.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        env: Some(envs_to_k8s(&job.envs)?),
        command: if job.command.is_empty() {
            None
        } else {
            Some(job.command.clone())
        },
        resources: Some(resources_to_k8s(&job.resources)),
        ..Default::default()
    };

    Ok(BatchJob {
        metadata: ObjectMeta {
            name: Some(job_name(platform_name, job)),
            namespace: job.namespace.clone(),
            labels: Some(labels.clone()),
            annotations: if job.annotations.is_empty() {
                None
            } else {
                Some(job.annotations.clone())
            },
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(job.retries.unwrap_or(DEFAULT_BACKOFF_LIMIT)),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS_AFTER_FINISHED),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: if job.annotations.is_empty() {
                        None
                    } else {
                        Some(job.annotations.clone())
                    },
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    affinity: Some(affinity::job_affinity(job)),
                    tolerations: Some(job_tolerations()),
                    host_aliases: host_aliases(&job.hosts),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// Terminal state of a live batch job, `None` while it is still running
pub fn job_terminal_state(job: &BatchJob) -> Option<ResourceState> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    for condition in conditions {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" => return Some(ResourceState::Completed),
            "Failed" => return Some(ResourceState::Failed),
            _ => {}
        }
    }
    None
}
