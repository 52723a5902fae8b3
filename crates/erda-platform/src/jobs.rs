//! Initialization job gate: jobs run to completion before any application
//! component is created. A failed job is terminal for the Platform's
//! current generation.

use std::collections::BTreeMap;

use tracing::{error, info};

use erda_common::crd::{Job, Platform, PlatformPhase, PlatformStatus, ResourceState};
use erda_common::labels::{JOB_NAME_LABEL, JOB_TYPE_LABEL, MANAGED_LABEL};
use erda_common::{Error, Result};

use crate::client::PlatformKubeClient;
use crate::render::job::{compose_job, job_terminal_state};

/// Outcome of one pass over the job gate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobGate {
    /// At least one job is still running; requeue and hold applications
    Pending,
    /// Every job completed; applications may proceed
    Completed,
    /// A job failed; terminal for this generation
    Failed,
}

fn job_selector(job: &Job) -> String {
    format!(
        "{MANAGED_LABEL}=true,{JOB_TYPE_LABEL}={}",
        job.kind.label_value()
    )
}

/// Drive the job gate one step
pub async fn reconcile_jobs(
    platform: &Platform,
    status: &mut PlatformStatus,
    client: &dyn PlatformKubeClient,
) -> Result<JobGate> {
    let platform_name = platform.metadata.name.as_deref().unwrap_or_default();
    let namespace = platform.metadata.namespace.as_deref().unwrap_or("default");

    if platform.spec.jobs.is_empty() {
        return Ok(JobGate::Completed);
    }

    let mut jobs_by_name: BTreeMap<&str, &Job> = BTreeMap::new();
    for job in &platform.spec.jobs {
        if jobs_by_name.insert(&job.name, job).is_some() {
            status.phase = PlatformPhase::Failed;
            status.push_condition(format!("duplicate job name {}", job.name), None);
            client
                .patch_platform_status(platform_name, namespace, status)
                .await?;
            return Err(Error::bad_spec_for(
                platform_name,
                format!("job name {} is duplicated", job.name),
            ));
        }
    }

    // seed job states on first observation
    if status.jobs.is_empty() {
        for name in jobs_by_name.keys() {
            status.jobs.insert((*name).to_string(), ResourceState::Unknown);
        }
        status.phase = PlatformPhase::Initialization;
        client
            .patch_platform_status(platform_name, namespace, status)
            .await?;
    } else {
        status.jobs.retain(|name, _| jobs_by_name.contains_key(name.as_str()));
    }

    if jobs_by_name
        .keys()
        .all(|name| status.jobs.get(*name) == Some(&ResourceState::Completed))
    {
        if status.phase == PlatformPhase::Initialization {
            status.phase = PlatformPhase::Deploying;
            client
                .patch_platform_status(platform_name, namespace, status)
                .await?;
        }
        return Ok(JobGate::Completed);
    }

    // observe live jobs per distinct type selector
    let mut selectors: Vec<String> = jobs_by_name.values().map(|j| job_selector(j)).collect();
    selectors.sort();
    selectors.dedup();

    let mut pending_create = jobs_by_name.clone();
    for selector in &selectors {
        for live in client.list_jobs(namespace, selector).await? {
            let job_name = live
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(JOB_NAME_LABEL))
                .cloned()
                .unwrap_or_default();
            if !jobs_by_name.contains_key(job_name.as_str()) {
                continue;
            }
            pending_create.remove(job_name.as_str());

            match job_terminal_state(&live) {
                Some(ResourceState::Completed) => {
                    status
                        .jobs
                        .insert(job_name.clone(), ResourceState::Completed);
                }
                Some(ResourceState::Failed) => {
                    error!(job = %job_name, "initialization job failed");
                    status.jobs.insert(job_name.clone(), ResourceState::Failed);
                    status.phase = PlatformPhase::Failed;
                    status.push_condition(format!("job {job_name} failed"), None);
                    client
                        .patch_platform_status(platform_name, namespace, status)
                        .await?;
                    return Ok(JobGate::Failed);
                }
                _ => {
                    status.jobs.insert(job_name.clone(), ResourceState::Running);
                }
            }
        }
    }

    // create jobs not yet observed and not already done
    for (name, job) in pending_create {
        if status.jobs.get(name) == Some(&ResourceState::Completed) {
            continue;
        }
        let mut job = job.clone();
        job.namespace = Some(namespace.to_string());
        let rendered = compose_job(platform_name, &job, &platform.controller_owner())?;
        info!(job = %name, "creating initialization job");
        client.create_job(&rendered).await?;
        status.jobs.insert(name.to_string(), ResourceState::Running);
    }

    if jobs_by_name
        .keys()
        .all(|name| status.jobs.get(*name) == Some(&ResourceState::Completed))
    {
        status.phase = PlatformPhase::Deploying;
        client
            .patch_platform_status(platform_name, namespace, status)
            .await?;
        return Ok(JobGate::Completed);
    }

    status.phase = PlatformPhase::Initialization;
    client
        .patch_platform_status(platform_name, namespace, status)
        .await?;
    Ok(JobGate::Pending)
}
