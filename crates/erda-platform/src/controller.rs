//! Platform controller: one reconcile per CR event or requeue tick.
//!
//! Tick shape: job gate, env injection, PVC and configuration sync, spec
//! diff against the last-applied revision plus a live repair pass, launch,
//! status projection with orphan GC, phase transition.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use erda_common::crd::{
    Component, Platform, PlatformPhase, PlatformSpec, WorkloadKind,
};
use erda_common::labels::ANNOTATION_LAST_APPLIED;
use erda_common::{Error, Result};

use crate::client::PlatformKubeClient;
use crate::diff::config::configs_equal;
use crate::diff::workload::workloads_equal;
use crate::diff::{Actions, SpecDiff};
use crate::envs;
use crate::jobs::{reconcile_jobs, JobGate};
use crate::launch::Launcher;
use crate::render::ingress::IngressStrategy;
use crate::render::{config, pvc, workload};
use crate::status::project;

/// Requeue delay while the platform is converging
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(5);
/// Fast requeue after losing an optimistic-concurrency race
pub const CONFLICT_REQUEUE_INTERVAL: Duration = Duration::from_secs(1);

/// Shared controller context
pub struct Context {
    /// Kubernetes API surface
    pub client: Arc<dyn PlatformKubeClient>,
    /// Ingress API strategy discovered at startup
    pub ingress: Arc<dyn IngressStrategy>,
}

/// Reconcile one Platform
pub async fn reconcile(platform: Arc<Platform>, ctx: Arc<Context>) -> Result<Action> {
    let name = platform.name_any();
    let namespace = match platform.metadata.namespace.as_deref() {
        Some(ns) => ns,
        None => {
            return Err(Error::bad_spec_for(&name, "Platform is missing a namespace"));
        }
    };
    debug!(platform = %name, "reconciling");

    let mut status = platform.status_or_seeded();
    let client = ctx.client.as_ref();

    // jobs gate applications absolutely
    if !platform.spec.jobs.is_empty() {
        match reconcile_jobs(&platform, &mut status, client).await? {
            JobGate::Failed => return Ok(Action::await_change()),
            JobGate::Pending => return Ok(Action::requeue(REQUEUE_INTERVAL)),
            JobGate::Completed => {}
        }
    }
    if status.phase == PlatformPhase::Unknown {
        status.phase = PlatformPhase::Deploying;
    }

    let injected = envs::inject(&platform);
    let owner = platform.controller_owner();

    for app in &injected.applications {
        for component in &app.components {
            sync_pvcs(component, client, &owner).await?;
            sync_configurations(component, client, &owner).await?;
        }
    }

    let last_applied = last_applied_spec(&platform);
    let mut actions = SpecDiff::new(last_applied.as_ref(), &injected).actions();
    repair_drifted_components(&injected, &mut actions, client, &owner).await?;

    let launcher = Launcher::new(
        &actions,
        &name,
        namespace,
        owner.clone(),
        status.phase,
        client,
        ctx.ingress.as_ref(),
    );
    if let Err(err) = launcher.launch(&mut status).await {
        warn!(platform = %name, error = %err, "launch incomplete");
        client.patch_platform_status(&name, namespace, &status).await?;
        return if status.phase == PlatformPhase::Failed {
            Ok(Action::await_change())
        } else {
            Ok(Action::requeue(REQUEUE_INTERVAL))
        };
    }
    record_last_applied(&platform, &injected, client).await?;

    // fold live state into the status and collect orphans
    let live = client.list_workloads(namespace).await?;
    let projection = project(&injected, live);
    status.applications = projection.applications;
    status.phase = if projection.all_ready {
        PlatformPhase::Ready
    } else {
        PlatformPhase::Deploying
    };

    for orphan in &projection.orphans {
        info!(platform = %name, workload = %orphan.name(), "collecting orphaned workload");
        let orphan_namespace = orphan.namespace();
        client
            .delete_workload(orphan.kind(), orphan.name(), orphan_namespace)
            .await?;
        client.delete_service(orphan.name(), orphan_namespace).await?;
        client
            .delete_ingress(ctx.ingress.api_resource(), orphan.name(), orphan_namespace)
            .await?;
        client.delete_hpa(orphan.name(), orphan_namespace).await?;
        client.delete_vpa(orphan.name(), orphan_namespace).await?;
    }

    if platform.status.as_ref() != Some(&status) {
        client.patch_platform_status(&name, namespace, &status).await?;
    }

    if status.phase == PlatformPhase::Ready {
        debug!(platform = %name, "platform ready");
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(REQUEUE_INTERVAL))
    }
}

/// Requeue strategy on reconcile failure
pub fn error_policy(platform: Arc<Platform>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        platform = %platform.name_any(),
        error = %error,
        retryable = error.is_retryable(),
        "reconcile failed"
    );
    if error.is_conflict() {
        Action::requeue(CONFLICT_REQUEUE_INTERVAL)
    } else if error.is_retryable() {
        Action::requeue(REQUEUE_INTERVAL)
    } else {
        Action::await_change()
    }
}

fn last_applied_spec(platform: &Platform) -> Option<PlatformSpec> {
    let raw = platform.annotations().get(ANNOTATION_LAST_APPLIED)?;
    match serde_json::from_str(raw) {
        Ok(spec) => Some(spec),
        Err(err) => {
            warn!(error = %err, "last-applied annotation is unreadable, treating as blank");
            None
        }
    }
}

async fn record_last_applied(
    platform: &Platform,
    injected: &PlatformSpec,
    client: &dyn PlatformKubeClient,
) -> Result<()> {
    let serialized = serde_json::to_string(injected)
        .map_err(|e| Error::serialization_for_kind("PlatformSpec", e.to_string()))?;
    if platform.annotations().get(ANNOTATION_LAST_APPLIED) == Some(&serialized) {
        return Ok(());
    }
    client
        .annotate_platform(
            &platform.name_any(),
            platform.metadata.namespace.as_deref().unwrap_or_default(),
            ANNOTATION_LAST_APPLIED,
            &serialized,
        )
        .await
}

/// Every target component outside the action set is rendered and compared
/// with its live primitive; drifted or missing primitives re-enter the
/// update/add buckets
async fn repair_drifted_components(
    injected: &PlatformSpec,
    actions: &mut Actions,
    client: &dyn PlatformKubeClient,
    owner: &k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference,
) -> Result<()> {
    for app in &injected.applications {
        for component in &app.components {
            if component.name.ends_with("-action") || in_actions(actions, component) {
                continue;
            }
            let live = client
                .get_workload(component.workload, &component.name, component.namespace())
                .await?;
            let (added, updated) = match component.workload {
                WorkloadKind::PerNode => (
                    &mut actions.added_daemon_sets,
                    &mut actions.updated_daemon_sets,
                ),
                _ => (&mut actions.added_services, &mut actions.updated_services),
            };
            match live {
                None => {
                    added.insert(component.name.clone(), component.clone());
                }
                Some(live) => {
                    let desired = workload::compose_workload(component, owner)?;
                    if !workloads_equal(&live, &desired)? {
                        debug!(component = %component.name, "live workload drifted from spec");
                        updated.insert(component.name.clone(), component.clone());
                    }
                }
            }
        }
    }
    Ok(())
}

fn in_actions(actions: &Actions, component: &Component) -> bool {
    let name = component.name.as_str();
    actions.added_services.contains_key(name)
        || actions.updated_services.contains_key(name)
        || actions.added_daemon_sets.contains_key(name)
        || actions.updated_daemon_sets.contains_key(name)
}

/// Ensure every class-backed volume has a PVC of the requested size
async fn sync_pvcs(
    component: &Component,
    client: &dyn PlatformKubeClient,
    owner: &k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference,
) -> Result<()> {
    for (index, volume) in component.storage.volumes.iter().enumerate() {
        let desired = match pvc::compose_pvc(component, index, volume, owner) {
            Some(pvc) => pvc,
            None => continue,
        };
        let name = desired.metadata.name.as_deref().unwrap_or_default();
        match client.get_pvc(name, component.namespace()).await? {
            None => client.create_pvc(&desired).await?,
            Some(live) => {
                let live_size = live
                    .spec
                    .as_ref()
                    .and_then(|s| s.resources.as_ref())
                    .and_then(|r| r.requests.as_ref())
                    .and_then(|req| req.get("storage"))
                    .map(|q| q.0.clone());
                let desired_size = volume.size.clone();
                if live_size != desired_size {
                    client.update_pvc(&desired).await?;
                }
            }
        }
    }
    Ok(())
}

/// Ensure configuration objects exist and their contents match the spec
async fn sync_configurations(
    component: &Component,
    client: &dyn PlatformKubeClient,
    owner: &k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference,
) -> Result<()> {
    for configuration in &component.configurations {
        let desired = config::compose_config(component, configuration, owner)?;
        match client
            .get_config(configuration.kind, &configuration.name, component.namespace())
            .await?
        {
            None => client.create_config(&desired).await?,
            Some(live) => {
                if !configs_equal(&live, &desired) {
                    client.update_config(&desired).await?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
