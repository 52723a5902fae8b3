//! Status projection: folds live workload state into per-component and
//! per-application status, and surfaces orphaned workloads for garbage
//! collection.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};

use erda_common::crd::{
    ApplicationStatus, ComponentStatus, PlatformSpec, ResourceState, WorkloadKind,
};

use crate::render::Workload;

/// Deployment readiness: all desired replicas available, none unavailable
pub fn deployment_available(deployment: &Deployment) -> bool {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas);
    let status = match deployment.status.as_ref() {
        Some(status) => status,
        None => return false,
    };
    if status.observed_generation.unwrap_or(0) == 0 {
        return false;
    }
    let desired = match desired {
        Some(replicas) => replicas,
        // nil replicas means the server default; anything available counts
        None => return true,
    };
    status.available_replicas.unwrap_or(0) == desired
        && status.unavailable_replicas.unwrap_or(0) == 0
}

/// DaemonSet readiness: scheduled everywhere it should be, none unavailable
pub fn daemonset_available(daemonset: &DaemonSet) -> bool {
    let status = match daemonset.status.as_ref() {
        Some(status) => status,
        None => return false,
    };
    status.observed_generation.unwrap_or(0) != 0
        && status.desired_number_scheduled == status.number_available.unwrap_or(0)
        && status.number_unavailable.unwrap_or(0) == 0
}

/// StatefulSet readiness: every desired replica reports ready
pub fn statefulset_ready(statefulset: &StatefulSet) -> bool {
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let status = match statefulset.status.as_ref() {
        Some(status) => status,
        None => return false,
    };
    status.observed_generation.unwrap_or(0) != 0 && status.ready_replicas.unwrap_or(0) == desired
}

/// Observed state of a live workload
pub fn workload_state(workload: &Workload) -> ResourceState {
    let ready = match workload {
        Workload::Deployment(d) => deployment_available(d),
        Workload::DaemonSet(ds) => daemonset_available(ds),
        Workload::StatefulSet(s) => statefulset_ready(s),
    };
    if ready {
        ResourceState::Ready
    } else {
        ResourceState::Deploying
    }
}

/// Result of projecting live workloads onto a spec
pub struct Projection {
    /// Per-application statuses, index-aligned with the spec
    pub applications: Vec<ApplicationStatus>,
    /// Live workloads carrying the operator label with no spec counterpart
    pub orphans: Vec<Workload>,
    /// True when every component is Ready and no orphans remain
    pub all_ready: bool,
}

fn object_key(name: &str, kind: WorkloadKind) -> String {
    format!("{name}-{kind}")
}

/// Fold live workloads into the spec's status shape
pub fn project(spec: &PlatformSpec, live: Vec<Workload>) -> Projection {
    let mut live_by_key: BTreeMap<String, Workload> = live
        .into_iter()
        .map(|w| (object_key(w.name(), w.kind()), w))
        .collect();

    let mut every_component_ready = true;
    let mut applications = Vec::with_capacity(spec.applications.len());

    for app in &spec.applications {
        let mut all_components_ready = true;
        let mut components = Vec::with_capacity(app.components.len());
        for component in &app.components {
            let state = match live_by_key.remove(&object_key(&component.name, component.workload))
            {
                Some(workload) => workload_state(&workload),
                None => ResourceState::Unknown,
            };
            if state != ResourceState::Ready {
                all_components_ready = false;
                every_component_ready = false;
            }
            components.push(ComponentStatus {
                name: component.name.clone(),
                status: state,
            });
        }
        applications.push(ApplicationStatus {
            name: app.name.clone(),
            status: if all_components_ready {
                ResourceState::Ready
            } else {
                ResourceState::Deploying
            },
            components,
        });
    }

    let orphans: Vec<Workload> = live_by_key.into_values().collect();
    let all_ready = every_component_ready && orphans.is_empty();

    Projection {
        applications,
        orphans,
        all_ready,
    }
}
