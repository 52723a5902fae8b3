//! Launcher: executes an action set with one concurrent fan-out per
//! (kind, operation) bucket.
//!
//! Bucket order is updates, deletes, adds, services before daemonsets.
//! The add/update worker is a composite: Service, then Ingress, then the
//! workload controller, then a readiness wait with a 60-minute deadline.
//! A deadline overrun preserves the current phase (the next tick retries);
//! an API error marks the platform Failed. Deletes never wait.

use std::collections::BTreeMap;

use futures::future::join_all;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{error, info};

use erda_common::crd::{
    Component, PlatformPhase, PlatformStatus, ResourceState, WorkloadKind,
};
use erda_common::{Error, Result};

use crate::client::PlatformKubeClient;
use crate::diff::service::{prepare_update, services_equal};
use crate::diff::workload::workloads_equal;
use crate::diff::Actions;
use crate::render::ingress::IngressStrategy;
use crate::render::{hpa, service, vpa, workload};

/// Per-action outcome reported by a worker
struct Outcome {
    name: String,
    message: String,
    complete: bool,
    /// Phase to record on failure; `None` preserves the current phase
    phase: Option<PlatformPhase>,
}

#[derive(Clone, Copy, PartialEq)]
enum Operation {
    Update,
    Delete,
    Add,
}

impl Operation {
    fn label(&self, daemonset: bool) -> &'static str {
        match (self, daemonset) {
            (Operation::Update, false) => "update Service",
            (Operation::Delete, false) => "delete Service",
            (Operation::Add, false) => "add Service",
            (Operation::Update, true) => "update DaemonSet",
            (Operation::Delete, true) => "delete DaemonSet",
            (Operation::Add, true) => "add DaemonSet",
        }
    }
}

/// Executes one tick's action set against the cluster
pub struct Launcher<'a> {
    actions: &'a Actions,
    platform_name: &'a str,
    namespace: &'a str,
    owner: OwnerReference,
    phase: PlatformPhase,
    client: &'a dyn PlatformKubeClient,
    ingress: &'a dyn IngressStrategy,
}

impl<'a> Launcher<'a> {
    /// Build a launcher for one reconcile tick
    pub fn new(
        actions: &'a Actions,
        platform_name: &'a str,
        namespace: &'a str,
        owner: OwnerReference,
        phase: PlatformPhase,
        client: &'a dyn PlatformKubeClient,
        ingress: &'a dyn IngressStrategy,
    ) -> Self {
        Self {
            actions,
            platform_name,
            namespace,
            owner,
            phase,
            client,
            ingress,
        }
    }

    /// Run every bucket; returns a composite error naming all failing
    /// components per bucket
    pub async fn launch(&self, status: &mut PlatformStatus) -> Result<()> {
        if !self.actions.is_empty() {
            info!(platform = %self.platform_name, actions = %self.actions, "launch actions");
        }

        let buckets: [(&BTreeMap<String, Component>, Operation, bool); 6] = [
            (&self.actions.updated_services, Operation::Update, false),
            (&self.actions.deleted_services, Operation::Delete, false),
            (&self.actions.added_services, Operation::Add, false),
            (&self.actions.updated_daemon_sets, Operation::Update, true),
            (&self.actions.deleted_daemon_sets, Operation::Delete, true),
            (&self.actions.added_daemon_sets, Operation::Add, true),
        ];

        let mut failures: Vec<String> = Vec::new();
        for (bucket, operation, daemonset) in buckets {
            if let Some(failed) = self
                .run_bucket(bucket, operation, operation.label(daemonset), status)
                .await?
            {
                failures.push(failed);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::launch(failures.join("; ")))
        }
    }

    /// Fan out one bucket; returns the failure summary line, if any
    async fn run_bucket(
        &self,
        bucket: &BTreeMap<String, Component>,
        operation: Operation,
        label: &str,
        status: &mut PlatformStatus,
    ) -> Result<Option<String>> {
        if bucket.is_empty() {
            return Ok(None);
        }

        if operation != Operation::Delete {
            for name in bucket.keys() {
                set_component_state(status, name, ResourceState::Deploying);
            }
            self.patch_status(status).await?;
        }

        let workers = bucket.values().map(|component| async move {
            match operation {
                Operation::Add | Operation::Update => self.converge_component(component).await,
                Operation::Delete => self.delete_component(component).await,
            }
        });
        let outcomes = join_all(workers).await;

        let mut failed_names = Vec::new();
        let mut status_dirty = false;
        for outcome in outcomes {
            if !outcome.complete {
                error!(
                    operation = label,
                    component = %outcome.name,
                    message = %outcome.message,
                    "launch action failed"
                );
                failed_names.push(outcome.name.clone());
                status.push_condition(outcome.message.clone(), None);
                status_dirty = true;
                if let Some(phase) = outcome.phase {
                    status.phase = phase;
                }
            }
        }
        if status_dirty {
            self.patch_status(status).await?;
        }

        if failed_names.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!("{}: {} failed", label, failed_names.join(", "))))
        }
    }

    async fn patch_status(&self, status: &PlatformStatus) -> Result<()> {
        self.client
            .patch_platform_status(self.platform_name, self.namespace, status)
            .await
    }

    /// Composite add/update worker: Service, Ingress, workload, autoscalers,
    /// readiness wait
    async fn converge_component(&self, component: &Component) -> Outcome {
        let name = component.name.clone();

        if let Err(err) = self.converge_service(component).await {
            return self.failed(&name, format!("failed to converge service {name}: {err}"));
        }
        if let Err(err) = self.converge_ingress(component).await {
            return self.failed(&name, format!("failed to converge ingress {name}: {err}"));
        }
        if let Err(err) = self.converge_workload(component).await {
            return self.failed(&name, format!("failed to converge workload {name}: {err}"));
        }
        if let Err(err) = self.converge_autoscalers(component).await {
            return self.failed(&name, format!("failed to converge autoscalers {name}: {err}"));
        }

        match self
            .client
            .wait_workload_ready(component.workload, &name, component.namespace())
            .await
        {
            Ok(()) => Outcome {
                name: name.clone(),
                message: format!("check {name} done"),
                complete: true,
                phase: None,
            },
            Err(err @ Error::DeadlineExceeded { .. }) => Outcome {
                // non-fatal to the tick: record and let the next tick retry
                name: name.clone(),
                message: err.to_string(),
                complete: false,
                phase: Some(self.phase),
            },
            Err(err) => self.failed(&name, format!("failed readiness check {name}: {err}")),
        }
    }

    fn failed(&self, name: &str, message: String) -> Outcome {
        Outcome {
            name: name.to_string(),
            message,
            complete: false,
            phase: Some(PlatformPhase::Failed),
        }
    }

    async fn converge_service(&self, component: &Component) -> Result<()> {
        let desired = match service::compose_service(component, &self.owner) {
            Some(service) => service,
            None => return Ok(()),
        };
        let namespace = component.namespace();
        match self.client.get_service(&component.name, namespace).await? {
            None => self.client.create_service(&desired).await,
            Some(live) => {
                if services_equal(&live, &desired) {
                    return Ok(());
                }
                let mut desired = desired;
                prepare_update(&mut desired, &live);
                self.client.update_service(&desired).await
            }
        }
    }

    async fn converge_ingress(&self, component: &Component) -> Result<()> {
        let namespace = component.namespace();
        let api_resource = self.ingress.api_resource();
        if component.domains().is_empty() {
            // a domain removed from the spec retires its ingress
            if !component.service_discovery().is_empty() {
                self.client
                    .delete_ingress(api_resource, &component.name, namespace)
                    .await?;
            }
            return Ok(());
        }

        let desired = self.ingress.render(component, &self.owner);
        match self
            .client
            .get_ingress(api_resource, &component.name, namespace)
            .await?
        {
            Some(live) if self.ingress.semantically_equal(&live, &desired) => Ok(()),
            _ => {
                self.client
                    .apply_ingress(api_resource, &component.name, namespace, &desired)
                    .await
            }
        }
    }

    async fn converge_workload(&self, component: &Component) -> Result<()> {
        let desired = workload::compose_workload(component, &self.owner)?;
        let namespace = component.namespace();
        let live = self
            .client
            .get_workload(component.workload, &component.name, namespace)
            .await?;

        match live {
            None => self.client.create_workload(&desired).await,
            Some(live) => {
                if workloads_equal(&live, &desired)? {
                    return Ok(());
                }
                let mut desired = desired;
                desired.set_resource_version(live.metadata().resource_version.clone());
                match self.client.update_workload(&desired).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.needs_recreate() => {
                        // immutable field changed: recreate in place
                        self.client
                            .delete_workload(component.workload, &component.name, namespace)
                            .await?;
                        desired.set_resource_version(None);
                        self.client.create_workload(&desired).await
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn converge_autoscalers(&self, component: &Component) -> Result<()> {
        if !component.auto_scale || component.workload != WorkloadKind::Stateless {
            return Ok(());
        }
        let hpa = hpa::compose_hpa(component, &self.owner)?;
        self.client.apply_hpa(&hpa).await?;
        let vpa = vpa::compose_vpa(component, &self.owner);
        self.client
            .apply_vpa(&component.name, component.namespace(), &vpa)
            .await
    }

    /// Delete worker: workload, service, ingress, autoscalers; deletes
    /// propagate in the background and never wait
    async fn delete_component(&self, component: &Component) -> Outcome {
        let name = component.name.clone();
        let namespace = component.namespace();

        let result: Result<()> = async {
            self.client
                .delete_workload(component.workload, &name, namespace)
                .await?;
            self.client.delete_service(&name, namespace).await?;
            self.client
                .delete_ingress(self.ingress.api_resource(), &name, namespace)
                .await?;
            self.client.delete_hpa(&name, namespace).await?;
            self.client.delete_vpa(&name, namespace).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Outcome {
                name: name.clone(),
                message: format!("delete {name} done"),
                complete: true,
                phase: None,
            },
            Err(err) => self.failed(&name, format!("failed to delete {name}: {err}")),
        }
    }
}

/// Mark one component's state across the application statuses
pub fn set_component_state(status: &mut PlatformStatus, name: &str, state: ResourceState) {
    for app in &mut status.applications {
        for component in &mut app.components {
            if component.name == name {
                component.status = state;
            }
        }
    }
}
