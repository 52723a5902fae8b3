//! Kubernetes client abstraction for the reconciler and launcher.
//!
//! The trait keeps every API call mockable in tests; the real
//! implementation wraps a `kube::Client`. Readiness waits are watches with
//! a hard per-primitive deadline, not polls.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::Job as BatchJob;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::runtime::wait::await_condition;
use kube::Client;
use serde_json::{json, Value};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use erda_common::crd::{ConfigurationKind, Platform, PlatformStatus, WorkloadKind};
use erda_common::error::some_if_found;
use erda_common::kube_utils::{apply_params, post_params};
use erda_common::labels::MANAGED_LABEL;
use erda_common::{Error, Result, FIELD_MANAGER};

use crate::render::config::ConfigObject;
use crate::render::vpa::vpa_api_resource;
use crate::render::Workload;
use crate::status;

/// Hard deadline for a single primitive's readiness wait
pub const READINESS_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// Typed CRUD surface consumed by the reconciler and launcher
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformKubeClient: Send + Sync {
    /// Fetch a workload controller by kind and name
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Workload>>;

    /// Create a workload controller
    async fn create_workload(&self, workload: &Workload) -> Result<()>;

    /// Replace a workload controller
    async fn update_workload(&self, workload: &Workload) -> Result<()>;

    /// Delete a workload controller with background propagation
    async fn delete_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<()>;

    /// List all operator-managed workloads in the namespace, all kinds
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>>;

    /// Watch the workload until it reports ready; hard 60-minute deadline
    async fn wait_workload_ready(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<()>;

    /// Fetch a service
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>>;

    /// Create a service
    async fn create_service(&self, service: &Service) -> Result<()>;

    /// Replace a service; callers carry clusterIP and resourceVersion
    async fn update_service(&self, service: &Service) -> Result<()>;

    /// Delete a service
    async fn delete_service(&self, name: &str, namespace: &str) -> Result<()>;

    /// Fetch an ingress under the discovered API version
    async fn get_ingress(
        &self,
        api_resource: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Server-side apply an ingress manifest
    async fn apply_ingress(
        &self,
        api_resource: &ApiResource,
        name: &str,
        namespace: &str,
        manifest: &Value,
    ) -> Result<()>;

    /// Delete an ingress
    async fn delete_ingress(
        &self,
        api_resource: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<()>;

    /// Fetch a configuration object
    async fn get_config(
        &self,
        kind: ConfigurationKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigObject>>;

    /// Create a configuration object
    async fn create_config(&self, config: &ConfigObject) -> Result<()>;

    /// Replace a configuration object
    async fn update_config(&self, config: &ConfigObject) -> Result<()>;

    /// Fetch a persistent volume claim
    async fn get_pvc(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<PersistentVolumeClaim>>;

    /// Create a persistent volume claim
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()>;

    /// Replace a persistent volume claim (size changes only)
    async fn update_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()>;

    /// List batch jobs matching a label selector
    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<BatchJob>>;

    /// Create a batch job
    async fn create_job(&self, job: &BatchJob) -> Result<()>;

    /// Server-side apply an HPA
    async fn apply_hpa(&self, hpa: &HorizontalPodAutoscaler) -> Result<()>;

    /// Delete an HPA, tolerating absence
    async fn delete_hpa(&self, name: &str, namespace: &str) -> Result<()>;

    /// Server-side apply a VPA manifest
    async fn apply_vpa(&self, name: &str, namespace: &str, manifest: &Value) -> Result<()>;

    /// Delete a VPA, tolerating absence
    async fn delete_vpa(&self, name: &str, namespace: &str) -> Result<()>;

    /// Patch the Platform status subresource
    async fn patch_platform_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PlatformStatus,
    ) -> Result<()>;

    /// Merge-patch one annotation onto the Platform
    async fn annotate_platform(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;
}

/// Real client implementation wrapping `kube::Client`
pub struct PlatformKubeClientImpl {
    client: Client,
    vpa_api: ApiResource,
}

impl PlatformKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            vpa_api: vpa_api_resource(),
        }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn stateful_sets(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn daemon_sets(&self, namespace: &str) -> Api<DaemonSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic(&self, api_resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, api_resource)
    }

    fn managed_selector() -> ListParams {
        ListParams::default().labels(&format!("{MANAGED_LABEL}=true"))
    }
}

fn ignore_not_found(res: std::result::Result<(), Error>) -> Result<()> {
    match res {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

#[async_trait]
impl PlatformKubeClient for PlatformKubeClientImpl {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Workload>> {
        Ok(match kind {
            WorkloadKind::Stateless => some_if_found(self.deployments(namespace).get(name).await)?
                .map(Workload::Deployment),
            WorkloadKind::Stateful => {
                some_if_found(self.stateful_sets(namespace).get(name).await)?
                    .map(Workload::StatefulSet)
            }
            WorkloadKind::PerNode => some_if_found(self.daemon_sets(namespace).get(name).await)?
                .map(Workload::DaemonSet),
        })
    }

    async fn create_workload(&self, workload: &Workload) -> Result<()> {
        let params = post_params();
        let namespace = workload.namespace().to_string();
        match workload {
            Workload::Deployment(d) => {
                self.deployments(&namespace).create(&params, d).await?;
            }
            Workload::StatefulSet(s) => {
                self.stateful_sets(&namespace).create(&params, s).await?;
            }
            Workload::DaemonSet(ds) => {
                self.daemon_sets(&namespace).create(&params, ds).await?;
            }
        }
        Ok(())
    }

    async fn update_workload(&self, workload: &Workload) -> Result<()> {
        let params = post_params();
        let namespace = workload.namespace().to_string();
        let name = workload.name().to_string();
        match workload {
            Workload::Deployment(d) => {
                self.deployments(&namespace).replace(&name, &params, d).await?;
            }
            Workload::StatefulSet(s) => {
                self.stateful_sets(&namespace)
                    .replace(&name, &params, s)
                    .await?;
            }
            Workload::DaemonSet(ds) => {
                self.daemon_sets(&namespace)
                    .replace(&name, &params, ds)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<()> {
        let params = DeleteParams::background();
        ignore_not_found(match kind {
            WorkloadKind::Stateless => self
                .deployments(namespace)
                .delete(name, &params)
                .await
                .map(|_| ())
                .map_err(Error::from),
            WorkloadKind::Stateful => self
                .stateful_sets(namespace)
                .delete(name, &params)
                .await
                .map(|_| ())
                .map_err(Error::from),
            WorkloadKind::PerNode => self
                .daemon_sets(namespace)
                .delete(name, &params)
                .await
                .map(|_| ())
                .map_err(Error::from),
        })
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>> {
        let selector = Self::managed_selector();
        let mut workloads = Vec::new();
        for deployment in self.deployments(namespace).list(&selector).await?.items {
            workloads.push(Workload::Deployment(deployment));
        }
        for stateful_set in self.stateful_sets(namespace).list(&selector).await?.items {
            workloads.push(Workload::StatefulSet(stateful_set));
        }
        for daemon_set in self.daemon_sets(namespace).list(&selector).await?.items {
            workloads.push(Workload::DaemonSet(daemon_set));
        }
        Ok(workloads)
    }

    async fn wait_workload_ready(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<()> {
        debug!(name, %kind, "waiting for workload readiness");
        let wait = async {
            match kind {
                WorkloadKind::Stateless => {
                    await_condition(
                        self.deployments(namespace),
                        name,
                        |obj: Option<&Deployment>| {
                            obj.map(status::deployment_available).unwrap_or(false)
                        },
                    )
                    .await
                    .map(|_| ())
                }
                WorkloadKind::Stateful => {
                    await_condition(
                        self.stateful_sets(namespace),
                        name,
                        |obj: Option<&StatefulSet>| {
                            obj.map(status::statefulset_ready).unwrap_or(false)
                        },
                    )
                    .await
                    .map(|_| ())
                }
                WorkloadKind::PerNode => {
                    await_condition(
                        self.daemon_sets(namespace),
                        name,
                        |obj: Option<&DaemonSet>| {
                            obj.map(status::daemonset_available).unwrap_or(false)
                        },
                    )
                    .await
                    .map(|_| ())
                }
            }
        };
        match tokio::time::timeout(READINESS_DEADLINE, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::internal_with_context(
                "readiness-wait",
                format!("{} {}: {}", kind.primitive_kind(), name, err),
            )),
            Err(_) => Err(Error::deadline_exceeded(kind.primitive_kind(), name)),
        }
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        some_if_found(api.get(name).await)
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&post_params(), service).await?;
        Ok(())
    }

    async fn update_service(&self, service: &Service) -> Result<()> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let name = service.metadata.name.as_deref().unwrap_or_default();
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &post_params(), service).await?;
        Ok(())
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(Error::from),
        )
    }

    async fn get_ingress(
        &self,
        api_resource: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DynamicObject>> {
        some_if_found(self.dynamic(api_resource, namespace).get(name).await)
    }

    async fn apply_ingress(
        &self,
        api_resource: &ApiResource,
        name: &str,
        namespace: &str,
        manifest: &Value,
    ) -> Result<()> {
        self.dynamic(api_resource, namespace)
            .patch(name, &apply_params(), &Patch::Apply(manifest))
            .await?;
        Ok(())
    }

    async fn delete_ingress(
        &self,
        api_resource: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<()> {
        ignore_not_found(
            self.dynamic(api_resource, namespace)
                .delete(name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(Error::from),
        )
    }

    async fn get_config(
        &self,
        kind: ConfigurationKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigObject>> {
        Ok(match kind {
            ConfigurationKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                some_if_found(api.get(name).await)?.map(ConfigObject::ConfigMap)
            }
            ConfigurationKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                some_if_found(api.get(name).await)?.map(ConfigObject::Secret)
            }
        })
    }

    async fn create_config(&self, config: &ConfigObject) -> Result<()> {
        let params = post_params();
        match config {
            ConfigObject::ConfigMap(cm) => {
                let namespace = cm.metadata.namespace.as_deref().unwrap_or_default();
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                api.create(&params, cm).await?;
            }
            ConfigObject::Secret(secret) => {
                let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                api.create(&params, secret).await?;
            }
        }
        Ok(())
    }

    async fn update_config(&self, config: &ConfigObject) -> Result<()> {
        match config {
            ConfigObject::ConfigMap(cm) => {
                let namespace = cm.metadata.namespace.as_deref().unwrap_or_default();
                let name = cm.metadata.name.as_deref().unwrap_or_default();
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &apply_params(), &Patch::Apply(cm)).await?;
            }
            ConfigObject::Secret(secret) => {
                let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
                let name = secret.metadata.name.as_deref().unwrap_or_default();
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &apply_params(), &Patch::Apply(secret))
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_pvc(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        some_if_found(api.get(name).await)
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        let namespace = pvc.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.create(&post_params(), pvc).await?;
        Ok(())
    }

    async fn update_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        let namespace = pvc.metadata.namespace.as_deref().unwrap_or_default();
        let name = pvc.metadata.name.as_deref().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &apply_params(), &Patch::Apply(pvc)).await?;
        Ok(())
    }

    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<BatchJob>> {
        let api: Api<BatchJob> = Api::namespaced(self.client.clone(), namespace);
        let jobs = api
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(jobs.items)
    }

    async fn create_job(&self, job: &BatchJob) -> Result<()> {
        let namespace = job.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<BatchJob> = Api::namespaced(self.client.clone(), namespace);
        api.create(&post_params(), job).await?;
        Ok(())
    }

    async fn apply_hpa(&self, hpa: &HorizontalPodAutoscaler) -> Result<()> {
        let namespace = hpa.metadata.namespace.as_deref().unwrap_or_default();
        let name = hpa.metadata.name.as_deref().unwrap_or_default();
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &apply_params(), &Patch::Apply(hpa)).await?;
        Ok(())
    }

    async fn delete_hpa(&self, name: &str, namespace: &str) -> Result<()> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(Error::from),
        )
    }

    async fn apply_vpa(&self, name: &str, namespace: &str, manifest: &Value) -> Result<()> {
        self.dynamic(&self.vpa_api, namespace)
            .patch(name, &apply_params(), &Patch::Apply(manifest))
            .await?;
        Ok(())
    }

    async fn delete_vpa(&self, name: &str, namespace: &str) -> Result<()> {
        ignore_not_found(
            self.dynamic(&self.vpa_api, namespace)
                .delete(name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(Error::from),
        )
    }

    async fn patch_platform_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PlatformStatus,
    ) -> Result<()> {
        let api: Api<Platform> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn annotate_platform(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let api: Api<Platform> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
