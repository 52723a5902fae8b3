//! Workload controller composition. The workload kind is a closed sum:
//! each variant carries its own render function instead of a shared
//! abstract base.

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, DeploymentSpec,
    RollingUpdateDaemonSet, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use erda_common::crd::{Component, WorkloadKind};
use erda_common::Result;

use super::{object_metadata, pod};

const REVISION_HISTORY_LIMIT: i32 = 3;
const DAEMONSET_MAX_UNAVAILABLE: i32 = 5;

/// A rendered or live workload controller object
#[derive(Clone, Debug)]
pub enum Workload {
    /// Stateless component
    Deployment(Deployment),
    /// Stateful component
    StatefulSet(StatefulSet),
    /// Per-node component
    DaemonSet(DaemonSet),
}

impl Workload {
    /// The workload kind of this object
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Deployment(_) => WorkloadKind::Stateless,
            Workload::StatefulSet(_) => WorkloadKind::Stateful,
            Workload::DaemonSet(_) => WorkloadKind::PerNode,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Workload::Deployment(d) => &d.metadata,
            Workload::StatefulSet(s) => &s.metadata,
            Workload::DaemonSet(ds) => &ds.metadata,
        }
    }

    /// Object name; empty only for malformed live objects
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Carry the live object's resourceVersion so an update replaces the
    /// revision it was compared against
    pub fn set_resource_version(&mut self, resource_version: Option<String>) {
        let meta = match self {
            Workload::Deployment(d) => &mut d.metadata,
            Workload::StatefulSet(s) => &mut s.metadata,
            Workload::DaemonSet(ds) => &mut ds.metadata,
        };
        meta.resource_version = resource_version;
    }
}

// selector and template labels stay identical, bound labels included
fn selector(component: &Component) -> LabelSelector {
    LabelSelector {
        match_labels: Some(pod::pod_labels(component)),
        match_expressions: None,
    }
}

fn deployment(component: &Component, owner: &OwnerReference) -> Result<Deployment> {
    Ok(Deployment {
        metadata: object_metadata(component, owner),
        spec: Some(DeploymentSpec {
            replicas: component.replicas,
            selector: selector(component),
            template: pod::pod_template(component)?,
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            ..Default::default()
        }),
        status: None,
    })
}

fn stateful_set(component: &Component, owner: &OwnerReference) -> Result<StatefulSet> {
    Ok(StatefulSet {
        metadata: object_metadata(component, owner),
        spec: Some(StatefulSetSpec {
            replicas: component.replicas,
            selector: selector(component),
            template: pod::pod_template(component)?,
            service_name: component.name.clone(),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            ..Default::default()
        }),
        status: None,
    })
}

fn daemon_set(component: &Component, owner: &OwnerReference) -> Result<DaemonSet> {
    Ok(DaemonSet {
        metadata: object_metadata(component, owner),
        spec: Some(DaemonSetSpec {
            selector: selector(component),
            template: pod::pod_template(component)?,
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::Int(DAEMONSET_MAX_UNAVAILABLE)),
                    max_surge: None,
                }),
            }),
            ..Default::default()
        }),
        status: None,
    })
}

/// Render the workload controller for a component
pub fn compose_workload(component: &Component, owner: &OwnerReference) -> Result<Workload> {
    Ok(match component.workload {
        WorkloadKind::Stateless => Workload::Deployment(deployment(component, owner)?),
        WorkloadKind::Stateful => Workload::StatefulSet(stateful_set(component, owner)?),
        WorkloadKind::PerNode => Workload::DaemonSet(daemon_set(component, owner)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use erda_common::crd::{ImageInfo, Network, ServiceDiscovery};
    use erda_common::labels::{COMPONENT_LABEL, MANAGED_LABEL};

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "erda.terminus.io/v1beta1".into(),
            kind: "Platform".into(),
            name: "erda".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            ..Default::default()
        }
    }

    fn component(kind: WorkloadKind) -> Component {
        Component {
            name: "api".into(),
            namespace: Some("erda-system".into()),
            workload: kind,
            replicas: Some(2),
            image_info: ImageInfo {
                image: "img:1".into(),
                ..Default::default()
            },
            network: Some(Network {
                service_discovery: vec![ServiceDiscovery {
                    port: 8080,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Story: a Stateless component becomes a Deployment with replicas
    #[test]
    fn story_stateless_renders_deployment() {
        let workload = compose_workload(&component(WorkloadKind::Stateless), &owner()).unwrap();
        let deployment = match workload {
            Workload::Deployment(d) => d,
            other => panic!("expected Deployment, got {:?}", other.kind()),
        };
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.revision_history_limit, Some(3));
        let selector = spec.selector.match_labels.unwrap();
        assert_eq!(selector.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(selector.get(COMPONENT_LABEL).map(String::as_str), Some("api"));
        // template labels mirror the selector
        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        for (k, v) in &selector {
            assert_eq!(template_labels.get(k), Some(v));
        }
    }

    /// Story: a Stateful component names its governing service after itself
    #[test]
    fn story_stateful_renders_statefulset() {
        let workload = compose_workload(&component(WorkloadKind::Stateful), &owner()).unwrap();
        let set = match workload {
            Workload::StatefulSet(s) => s,
            other => panic!("expected StatefulSet, got {:?}", other.kind()),
        };
        let spec = set.spec.unwrap();
        assert_eq!(spec.service_name, "api");
        assert_eq!(spec.replicas, Some(2));
    }

    /// Story: a PerNode component rolls with maxUnavailable 5
    #[test]
    fn story_pernode_renders_daemonset() {
        let workload = compose_workload(&component(WorkloadKind::PerNode), &owner()).unwrap();
        let ds = match workload {
            Workload::DaemonSet(d) => d,
            other => panic!("expected DaemonSet, got {:?}", other.kind()),
        };
        let strategy = ds.spec.unwrap().update_strategy.unwrap();
        assert_eq!(strategy.type_.as_deref(), Some("RollingUpdate"));
        assert_eq!(
            strategy.rolling_update.unwrap().max_unavailable,
            Some(IntOrString::Int(5))
        );
    }

    #[test]
    fn test_workload_accessors() {
        let workload = compose_workload(&component(WorkloadKind::Stateless), &owner()).unwrap();
        assert_eq!(workload.name(), "api");
        assert_eq!(workload.namespace(), "erda-system");
        assert_eq!(workload.kind(), WorkloadKind::Stateless);
        assert_eq!(workload.kind().primitive_kind(), "Deployment");
    }
}
