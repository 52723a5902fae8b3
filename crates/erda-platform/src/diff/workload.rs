//! Semantic equality for workload controllers.
//!
//! The live object carries server-populated fields the renderer never
//! emits, so equality projects both sides down to what the operator
//! manages: domain-prefixed annotations, replica counts, and the container
//! set compared by image, command, ports, env bag, and cpu/memory
//! resources. Env entries with `valueFrom` sources are ignored.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

use erda_common::crd::{parse_cpu, parse_memory_mib};
use erda_common::labels::ANNOTATION_DOMAIN;
use erda_common::{Error, Result};

use crate::render::Workload;

/// Compare a live workload against the rendered desired state.
///
/// Different kinds are an error: equality of kind is a precondition for
/// comparison, and a kind flip means the caller routed the objects wrong.
pub fn workloads_equal(live: &Workload, desired: &Workload) -> Result<bool> {
    match (live, desired) {
        (Workload::Deployment(a), Workload::Deployment(b)) => {
            let (replicas_a, replicas_b) = (
                a.spec.as_ref().and_then(|s| s.replicas),
                b.spec.as_ref().and_then(|s| s.replicas),
            );
            Ok(annotations_equal(&a.metadata, &b.metadata)
                && replicas_a == replicas_b
                && containers_equal(
                    containers(a.spec.as_ref().map(|s| &s.template)),
                    containers(b.spec.as_ref().map(|s| &s.template)),
                    live.name(),
                ))
        }
        (Workload::StatefulSet(a), Workload::StatefulSet(b)) => {
            let (replicas_a, replicas_b) = (
                a.spec.as_ref().and_then(|s| s.replicas),
                b.spec.as_ref().and_then(|s| s.replicas),
            );
            Ok(annotations_equal(&a.metadata, &b.metadata)
                && replicas_a == replicas_b
                && containers_equal(
                    containers(a.spec.as_ref().map(|s| &s.template)),
                    containers(b.spec.as_ref().map(|s| &s.template)),
                    live.name(),
                ))
        }
        (Workload::DaemonSet(a), Workload::DaemonSet(b)) => {
            Ok(annotations_equal(&a.metadata, &b.metadata)
                && containers_equal(
                    containers(a.spec.as_ref().map(|s| &s.template)),
                    containers(b.spec.as_ref().map(|s| &s.template)),
                    live.name(),
                ))
        }
        _ => Err(Error::bad_spec(format!(
            "cannot compare {} against {}",
            live.kind().primitive_kind(),
            desired.kind().primitive_kind(),
        ))),
    }
}

fn containers(
    template: Option<&k8s_openapi::api::core::v1::PodTemplateSpec>,
) -> &[Container] {
    template
        .and_then(|t| t.spec.as_ref())
        .map(|s| s.containers.as_slice())
        .unwrap_or(&[])
}

/// Only annotations under the operator's domain prefix are compared
fn domain_annotations(meta: &ObjectMeta) -> BTreeMap<&str, &str> {
    meta.annotations
        .iter()
        .flatten()
        .filter(|(k, _)| k.starts_with(ANNOTATION_DOMAIN))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn annotations_equal(a: &ObjectMeta, b: &ObjectMeta) -> bool {
    let equal = domain_annotations(a) == domain_annotations(b);
    if !equal {
        debug!(name = ?a.name, "domain annotations differ");
    }
    equal
}

fn containers_equal(live: &[Container], desired: &[Container], location: &str) -> bool {
    if live.len() != desired.len() {
        return false;
    }
    let live_by_name: BTreeMap<&str, &Container> =
        live.iter().map(|c| (c.name.as_str(), c)).collect();
    for container in desired {
        match live_by_name.get(container.name.as_str()) {
            Some(live_container) => {
                if !container_equal(live_container, container, location) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

fn container_equal(live: &Container, desired: &Container, location: &str) -> bool {
    let image_equal = live.image == desired.image;
    let command_equal = live.command == desired.command && live.args == desired.args;
    let env_equal = envs_equal(
        live.env.as_deref().unwrap_or(&[]),
        desired.env.as_deref().unwrap_or(&[]),
    );
    let ports_equal = ports_equal(
        live.ports.as_deref().unwrap_or(&[]),
        desired.ports.as_deref().unwrap_or(&[]),
    );
    let resources_equal = resources_equal(live, desired);

    let equal = image_equal && command_equal && env_equal && ports_equal && resources_equal;
    if !equal {
        debug!(
            location,
            container = %live.name,
            image_equal,
            command_equal,
            env_equal,
            ports_equal,
            resources_equal,
            "container drifted"
        );
    }
    equal
}

/// Env bags compared by name and plain value; `valueFrom` entries are
/// server-opaque and excluded on both sides
fn envs_equal(live: &[EnvVar], desired: &[EnvVar]) -> bool {
    let bag = |envs: &[EnvVar]| -> BTreeMap<String, String> {
        envs.iter()
            .filter(|e| e.value_from.is_none())
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect()
    };
    bag(live) == bag(desired)
}

/// Ports compared by container-port with multiplicity; the protocol must
/// match at each matching port
fn ports_equal(live: &[ContainerPort], desired: &[ContainerPort]) -> bool {
    if live.len() != desired.len() {
        return false;
    }
    let count = |port: i32, ports: &[ContainerPort]| {
        ports.iter().filter(|p| p.container_port == port).count()
    };
    for port in live {
        if count(port.container_port, live) != count(port.container_port, desired) {
            return false;
        }
        let matched = desired
            .iter()
            .find(|p| p.container_port == port.container_port);
        match matched {
            Some(other) => {
                let live_protocol = port.protocol.as_deref().unwrap_or("TCP");
                let desired_protocol = other.protocol.as_deref().unwrap_or("TCP");
                if live_protocol != desired_protocol {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

fn quantity_cpu(q: Option<&Quantity>) -> f64 {
    q.map(|q| parse_cpu(&q.0)).unwrap_or(0.0)
}

fn quantity_mem(q: Option<&Quantity>) -> i64 {
    q.map(|q| parse_memory_mib(&q.0)).unwrap_or(0)
}

/// Requests and limits compared field by field for cpu and memory,
/// tolerant of notation differences ("1" vs "1000m")
fn resources_equal(live: &Container, desired: &Container) -> bool {
    let field = |c: &Container, list: fn(&k8s_openapi::api::core::v1::ResourceRequirements) -> Option<&BTreeMap<String, Quantity>>, key: &str| -> Option<Quantity> {
        c.resources
            .as_ref()
            .and_then(list)
            .and_then(|m| m.get(key))
            .cloned()
    };
    fn requests(c: &k8s_openapi::api::core::v1::ResourceRequirements) -> Option<&BTreeMap<String, Quantity>> {
        c.requests.as_ref()
    }
    fn limits(c: &k8s_openapi::api::core::v1::ResourceRequirements) -> Option<&BTreeMap<String, Quantity>> {
        c.limits.as_ref()
    }

    quantity_cpu(field(live, requests, "cpu").as_ref())
        == quantity_cpu(field(desired, requests, "cpu").as_ref())
        && quantity_cpu(field(live, limits, "cpu").as_ref())
            == quantity_cpu(field(desired, limits, "cpu").as_ref())
        && quantity_mem(field(live, requests, "memory").as_ref())
            == quantity_mem(field(desired, requests, "memory").as_ref())
        && quantity_mem(field(live, limits, "memory").as_ref())
            == quantity_mem(field(desired, limits, "memory").as_ref())
}
