//! ClusterIP service per component: ports sorted ascending, de-duplicated
//! by number, named `<proto-lower>-<port>`.

use k8s_openapi::api::core::v1::{ContainerPort, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use erda_common::crd::{Component, ServiceDiscovery};
use erda_common::labels::component_labels;

use super::object_metadata;

/// Map a ServiceDiscovery protocol hint onto an L4 protocol
pub fn l4_protocol(protocol: &str) -> &'static str {
    match protocol.to_uppercase().as_str() {
        "UDP" => "UDP",
        _ => "TCP",
    }
}

/// Ports sorted ascending and de-duplicated by port number, first entry
/// wins
fn sorted_unique_ports(discovery: &[ServiceDiscovery]) -> Vec<&ServiceDiscovery> {
    let mut seen: Vec<&ServiceDiscovery> = Vec::new();
    for sd in discovery {
        if !seen.iter().any(|s| s.port == sd.port) {
            seen.push(sd);
        }
    }
    seen.sort_by_key(|sd| sd.port);
    seen
}

/// Container ports mirroring the service ports
pub fn container_ports(component: &Component) -> Option<Vec<ContainerPort>> {
    let discovery = component.service_discovery();
    if discovery.is_empty() {
        return None;
    }
    Some(
        sorted_unique_ports(discovery)
            .into_iter()
            .map(|sd| ContainerPort {
                container_port: sd.port,
                protocol: Some(l4_protocol(&sd.protocol).to_string()),
                ..Default::default()
            })
            .collect(),
    )
}

/// Compose the ClusterIP service; `None` when the component exposes
/// nothing
pub fn compose_service(component: &Component, owner: &OwnerReference) -> Option<Service> {
    let discovery = component.service_discovery();
    if discovery.is_empty() {
        return None;
    }

    let ports: Vec<ServicePort> = sorted_unique_ports(discovery)
        .into_iter()
        .map(|sd| {
            let protocol = l4_protocol(&sd.protocol);
            ServicePort {
                name: Some(format!("{}-{}", protocol.to_lowercase(), sd.port)),
                port: sd.port,
                target_port: Some(IntOrString::Int(sd.port)),
                protocol: Some(protocol.to_string()),
                ..Default::default()
            }
        })
        .collect();

    Some(Service {
        metadata: object_metadata(component, owner),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            session_affinity: Some("None".to_string()),
            selector: Some(component_labels(&component.name, &component.labels)),
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    })
}
