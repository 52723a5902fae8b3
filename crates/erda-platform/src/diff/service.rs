//! Semantic equality for Services. The cluster assigns `clusterIP` and
//! `resourceVersion` server-side; updates must carry both forward or the
//! apiserver rejects the write.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort};

/// Ports compared order-independently by port number
fn port_map(ports: &[ServicePort]) -> BTreeMap<i32, (String, Option<String>)> {
    ports
        .iter()
        .map(|p| {
            (
                p.port,
                (
                    p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                    p.name.clone(),
                ),
            )
        })
        .collect()
}

/// Semantic equality: ports, selector, and type
pub fn services_equal(live: &Service, desired: &Service) -> bool {
    let spec = |s: &Service| {
        (
            s.spec
                .as_ref()
                .map(|sp| port_map(sp.ports.as_deref().unwrap_or(&[]))),
            s.spec.as_ref().and_then(|sp| sp.selector.clone()),
            s.spec
                .as_ref()
                .and_then(|sp| sp.type_.clone())
                .unwrap_or_else(|| "ClusterIP".to_string()),
        )
    };
    spec(live) == spec(desired)
}

/// Carry the server-owned identity of the live object onto the desired
/// one so the update is accepted
pub fn prepare_update(desired: &mut Service, live: &Service) {
    desired.metadata.resource_version = live.metadata.resource_version.clone();
    if let (Some(desired_spec), Some(live_spec)) = (desired.spec.as_mut(), live.spec.as_ref()) {
        desired_spec.cluster_ip = live_spec.cluster_ip.clone();
        desired_spec.cluster_ips = live_spec.cluster_ips.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn service(ports: Vec<(i32, &str)>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".into()),
                selector: Some(BTreeMap::from([("component".to_string(), "api".to_string())])),
                ports: Some(
                    ports
                        .into_iter()
                        .map(|(port, protocol)| ServicePort {
                            port,
                            protocol: Some(protocol.into()),
                            name: Some(format!("{}-{}", protocol.to_lowercase(), port)),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_port_order_does_not_matter() {
        let a = service(vec![(8080, "TCP"), (9090, "TCP")]);
        let b = service(vec![(9090, "TCP"), (8080, "TCP")]);
        assert!(services_equal(&a, &b));
    }

    #[test]
    fn test_port_change_detected() {
        let a = service(vec![(8080, "TCP")]);
        let b = service(vec![(8081, "TCP")]);
        assert!(!services_equal(&a, &b));
        let c = service(vec![(8080, "UDP")]);
        assert!(!services_equal(&a, &c));
    }

    #[test]
    fn test_selector_change_detected() {
        let a = service(vec![(8080, "TCP")]);
        let mut b = service(vec![(8080, "TCP")]);
        b.spec
            .as_mut()
            .unwrap()
            .selector
            .as_mut()
            .unwrap()
            .insert("component".into(), "other".into());
        assert!(!services_equal(&a, &b));
    }

    /// Story: server-assigned identity is carried into updates
    #[test]
    fn story_cluster_ip_preserved_on_update() {
        let mut live = service(vec![(8080, "TCP")]);
        live.metadata.resource_version = Some("42".into());
        live.spec.as_mut().unwrap().cluster_ip = Some("10.96.0.17".into());

        let mut desired = service(vec![(8080, "TCP"), (9090, "TCP")]);
        prepare_update(&mut desired, &live);
        assert_eq!(desired.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(
            desired.spec.unwrap().cluster_ip.as_deref(),
            Some("10.96.0.17")
        );
    }

    /// Story: the live clusterIP alone never forces an update
    #[test]
    fn story_cluster_ip_is_cosmetic() {
        let mut live = service(vec![(8080, "TCP")]);
        live.spec.as_mut().unwrap().cluster_ip = Some("10.96.0.17".into());
        let desired = service(vec![(8080, "TCP")]);
        assert!(services_equal(&live, &desired));
    }
}
