//! Ingress rendering behind a version strategy.
//!
//! The cluster's ingress API version is discovered once at startup,
//! preferring networking.k8s.io/v1 over extensions/v1beta1, and the chosen
//! strategy renders every ingress from then on. Both strategies emit plain
//! JSON manifests applied as dynamic objects, so call sites never branch on
//! the version.

use kube::api::DynamicObject;
use kube::discovery::{ApiResource, Discovery};
use serde_json::{json, Value};
use tracing::{debug, warn};

use erda_common::crd::Component;
use erda_common::kube_utils::{build_api_resource, find_discovered_resource};
use erda_common::labels::{component_labels, ANNOTATION_INGRESS};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::diff::ingress::ingress_equal;

/// Version-specific ingress rendering and comparison
pub trait IngressStrategy: Send + Sync {
    /// API resource the manifests are applied under
    fn api_resource(&self) -> &ApiResource;

    /// Render the ingress manifest for a component; the component is known
    /// to publish at least one domain
    fn render(&self, component: &Component, owner: &OwnerReference) -> Value;

    /// Semantic equality between the live object and the desired manifest
    fn semantically_equal(&self, live: &DynamicObject, desired: &Value) -> bool {
        ingress_equal(live, desired)
    }
}

/// Annotations parsed from the ingress-annotation snippet; malformed input
/// yields no annotations
fn snippet_annotations(component: &Component) -> Value {
    let snippet = match component.annotations.get(ANNOTATION_INGRESS) {
        Some(s) if !s.is_empty() => s,
        _ => return json!({}),
    };
    match serde_yaml::from_str::<std::collections::BTreeMap<String, String>>(snippet) {
        Ok(map) => json!(map),
        Err(err) => {
            warn!(component = %component.name, error = %err, "malformed ingress-annotation snippet, ignoring");
            json!({})
        }
    }
}

fn metadata(component: &Component, owner: &OwnerReference) -> Value {
    json!({
        "name": component.name,
        "namespace": component.namespace(),
        "labels": component_labels(&component.name, &component.labels),
        "annotations": snippet_annotations(component),
        "ownerReferences": [owner],
    })
}

fn tls_hosts(component: &Component) -> Value {
    json!([{ "hosts": component.domains() }])
}

/// networking.k8s.io/v1 rendering
pub struct NetworkingV1Strategy {
    api_resource: ApiResource,
}

impl NetworkingV1Strategy {
    /// Strategy for the stable ingress API
    pub fn new() -> Self {
        Self {
            api_resource: build_api_resource("networking.k8s.io/v1", "Ingress", "ingresses"),
        }
    }
}

impl Default for NetworkingV1Strategy {
    fn default() -> Self {
        Self::new()
    }
}

impl IngressStrategy for NetworkingV1Strategy {
    fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }

    fn render(&self, component: &Component, owner: &OwnerReference) -> Value {
        let rules: Vec<Value> = component
            .service_discovery()
            .iter()
            .filter(|sd| !sd.domain.is_empty())
            .map(|sd| {
                json!({
                    "host": sd.domain,
                    "http": {
                        "paths": [{
                            "path": sd.path,
                            "pathType": "ImplementationSpecific",
                            "backend": {
                                "service": {
                                    "name": component.name,
                                    "port": { "number": sd.port }
                                }
                            }
                        }]
                    }
                })
            })
            .collect();

        json!({
            "apiVersion": self.api_resource.api_version,
            "kind": "Ingress",
            "metadata": metadata(component, owner),
            "spec": {
                "rules": rules,
                "tls": tls_hosts(component),
            }
        })
    }
}

/// extensions/v1beta1 rendering for clusters predating networking/v1
pub struct ExtensionsV1beta1Strategy {
    api_resource: ApiResource,
}

impl ExtensionsV1beta1Strategy {
    /// Strategy for the legacy ingress API
    pub fn new() -> Self {
        Self {
            api_resource: build_api_resource("extensions/v1beta1", "Ingress", "ingresses"),
        }
    }
}

impl Default for ExtensionsV1beta1Strategy {
    fn default() -> Self {
        Self::new()
    }
}

impl IngressStrategy for ExtensionsV1beta1Strategy {
    fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }

    fn render(&self, component: &Component, owner: &OwnerReference) -> Value {
        let rules: Vec<Value> = component
            .service_discovery()
            .iter()
            .filter(|sd| !sd.domain.is_empty())
            .map(|sd| {
                json!({
                    "host": sd.domain,
                    "http": {
                        "paths": [{
                            "path": sd.path,
                            "backend": {
                                "serviceName": component.name,
                                "servicePort": sd.port
                            }
                        }]
                    }
                })
            })
            .collect();

        json!({
            "apiVersion": self.api_resource.api_version,
            "kind": "Ingress",
            "metadata": metadata(component, owner),
            "spec": {
                "rules": rules,
                "tls": tls_hosts(component),
            }
        })
    }
}

/// Pick the ingress strategy from API discovery, preferring networking/v1
pub fn select_strategy(discovery: &Discovery) -> Box<dyn IngressStrategy> {
    if find_discovered_resource(discovery, "networking.k8s.io", "Ingress").is_some() {
        debug!("using networking.k8s.io/v1 ingress API");
        return Box::new(NetworkingV1Strategy::new());
    }
    if find_discovered_resource(discovery, "extensions", "Ingress").is_some() {
        debug!("using extensions/v1beta1 ingress API");
        return Box::new(ExtensionsV1beta1Strategy::new());
    }
    warn!("no ingress API discovered, assuming networking.k8s.io/v1");
    Box::new(NetworkingV1Strategy::new())
}
