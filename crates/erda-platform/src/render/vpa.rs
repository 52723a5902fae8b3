//! Vertical pod autoscaler for auto-scaled components.
//!
//! The VPA API (`autoscaling.k8s.io/v1`) is a third-party CRD, so the
//! manifest is rendered as plain JSON and applied as a dynamic object.

use std::env;

use kube::discovery::ApiResource;
use serde_json::{json, Value};
use tracing::warn;

use erda_common::crd::Component;
use erda_common::kube_utils::build_api_resource;
use erda_common::labels::{component_labels, ENV_VPA_SCALE_FACTOR};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

const DEFAULT_SCALE_FACTOR: i64 = 5;
const MAX_ALLOWED_CPU_CORES: f64 = 8.0;
const MAX_ALLOWED_MEMORY_MIB: i64 = 32 * 1024;

/// The VPA API resource
pub fn vpa_api_resource() -> ApiResource {
    build_api_resource(
        "autoscaling.k8s.io/v1",
        "VerticalPodAutoscaler",
        "verticalpodautoscalers",
    )
}

fn scale_factor() -> i64 {
    match env::var(ENV_VPA_SCALE_FACTOR) {
        Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or_else(|_| {
            warn!(value = %raw, "VPA scale factor is not an integer, using default");
            DEFAULT_SCALE_FACTOR
        }),
        _ => DEFAULT_SCALE_FACTOR,
    }
}

/// Render the VPA manifest targeting the component's workload controller
pub fn compose_vpa(component: &Component, owner: &OwnerReference) -> Value {
    let factor = scale_factor();

    let cpu_request_milli = (component.resources.requested_cpu() * 1000.0).round() as i64;
    let mem_request = component.resources.requested_memory_mib();
    let cpu_origin_milli = ((component
        .resources
        .requested_cpu()
        .max(component.resources.limit_cpu()))
        * 1000.0)
        .round() as i64;
    let mem_origin = mem_request.max(component.resources.limit_memory_mib());

    let max_cpu_milli =
        (factor * cpu_origin_milli).min((MAX_ALLOWED_CPU_CORES * 1000.0) as i64);
    let max_mem = (factor * mem_origin).min(MAX_ALLOWED_MEMORY_MIB);

    json!({
        "apiVersion": "autoscaling.k8s.io/v1",
        "kind": "VerticalPodAutoscaler",
        "metadata": {
            "name": component.name,
            "namespace": component.namespace(),
            "labels": component_labels(&component.name, &component.labels),
            "ownerReferences": [owner],
        },
        "spec": {
            "targetRef": {
                "apiVersion": "apps/v1",
                "kind": component.workload.primitive_kind(),
                "name": component.name,
            },
            "updatePolicy": {
                "updateMode": "Auto",
                "minReplicas": 1,
            },
            "resourcePolicy": {
                "containerPolicies": [{
                    "containerName": "*",
                    "minAllowed": {
                        "cpu": format!("{cpu_request_milli}m"),
                        "memory": format!("{mem_request}Mi"),
                    },
                    "maxAllowed": {
                        "cpu": format!("{max_cpu_milli}m"),
                        "memory": format!("{max_mem}Mi"),
                    },
                    "controlledResources": ["cpu", "memory"],
                }]
            }
        }
    })
}
