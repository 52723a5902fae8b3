//! Horizontal pod autoscaler for auto-scaled stateless components.
//!
//! Max replicas scale the current count by a factor bucketed on the
//! replica count itself; components whose limit/request ratio exceeds the
//! admitted threshold are refused an HPA outright.

use std::env;

use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HPAScalingPolicy, HPAScalingRules, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerBehavior, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::warn;

use erda_common::crd::Component;
use erda_common::labels::{ENV_HPA_LIMIT_REQUEST_RATIO, ENV_HPA_SCALE_FACTOR};
use erda_common::{Error, Result};

use super::object_metadata;

const DEFAULT_SCALE_FACTOR: i32 = 10;
const DEFAULT_AVERAGE_UTILIZATION: i32 = 85;
const STABILIZATION_WINDOW_SECONDS: i32 = 300;
const SCALE_STEP_PODS: i32 = 2;
const SCALE_STEP_PERCENT: i32 = 50;
const SCALE_PERIOD_SECONDS: i32 = 30;
const DEFAULT_MAX_LIMIT_REQUEST_RATIO: f64 = 5.0;

fn env_i32(key: &str, default: i32) -> i32 {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "not an integer, using default");
            default
        }),
        _ => default,
    }
}

/// Bucketed max-replica factor: small deployments may quintuple, large
/// ones only double
fn scale_factor(replicas: i32) -> i32 {
    let configured = env_i32(ENV_HPA_SCALE_FACTOR, DEFAULT_SCALE_FACTOR).max(1);
    if replicas <= configured / 5 {
        5
    } else if replicas < configured / 2 {
        3
    } else {
        2
    }
}

/// A component whose limits run far above its requests would thrash under
/// utilization-based scaling; refuse the HPA
fn suitable_for_hpa(component: &Component) -> bool {
    let max_ratio = match env::var(ENV_HPA_LIMIT_REQUEST_RATIO) {
        Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or(DEFAULT_MAX_LIMIT_REQUEST_RATIO),
        _ => DEFAULT_MAX_LIMIT_REQUEST_RATIO,
    };

    let cpu_request = component.resources.requested_cpu();
    let cpu_limit = component.resources.limit_cpu().max(cpu_request);
    let mem_request = component.resources.requested_memory_mib() as f64;
    let mem_limit = (component.resources.limit_memory_mib() as f64).max(mem_request);

    let cpu_ok = cpu_request <= 0.0 || cpu_limit / cpu_request <= max_ratio;
    let mem_ok = mem_request <= 0.0 || mem_limit / mem_request <= max_ratio;
    cpu_ok && mem_ok
}

fn utilization_metric(resource: &str) -> MetricSpec {
    MetricSpec {
        type_: "Resource".to_string(),
        resource: Some(ResourceMetricSource {
            name: resource.to_string(),
            target: MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(DEFAULT_AVERAGE_UTILIZATION),
                ..Default::default()
            },
        }),
        ..Default::default()
    }
}

fn scaling_rules() -> HPAScalingRules {
    HPAScalingRules {
        stabilization_window_seconds: Some(STABILIZATION_WINDOW_SECONDS),
        select_policy: Some("Max".to_string()),
        policies: Some(vec![
            HPAScalingPolicy {
                type_: "Pods".to_string(),
                value: SCALE_STEP_PODS,
                period_seconds: SCALE_PERIOD_SECONDS,
            },
            HPAScalingPolicy {
                type_: "Percent".to_string(),
                value: SCALE_STEP_PERCENT,
                period_seconds: SCALE_PERIOD_SECONDS,
            },
        ]),
        ..Default::default()
    }
}

/// Render the HPA targeting the component's Deployment
pub fn compose_hpa(
    component: &Component,
    owner: &OwnerReference,
) -> Result<HorizontalPodAutoscaler> {
    if !suitable_for_hpa(component) {
        return Err(Error::bad_spec_for(
            &component.name,
            "limit to request ratio too high for autoscaling, adjust resources",
        ));
    }

    let replicas = component.replicas.unwrap_or(1).max(1);
    Ok(HorizontalPodAutoscaler {
        metadata: object_metadata(component, owner),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: component.name.clone(),
            },
            min_replicas: Some(replicas),
            max_replicas: scale_factor(replicas) * replicas,
            metrics: Some(vec![utilization_metric("cpu"), utilization_metric("memory")]),
            behavior: Some(HorizontalPodAutoscalerBehavior {
                scale_up: Some(scaling_rules()),
                scale_down: Some(scaling_rules()),
            }),
        }),
        status: None,
    })
}
