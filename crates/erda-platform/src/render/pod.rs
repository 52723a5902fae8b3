//! Pod template composition for component workloads.

use std::collections::BTreeMap;
use std::env;

use k8s_openapi::api::core::v1::{
    Container, EnvVar as K8sEnvVar, EnvVarSource, LocalObjectReference, ObjectFieldSelector,
    PodSpec, PodTemplateSpec, SecurityContext, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use erda_common::crd::Component;
use erda_common::labels::{
    component_labels, ANNOTATION_COMPONENT_SA, ANNOTATION_PRIVILEGED, BOUND_PREFIX, CPU_BOUND,
    DATABASE_TLS_SECRET_NAME, DEFAULT_SERVICE_ACCOUNT, ENV_ENABLE_AFFINITY, IO_BOUND,
};
use erda_common::Result;

use super::{affinity, envs_to_k8s, env_from_to_k8s, host_aliases, probe, resources_to_k8s,
    shell_command, volume};

fn affinity_enabled() -> bool {
    env::var(ENV_ENABLE_AFFINITY).as_deref() != Ok("false")
}

/// Two NoSchedule tolerations for master and lb node roles; platform
/// machines are routinely reused
fn default_tolerations() -> Vec<Toleration> {
    ["node-role.kubernetes.io/master", "node-role.kubernetes.io/lb"]
        .into_iter()
        .map(|key| Toleration {
            key: Some(key.to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        })
        .collect()
}

fn field_ref_env(name: &str, field_path: &str) -> K8sEnvVar {
    K8sEnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: field_path.to_string(),
            }),
            ..Default::default()
        }),
    }
}

/// Pod-runtime metadata envs appended after the composed env list
fn runtime_envs(component: &Component) -> Vec<K8sEnvVar> {
    let mut envs = vec![
        K8sEnvVar {
            name: "DICE_COMPONENT".to_string(),
            value: Some(component.name.clone()),
            value_from: None,
        },
        field_ref_env("POD_IP", "status.podIP"),
        field_ref_env("HOST_IP", "status.hostIP"),
        field_ref_env("NODE_NAME", "spec.nodeName"),
        field_ref_env("POD_NAME", "metadata.name"),
        field_ref_env("POD_UUID", "metadata.uid"),
        field_ref_env("DICE_NAMESPACE", "metadata.namespace"),
    ];
    if volume::database_tls_enabled() {
        envs.push(K8sEnvVar {
            name: "MYSQL_CACERTPATH".to_string(),
            value: Some(format!("/{DATABASE_TLS_SECRET_NAME}")),
            value_from: None,
        });
    }
    envs
}

/// Template labels: the selector labels plus projected bound labels so
/// anti-affinity terms can see cpu/io-bound pods
pub fn pod_labels(component: &Component) -> BTreeMap<String, String> {
    let mut labels = component_labels(&component.name, &component.labels);
    for bound in [CPU_BOUND, IO_BOUND] {
        if let Some(value) = component.labels.get(bound) {
            labels.insert(format!("{BOUND_PREFIX}{bound}"), value.clone());
        }
    }
    labels
}

fn security_context(component: &Component) -> Option<SecurityContext> {
    let requested = component
        .annotations
        .get(ANNOTATION_PRIVILEGED)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    requested.then(|| SecurityContext {
        privileged: Some(true),
        ..Default::default()
    })
}

fn service_account(component: &Component) -> String {
    component
        .annotations
        .get(ANNOTATION_COMPONENT_SA)
        .filter(|sa| !sa.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string())
}

/// Compose the pod template for a component workload
pub fn pod_template(component: &Component) -> Result<PodTemplateSpec> {
    let host_network = component.is_host_network();

    let mut env = envs_to_k8s(&component.envs)?;
    env.extend(runtime_envs(component));

    let env_from = if component.env_from.is_empty() {
        None
    } else {
        Some(env_from_to_k8s(&component.env_from))
    };

    let container = Container {
        name: component.name.clone(),
        image: Some(component.image_info.image.clone()),
        image_pull_policy: Some(
            component
                .image_info
                .pull_policy
                .clone()
                .unwrap_or_else(|| "IfNotPresent".to_string()),
        ),
        env: Some(env),
        env_from,
        command: shell_command(&component.command),
        ports: super::service::container_ports(component),
        resources: Some(resources_to_k8s(&component.resources)),
        volume_mounts: volume::component_volume_mounts(component),
        liveness_probe: probe::liveness_probe(component),
        readiness_probe: probe::readiness_probe(component),
        security_context: security_context(component),
        ..Default::default()
    };

    let image_pull_secrets = component
        .image_info
        .pull_secret
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|name| vec![LocalObjectReference { name: name.clone() }]);

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels(component)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            restart_policy: Some("Always".to_string()),
            service_account_name: Some(service_account(component)),
            containers: vec![container],
            image_pull_secrets,
            volumes: volume::component_volumes(component),
            affinity: affinity_enabled().then(|| affinity::component_affinity(component)),
            host_aliases: host_aliases(&component.hosts),
            tolerations: Some(default_tolerations()),
            host_network: Some(host_network),
            dns_policy: Some(
                if host_network {
                    "ClusterFirstWithHostNet"
                } else {
                    "ClusterFirst"
                }
                .to_string(),
            ),
            ..Default::default()
        }),
    })
}
