//! Primitive renderer: pure translation from component and job
//! descriptions to Kubernetes manifests.
//!
//! Same inputs yield byte-identical outputs; wherever ordering affects
//! equality (service ports, env lists, label maps) the renderer sorts.
//! All API I/O stays out of this module.

pub mod affinity;
pub mod config;
pub mod hpa;
pub mod ingress;
pub mod job;
pub mod pod;
pub mod probe;
pub mod pvc;
pub mod service;
pub mod volume;
pub mod vpa;
pub mod workload;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use erda_common::crd::{Component, EnvFromSource, EnvVar, ResourceRequirements};
use erda_common::labels::component_labels;
use erda_common::{Error, Result};

pub use workload::Workload;

/// Object metadata shared by every primitive emitted for a component
pub fn object_metadata(component: &Component, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(component.name.clone()),
        namespace: Some(component.namespace().to_string()),
        labels: Some(component_labels(&component.name, &component.labels)),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

/// Convert spec env entries to container env vars
///
/// `value_from` payloads are passed through verbatim; a payload that is not
/// a valid `EnvVarSource` is a spec error.
pub fn envs_to_k8s(envs: &[EnvVar]) -> Result<Vec<corev1::EnvVar>> {
    envs.iter()
        .map(|env| {
            let value_from = env
                .value_from
                .as_ref()
                .map(|v| {
                    serde_json::from_value::<corev1::EnvVarSource>(v.clone()).map_err(|e| {
                        Error::serialization_for_kind(
                            "EnvVarSource",
                            format!("env {}: {}", env.name, e),
                        )
                    })
                })
                .transpose()?;
            Ok(corev1::EnvVar {
                name: env.name.clone(),
                value: env.value.clone(),
                value_from,
            })
        })
        .collect()
}

/// Convert spec env-from entries to container env-from sources
pub fn env_from_to_k8s(sources: &[EnvFromSource]) -> Vec<corev1::EnvFromSource> {
    sources
        .iter()
        .map(|source| corev1::EnvFromSource {
            config_map_ref: source.config_map_ref.as_ref().map(|r| {
                corev1::ConfigMapEnvSource {
                    name: r.name.clone(),
                    optional: None,
                }
            }),
            secret_ref: source
                .secret_ref
                .as_ref()
                .map(|r| corev1::SecretEnvSource {
                    name: r.name.clone(),
                    optional: None,
                }),
            prefix: None,
        })
        .collect()
}

/// Convert spec resources to container resource requirements
pub fn resources_to_k8s(resources: &ResourceRequirements) -> corev1::ResourceRequirements {
    let to_list = |map: &BTreeMap<String, String>| -> Option<BTreeMap<String, Quantity>> {
        if map.is_empty() {
            return None;
        }
        Some(
            map.iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect(),
        )
    };
    corev1::ResourceRequirements {
        requests: to_list(&resources.requests),
        limits: to_list(&resources.limits),
        claims: None,
    }
}

/// Convert `"<ip> <host> [host...]"` entries to host aliases; malformed
/// entries are skipped
pub fn host_aliases(hosts: &[String]) -> Option<Vec<corev1::HostAlias>> {
    let aliases: Vec<corev1::HostAlias> = hosts
        .iter()
        .filter_map(|host| {
            let mut fields = host.split_whitespace();
            let ip = fields.next()?;
            let hostnames: Vec<String> = fields.map(str::to_string).collect();
            if hostnames.is_empty() {
                return None;
            }
            Some(corev1::HostAlias {
                ip: ip.to_string(),
                hostnames: Some(hostnames),
            })
        })
        .collect();
    if aliases.is_empty() {
        None
    } else {
        Some(aliases)
    }
}

/// Wrap a non-empty command in the shell so env expansion works
pub fn shell_command(command: &[String]) -> Option<Vec<String>> {
    if command.is_empty() {
        return None;
    }
    let mut wrapped = vec!["/bin/sh".to_string(), "-c".to_string()];
    wrapped.extend(command.iter().cloned());
    Some(wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use erda_common::labels::{COMPONENT_LABEL, MANAGED_LABEL};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

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

    #[test]
    fn test_object_metadata_carries_owner_and_labels() {
        let mut component = Component {
            name: "api".into(),
            namespace: Some("erda-system".into()),
            ..Default::default()
        };
        component.labels.insert("team".into(), "core".into());
        let meta = object_metadata(&component, &owner());
        assert_eq!(meta.name.as_deref(), Some("api"));
        assert_eq!(meta.namespace.as_deref(), Some("erda-system"));
        let labels = meta.labels.unwrap();
        assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(labels.get(COMPONENT_LABEL).map(String::as_str), Some("api"));
        assert_eq!(labels.get("team").map(String::as_str), Some("core"));
        let owners = meta.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_envs_value_from_passthrough() {
        let envs = vec![EnvVar {
            name: "POD_IP".into(),
            value: None,
            value_from: Some(serde_json::json!({
                "fieldRef": {"apiVersion": "v1", "fieldPath": "status.podIP"}
            })),
        }];
        let converted = envs_to_k8s(&envs).unwrap();
        let field_ref = converted[0]
            .value_from
            .as_ref()
            .unwrap()
            .field_ref
            .as_ref()
            .unwrap();
        assert_eq!(field_ref.field_path, "status.podIP");
    }

    #[test]
    fn test_envs_reject_malformed_value_from() {
        let envs = vec![EnvVar {
            name: "BAD".into(),
            value: None,
            value_from: Some(serde_json::json!("not an object")),
        }];
        assert!(envs_to_k8s(&envs).is_err());
    }

    #[test]
    fn test_host_aliases_skip_malformed() {
        let aliases = host_aliases(&[
            "10.0.0.1 registry registry.local".to_string(),
            "just-one-field".to_string(),
        ])
        .unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].ip, "10.0.0.1");
        assert_eq!(
            aliases[0].hostnames.as_ref().unwrap(),
            &vec!["registry".to_string(), "registry.local".to_string()]
        );
        assert!(host_aliases(&[]).is_none());
    }

    #[test]
    fn test_shell_command_wrapping() {
        assert_eq!(
            shell_command(&["echo hi".to_string()]),
            Some(vec!["/bin/sh".into(), "-c".into(), "echo hi".into()])
        );
        assert!(shell_command(&[]).is_none());
    }
}
