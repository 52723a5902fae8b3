//! Pod volumes and mounts: configuration mounts first, then storage
//! volumes, in stable spec order. Optional etcd-client and database-TLS
//! secret mounts ride along when enabled by environment.

use std::env;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, HostPathVolumeSource, PersistentVolumeClaimVolumeSource,
    SecretVolumeSource, Volume, VolumeMount,
};

use erda_common::crd::{Component, ConfigurationKind};
use erda_common::labels::{
    DATABASE_TLS_SECRET_NAME, DEFAULT_ETCD_SECRET_NAME, ENV_ENABLE_DATABASE_TLS,
    ENV_ENABLE_ETCD_SECRET, ENV_ETCD_SECRET_NAME,
};

const SECRET_DEFAULT_MODE: i32 = 0o644;

/// PVC name for the 1-based volume index of a component
pub fn pvc_name(component_name: &str, index: usize) -> String {
    format!("pvc-{}-{}", component_name, index + 1)
}

fn storage_volume_name(component_name: &str, index: usize) -> String {
    format!("volume-{component_name}-{index}")
}

fn etcd_secret_name() -> String {
    match env::var(ENV_ETCD_SECRET_NAME) {
        Ok(name) if !name.is_empty() => name,
        _ => DEFAULT_ETCD_SECRET_NAME.to_string(),
    }
}

fn etcd_secret_enabled() -> bool {
    env::var(ENV_ENABLE_ETCD_SECRET).as_deref() != Ok("disable")
}

/// Whether the database TLS secret mount is enabled
pub fn database_tls_enabled() -> bool {
    env::var(ENV_ENABLE_DATABASE_TLS).as_deref() == Ok("true")
}

/// Volumes for a component pod: configurations, storage, ambient secrets
pub fn component_volumes(component: &Component) -> Option<Vec<Volume>> {
    let mut volumes = Vec::new();

    for config in &component.configurations {
        let mut volume = Volume {
            name: config.name.clone(),
            ..Default::default()
        };
        match config.kind {
            ConfigurationKind::Secret => {
                volume.secret = Some(SecretVolumeSource {
                    secret_name: Some(config.name.clone()),
                    default_mode: Some(SECRET_DEFAULT_MODE),
                    ..Default::default()
                });
            }
            ConfigurationKind::ConfigMap => {
                volume.config_map = Some(ConfigMapVolumeSource {
                    name: config.name.clone(),
                    ..Default::default()
                });
            }
        }
        volumes.push(volume);
    }

    for (index, spec_volume) in component.storage.volumes.iter().enumerate() {
        let mut volume = Volume {
            name: storage_volume_name(&component.name, index),
            ..Default::default()
        };
        if spec_volume.storage_class.as_deref().unwrap_or("").is_empty() {
            volume.host_path = Some(HostPathVolumeSource {
                path: spec_volume.source_path.clone().unwrap_or_default(),
                type_: Some("DirectoryOrCreate".to_string()),
            });
        } else {
            volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                claim_name: pvc_name(&component.name, index),
                read_only: Some(spec_volume.read_only),
            });
        }
        volumes.push(volume);
    }

    if etcd_secret_enabled() {
        let name = etcd_secret_name();
        volumes.push(Volume {
            name: name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(name),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    if database_tls_enabled() {
        volumes.push(Volume {
            name: DATABASE_TLS_SECRET_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(DATABASE_TLS_SECRET_NAME.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if volumes.is_empty() {
        None
    } else {
        Some(volumes)
    }
}

/// Mounts for a component container, same order as the volumes
pub fn component_volume_mounts(component: &Component) -> Option<Vec<VolumeMount>> {
    let mut mounts = Vec::new();

    for config in &component.configurations {
        mounts.push(VolumeMount {
            name: config.name.clone(),
            mount_path: config.target_path.clone(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    for (index, spec_volume) in component.storage.volumes.iter().enumerate() {
        mounts.push(VolumeMount {
            name: storage_volume_name(&component.name, index),
            mount_path: spec_volume.target_path.clone(),
            read_only: Some(spec_volume.read_only),
            ..Default::default()
        });
    }

    if etcd_secret_enabled() {
        mounts.push(VolumeMount {
            name: etcd_secret_name(),
            mount_path: "/certs/".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    if database_tls_enabled() {
        mounts.push(VolumeMount {
            name: DATABASE_TLS_SECRET_NAME.to_string(),
            mount_path: format!("/{DATABASE_TLS_SECRET_NAME}"),
            read_only: Some(true),
            ..Default::default()
        });
    }

    if mounts.is_empty() {
        None
    } else {
        Some(mounts)
    }
}
