//! ConfigMap and Secret objects backing Configuration entries.

use std::collections::BTreeMap;

use base64::Engine;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;

use erda_common::crd::{Component, Configuration, ConfigurationKind};
use erda_common::labels::component_labels;
use erda_common::{Error, Result};

/// A rendered or live configuration object
#[derive(Clone, Debug)]
pub enum ConfigObject {
    /// ConfigMap-backed entry
    ConfigMap(ConfigMap),
    /// Secret-backed entry
    Secret(Secret),
}

impl ConfigObject {
    /// Backing store kind
    pub fn kind(&self) -> ConfigurationKind {
        match self {
            ConfigObject::ConfigMap(_) => ConfigurationKind::ConfigMap,
            ConfigObject::Secret(_) => ConfigurationKind::Secret,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        match self {
            ConfigObject::ConfigMap(cm) => cm.metadata.name.as_deref().unwrap_or_default(),
            ConfigObject::Secret(s) => s.metadata.name.as_deref().unwrap_or_default(),
        }
    }
}

fn decode_binary(config: &Configuration) -> Result<Option<BTreeMap<String, ByteString>>> {
    if config.data.is_empty() {
        return Ok(None);
    }
    let engine = base64::engine::general_purpose::STANDARD;
    config
        .data
        .iter()
        .map(|(k, v)| {
            engine
                .decode(v)
                .map(|bytes| (k.clone(), ByteString(bytes)))
                .map_err(|e| {
                    Error::serialization_for_kind(
                        "Configuration",
                        format!("{}: key {} is not base64: {}", config.name, k, e),
                    )
                })
        })
        .collect::<Result<BTreeMap<_, _>>>()
        .map(Some)
}

fn metadata(component: &Component, config: &Configuration, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(config.name.clone()),
        namespace: Some(component.namespace().to_string()),
        labels: Some(component_labels(&component.name, &component.labels)),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

fn non_empty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

/// Render the backing object for a Configuration entry
pub fn compose_config(
    component: &Component,
    config: &Configuration,
    owner: &OwnerReference,
) -> Result<ConfigObject> {
    let meta = metadata(component, config, owner);
    Ok(match config.kind {
        ConfigurationKind::ConfigMap => ConfigObject::ConfigMap(ConfigMap {
            metadata: meta,
            data: non_empty(&config.string_data),
            binary_data: decode_binary(config)?,
            ..Default::default()
        }),
        ConfigurationKind::Secret => ConfigObject::Secret(Secret {
            metadata: meta,
            data: decode_binary(config)?,
            string_data: non_empty(&config.string_data),
            ..Default::default()
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn component() -> Component {
        Component {
            name: "api".into(),
            namespace: Some("erda-system".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_map_rendering() {
        let config = Configuration {
            name: "api-config".into(),
            kind: ConfigurationKind::ConfigMap,
            target_path: "/etc/api".into(),
            data: BTreeMap::new(),
            string_data: BTreeMap::from([("app.yaml".to_string(), "debug: false".to_string())]),
        };
        let rendered = compose_config(&component(), &config, &owner()).unwrap();
        let cm = match rendered {
            ConfigObject::ConfigMap(cm) => cm,
            _ => panic!("expected ConfigMap"),
        };
        assert_eq!(cm.metadata.name.as_deref(), Some("api-config"));
        assert_eq!(
            cm.data.unwrap().get("app.yaml").map(String::as_str),
            Some("debug: false")
        );
        assert!(cm.binary_data.is_none());
    }

    #[test]
    fn test_secret_binary_data_decoded() {
        let config = Configuration {
            name: "api-cert".into(),
            kind: ConfigurationKind::Secret,
            target_path: "/certs".into(),
            data: BTreeMap::from([("tls.key".to_string(), "aGVsbG8=".to_string())]),
            string_data: BTreeMap::new(),
        };
        let rendered = compose_config(&component(), &config, &owner()).unwrap();
        let secret = match rendered {
            ConfigObject::Secret(s) => s,
            _ => panic!("expected Secret"),
        };
        assert_eq!(
            secret.data.unwrap().get("tls.key").unwrap().0,
            b"hello".to_vec()
        );
    }

    #[test]
    fn test_malformed_base64_rejected() {
        let config = Configuration {
            name: "api-cert".into(),
            kind: ConfigurationKind::Secret,
            target_path: "/certs".into(),
            data: BTreeMap::from([("tls.key".to_string(), "!!not-base64!!".to_string())]),
            string_data: BTreeMap::new(),
        };
        assert!(compose_config(&component(), &config, &owner()).is_err());
    }
}
