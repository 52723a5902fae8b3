//! Deep equality for configuration objects.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;

use crate::render::config::ConfigObject;

/// The server folds `stringData` into `data` on write, so a Secret is
/// compared through its canonical byte payload
fn canonical_secret_data(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    let mut data: BTreeMap<String, Vec<u8>> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), v.0.clone()))
        .collect();
    for (k, v) in secret.string_data.iter().flatten() {
        data.insert(k.clone(), v.as_bytes().to_vec());
    }
    data
}

/// Compare live and desired configuration payloads by deep equality.
/// Mismatched backing kinds never compare equal.
pub fn configs_equal(live: &ConfigObject, desired: &ConfigObject) -> bool {
    match (live, desired) {
        (ConfigObject::ConfigMap(a), ConfigObject::ConfigMap(b)) => {
            a.data == b.data && a.binary_data == b.binary_data
        }
        (ConfigObject::Secret(a), ConfigObject::Secret(b)) => {
            canonical_secret_data(a) == canonical_secret_data(b)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use std::collections::BTreeMap;

    fn config_map(data: &[(&str, &str)]) -> ConfigObject {
        ConfigObject::ConfigMap(ConfigMap {
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        })
    }

    #[test]
    fn test_config_map_data_compared() {
        assert!(configs_equal(
            &config_map(&[("a", "1")]),
            &config_map(&[("a", "1")])
        ));
        assert!(!configs_equal(
            &config_map(&[("a", "1")]),
            &config_map(&[("a", "2")])
        ));
    }

    #[test]
    fn test_kind_mismatch_never_equal() {
        let secret = ConfigObject::Secret(Secret::default());
        assert!(!configs_equal(&config_map(&[]), &secret));
    }

    #[test]
    fn test_secret_string_data_compared() {
        let secret = |value: &str| {
            ConfigObject::Secret(Secret {
                string_data: Some(BTreeMap::from([(
                    "password".to_string(),
                    value.to_string(),
                )])),
                ..Default::default()
            })
        };
        assert!(configs_equal(&secret("hunter2"), &secret("hunter2")));
        assert!(!configs_equal(&secret("hunter2"), &secret("rotated")));
    }

    /// Story: a stored secret equals the spec that produced it even though
    /// the server folded stringData into data
    #[test]
    fn story_server_folded_secret_is_equal() {
        let desired = ConfigObject::Secret(Secret {
            string_data: Some(BTreeMap::from([(
                "password".to_string(),
                "hunter2".to_string(),
            )])),
            ..Default::default()
        });
        let live = ConfigObject::Secret(Secret {
            data: Some(BTreeMap::from([(
                "password".to_string(),
                k8s_openapi::ByteString(b"hunter2".to_vec()),
            )])),
            ..Default::default()
        });
        assert!(configs_equal(&live, &desired));
    }
}
