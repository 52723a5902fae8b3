//! Platform CRD registration.
//!
//! The CRD document is built by hand rather than generated from the Rust
//! types: the spec and status schemas preserve unknown fields so older and
//! newer operators can share a cluster, and the served names are
//! overridable by environment for side-by-side installs.

use std::collections::BTreeMap;
use std::env;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceColumnDefinition, CustomResourceDefinition, CustomResourceDefinitionNames,
    CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, CustomResourceSubresourceStatus,
    CustomResourceSubresources, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch};
use kube::Client;
use tracing::info;

use erda_common::kube_utils::apply_params;
use erda_common::labels::{ENV_CRD_GROUP, ENV_CRD_KIND};
use erda_common::{Result, CRD_VERSION, DEFAULT_CRD_GROUP};

const DEFAULT_KIND: &str = "Platform";

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Served kind, overridable via `CRD_KIND_SPECIFIED`
pub fn crd_kind() -> String {
    env_or(ENV_CRD_KIND, DEFAULT_KIND)
}

/// Served group, overridable via `ERDA_CRD_GROUP`
pub fn crd_group() -> String {
    env_or(ENV_CRD_GROUP, DEFAULT_CRD_GROUP)
}

fn crd_singular() -> String {
    crd_kind().to_lowercase()
}

fn crd_plural() -> String {
    format!("{}s", crd_singular())
}

/// Fully qualified CRD object name (`<plural>.<group>`)
pub fn crd_full_name() -> String {
    format!("{}.{}", crd_plural(), crd_group())
}

fn preserve_unknown_object() -> JSONSchemaProps {
    JSONSchemaProps {
        type_: Some("object".to_string()),
        x_kubernetes_preserve_unknown_fields: Some(true),
        ..Default::default()
    }
}

/// Build the CRD document
pub fn crd_document() -> CustomResourceDefinition {
    CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(crd_full_name()),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: crd_group(),
            names: CustomResourceDefinitionNames {
                kind: crd_kind(),
                singular: Some(crd_singular()),
                plural: crd_plural(),
                short_names: Some(vec!["erda".to_string()]),
                ..Default::default()
            },
            scope: "Namespaced".to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: CRD_VERSION.to_string(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(JSONSchemaProps {
                        type_: Some("object".to_string()),
                        properties: Some(BTreeMap::from([
                            ("spec".to_string(), preserve_unknown_object()),
                            ("status".to_string(), preserve_unknown_object()),
                        ])),
                        ..Default::default()
                    }),
                }),
                subresources: Some(CustomResourceSubresources {
                    status: Some(CustomResourceSubresourceStatus(serde_json::json!({}))),
                    ..Default::default()
                }),
                additional_printer_columns: Some(vec![
                    CustomResourceColumnDefinition {
                        name: "Status".to_string(),
                        type_: "string".to_string(),
                        description: Some("platform phase".to_string()),
                        json_path: ".status.phase".to_string(),
                        ..Default::default()
                    },
                    CustomResourceColumnDefinition {
                        name: "LastMessage".to_string(),
                        type_: "string".to_string(),
                        description: Some("last condition reason".to_string()),
                        json_path: ".status.conditions[0].reason".to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    }
}

/// Install or update the CRD via server-side apply
pub async fn install(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let document = crd_document();
    let name = crd_full_name();
    crds.patch(&name, &apply_params(), &Patch::Apply(&document))
        .await?;
    info!(crd = %name, "Platform CRD installed");
    Ok(())
}
