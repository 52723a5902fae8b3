//! Semantic equality for ingresses, version-agnostic.
//!
//! The live object arrives as a dynamic value; only the rules, TLS block,
//! and annotations are compared. Either difference forces an update.

use kube::api::DynamicObject;
use serde_json::{json, Value};

/// Project the compared subset out of an ingress spec value
fn spec_projection(spec: &Value) -> Value {
    json!({
        "rules": spec.get("rules").cloned().unwrap_or(Value::Null),
        "tls": spec.get("tls").cloned().unwrap_or(Value::Null),
    })
}

fn annotation_projection(annotations: Option<&Value>) -> Value {
    match annotations {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()),
        _ => json!({}),
    }
}

/// Compare a live ingress against the desired manifest
pub fn ingress_equal(live: &DynamicObject, desired: &Value) -> bool {
    let live_spec = live.data.get("spec").cloned().unwrap_or(Value::Null);
    let desired_spec = desired.get("spec").cloned().unwrap_or(Value::Null);
    if spec_projection(&live_spec) != spec_projection(&desired_spec) {
        return false;
    }

    let live_annotations = live
        .metadata
        .annotations
        .as_ref()
        .map(|a| json!(a))
        .unwrap_or_else(|| json!({}));
    let desired_annotations =
        annotation_projection(desired.pointer("/metadata/annotations"));
    annotation_projection(Some(&live_annotations)) == desired_annotations
}
