//! Label and annotation contract for every primitive the operator emits,
//! plus the environment variables that tune operator behavior.

use std::collections::BTreeMap;

/// Marks a primitive as owned by this operator
pub const MANAGED_LABEL: &str = "operator-managed";
/// Component name label on component primitives
pub const COMPONENT_LABEL: &str = "component";
/// Job name label on job primitives
pub const JOB_NAME_LABEL: &str = "job-name";
/// Job type label (`pre` / `post`, lowercased) on job primitives
pub const JOB_TYPE_LABEL: &str = "job-type";

/// Domain prefix for operator annotations; only annotations under this
/// prefix participate in workload semantic equality
pub const ANNOTATION_DOMAIN: &str = "erda.terminus.io/";
/// "true" selects https for generated PUBLIC_URL envs
pub const ANNOTATION_SSL_ENABLED: &str = "erda.terminus.io/ssl-enabled";
/// YAML string→string mapping applied verbatim to generated Ingresses
pub const ANNOTATION_INGRESS: &str = "erda.terminus.io/ingress-annotation";
/// Overrides the default service-account name on the pod
pub const ANNOTATION_COMPONENT_SA: &str = "erda.terminus.io/component-service-account";
/// Boolean; when true the container runs privileged
pub const ANNOTATION_PRIVILEGED: &str = "erda.terminus.io/component-security-context-privileged";
/// Snapshot of the spec applied by the last successful launch
pub const ANNOTATION_LAST_APPLIED: &str = "erda.terminus.io/last-applied-spec";

/// Component label marking CPU-bound workloads
pub const CPU_BOUND: &str = "cpu_bound";
/// Component label marking IO-bound workloads
pub const IO_BOUND: &str = "io_bound";
/// Prefix for bound labels projected onto pods (`erda/cpu_bound`)
pub const BOUND_PREFIX: &str = "erda/";

/// Default service account set on component pods
pub const DEFAULT_SERVICE_ACCOUNT: &str = "erda-operator";

/// "false" disables the default anti-affinity block
pub const ENV_ENABLE_AFFINITY: &str = "ENABLE_AFFINITY";
/// Overrides the namespace used in SELF_ADDR / dependency address resolution
pub const ENV_SPECIFIED_NAMESPACE: &str = "ENABLE_SPECIFIED_NAMESPACE";
/// Overrides the CRD kind (singular/plural derived by lowercasing)
pub const ENV_CRD_KIND: &str = "CRD_KIND_SPECIFIED";
/// Overrides the CRD group
pub const ENV_CRD_GROUP: &str = "ERDA_CRD_GROUP";
/// HPA max-replica scale factor override
pub const ENV_HPA_SCALE_FACTOR: &str = "ERDA_HPA_SCALE_FACTOR";
/// Maximum limit/request ratio admitted for HPA creation
pub const ENV_HPA_LIMIT_REQUEST_RATIO: &str = "ERDA_HPA_LIMIT_REQUEST_RATIO";
/// VPA max-allowed scale factor override
pub const ENV_VPA_SCALE_FACTOR: &str = "ERDA_VPA_SCALE_FACTOR";
/// "disable" turns off the etcd client secret mount
pub const ENV_ENABLE_ETCD_SECRET: &str = "ENABLE_ETCD_SECRET";
/// Overrides the etcd client secret name
pub const ENV_ETCD_SECRET_NAME: &str = "ETCD_SECRET_NAME";
/// "true" mounts the database TLS secret and injects MYSQL_CACERTPATH
pub const ENV_ENABLE_DATABASE_TLS: &str = "ENABLE_DATABASE_TLS";

/// Default etcd client secret name
pub const DEFAULT_ETCD_SECRET_NAME: &str = "erda-etcd-client-secret";
/// Database TLS secret name
pub const DATABASE_TLS_SECRET_NAME: &str = "erda-database-tls";

/// Merge `extra` over `base`, returning the combined label map
pub fn append_labels(
    base: &BTreeMap<String, String>,
    extra: &[(&str, &str)],
) -> BTreeMap<String, String> {
    let mut labels = base.clone();
    for (k, v) in extra {
        labels.insert((*k).to_string(), (*v).to_string());
    }
    labels
}

/// Selector labels for every primitive emitted for a component
pub fn component_labels(
    name: &str,
    user_labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    append_labels(user_labels, &[(MANAGED_LABEL, "true"), (COMPONENT_LABEL, name)])
}

/// Map the ssl-enabled annotation value onto a URL protocol
pub fn parse_protocol(ssl_enabled: Option<&str>) -> &'static str {
    match ssl_enabled {
        Some(v) if v.trim().eq_ignore_ascii_case("true") => "https",
        _ => "http",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_labels_merge_user_labels() {
        let mut user = BTreeMap::new();
        user.insert("team".to_string(), "core".to_string());
        let labels = component_labels("api", &user);
        assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(labels.get(COMPONENT_LABEL).map(String::as_str), Some("api"));
        assert_eq!(labels.get("team").map(String::as_str), Some("core"));
    }

    #[test]
    fn test_operator_labels_win_over_user_labels() {
        let mut user = BTreeMap::new();
        user.insert(MANAGED_LABEL.to_string(), "false".to_string());
        let labels = component_labels("api", &user);
        assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
    }

    #[test]
    fn test_parse_protocol() {
        assert_eq!(parse_protocol(Some("true")), "https");
        assert_eq!(parse_protocol(Some("True")), "https");
        assert_eq!(parse_protocol(Some("false")), "http");
        assert_eq!(parse_protocol(Some("")), "http");
        assert_eq!(parse_protocol(None), "http");
    }
}
