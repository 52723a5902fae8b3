//! Component: a single deployable unit (microservice, stateful store, or
//! per-node daemon) within an Application.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Workload controller kind realized for a component
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Deployment with replicas
    #[default]
    Stateless,
    /// StatefulSet with a headless service name
    Stateful,
    /// DaemonSet scheduled on every node
    PerNode,
}

impl WorkloadKind {
    /// The Kubernetes kind this variant renders to
    pub fn primitive_kind(&self) -> &'static str {
        match self {
            WorkloadKind::Stateless => "Deployment",
            WorkloadKind::Stateful => "StatefulSet",
            WorkloadKind::PerNode => "DaemonSet",
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkloadKind::Stateless => "Stateless",
            WorkloadKind::Stateful => "Stateful",
            WorkloadKind::PerNode => "PerNode",
        };
        f.write_str(s)
    }
}

/// Environment variable on a component or job container
///
/// `value_from` carries an arbitrary Kubernetes `EnvVarSource` object; the
/// Differ compares env bags by name and plain value only.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Plain value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Kubernetes EnvVarSource, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<serde_json::Value>,
}

impl EnvVar {
    /// Plain name/value pair
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }
}

/// Reference to a ConfigMap or Secret by name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LocalRef {
    /// Object name
    pub name: String,
}

/// Source of environment variables injected wholesale
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    /// ConfigMap to pull variables from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<LocalRef>,
    /// Secret to pull variables from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalRef>,
}

/// Compute resource requests and limits, quantities in Kubernetes notation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceRequirements {
    /// Requested resources (`cpu`, `memory`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    /// Resource limits (`cpu`, `memory`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

impl ResourceRequirements {
    /// Requested CPU in cores
    pub fn requested_cpu(&self) -> f64 {
        self.requests.get("cpu").map(|q| parse_cpu(q)).unwrap_or(0.0)
    }

    /// CPU limit in cores
    pub fn limit_cpu(&self) -> f64 {
        self.limits.get("cpu").map(|q| parse_cpu(q)).unwrap_or(0.0)
    }

    /// Requested memory in MiB
    pub fn requested_memory_mib(&self) -> i64 {
        self.requests
            .get("memory")
            .map(|q| parse_memory_mib(q))
            .unwrap_or(0)
    }

    /// Memory limit in MiB
    pub fn limit_memory_mib(&self) -> i64 {
        self.limits
            .get("memory")
            .map(|q| parse_memory_mib(q))
            .unwrap_or(0)
    }
}

/// Parse a CPU quantity ("100m", "0.5", "2") into cores
pub fn parse_cpu(quantity: &str) -> f64 {
    let q = quantity.trim();
    if let Some(milli) = q.strip_suffix('m') {
        milli.parse::<f64>().unwrap_or(0.0) / 1000.0
    } else {
        q.parse::<f64>().unwrap_or(0.0)
    }
}

/// Parse a memory quantity ("128Mi", "1Gi", "512M", "1073741824") into MiB
pub fn parse_memory_mib(quantity: &str) -> i64 {
    let q = quantity.trim();
    let (number, factor): (&str, f64) = if let Some(n) = q.strip_suffix("Ki") {
        (n, 1.0 / 1024.0)
    } else if let Some(n) = q.strip_suffix("Mi") {
        (n, 1.0)
    } else if let Some(n) = q.strip_suffix("Gi") {
        (n, 1024.0)
    } else if let Some(n) = q.strip_suffix("Ti") {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = q.strip_suffix('K') {
        (n, 1_000.0 / (1024.0 * 1024.0))
    } else if let Some(n) = q.strip_suffix('M') {
        (n, 1_000_000.0 / (1024.0 * 1024.0))
    } else if let Some(n) = q.strip_suffix('G') {
        (n, 1_000_000_000.0 / (1024.0 * 1024.0))
    } else {
        (q, 1.0 / (1024.0 * 1024.0))
    };
    (number.parse::<f64>().unwrap_or(0.0) * factor) as i64
}

/// Node affinity hint kind
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AffinityKind {
    /// Preferred scheduling term, weight 100
    NodePreferred,
    /// Required node selector term
    NodeRequested,
}

/// User-supplied node affinity hint
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AffinityRule {
    /// Node label key
    pub key: String,
    /// Optional exact value; when set the operator is `In`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Whether the label must exist (`Exists` vs `DoesNotExist`)
    #[serde(default)]
    pub exist: bool,
    /// Hint kind
    #[serde(rename = "type")]
    pub kind: AffinityKind,
}

/// Container image reference plus registry credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    /// Image reference
    pub image: String,
    /// Registry user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Registry password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
    /// Image pull secret name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret: Option<String>,
}

/// Ordered volume list attached to a component or job
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Storage {
    /// Volumes in mount order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// A single volume: PVC-backed when a storage class is set, host-path
/// otherwise
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Requested size, Kubernetes quantity notation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Storage class; empty means host-path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Host path mounted when no storage class is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Mount path inside the container
    pub target_path: String,
    /// Mount read-only
    #[serde(default)]
    pub read_only: bool,
    /// Optional snapshot policy (carried, not acted on)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<VolumeSnapshot>,
}

/// Volume snapshot policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshot {
    /// Snapshot class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_class: Option<String>,
    /// Retained snapshot count
    #[serde(default)]
    pub max_history: i32,
}

/// Pod network mode
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Cluster networking
    #[default]
    Default,
    /// Host networking
    Host,
}

/// Network exposure of a component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network mode
    #[serde(rename = "type", default)]
    pub kind: NetworkKind,
    /// Exposed ports; the first entry is the default address port
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_discovery: Vec<ServiceDiscovery>,
    /// Microservice-mesh settings (carried, not acted on)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microservices: Option<Microservices>,
}

/// One exposed port, optionally published under a public domain
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ServiceDiscovery {
    /// Port number, > 0
    pub port: i32,
    /// Protocol hint: HTTP/HTTPS/GRPC/TCP/UDP
    #[serde(default)]
    pub protocol: String,
    /// Public domain; empty emits no ingress rule for this port
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    /// Ingress path
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// Microservice-mesh settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Microservices {
    /// Enroll the component into the mesh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_enable: Option<bool>,
    /// Traffic security mode
    #[serde(default)]
    pub traffic_security: TrafficSecurity,
}

/// Mesh traffic security mode
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TrafficSecurity {
    /// Mode name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
}

/// Health check; precedence HTTP > Exec > implicit TCP on the first port
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// Expected startup duration in seconds; stretches failure thresholds
    #[serde(default)]
    pub duration: i32,
    /// HTTP GET check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_check: Option<HttpCheck>,
    /// Exec check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_check: Option<ExecCheck>,
}

/// HTTP GET health check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpCheck {
    /// Port probed
    pub port: i32,
    /// Request path
    #[serde(default)]
    pub path: String,
}

/// Exec health check run through a shell wrapper
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ExecCheck {
    /// Command line
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

/// Backing store kind for a Configuration entry
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConfigurationKind {
    /// Kubernetes Secret
    Secret,
    /// Kubernetes ConfigMap
    ConfigMap,
}

/// A ConfigMap- or Secret-backed configuration mounted into the container
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Object name; also the volume and mount name
    pub name: String,
    /// Backing store kind
    #[serde(rename = "type")]
    pub kind: ConfigurationKind,
    /// Mount path inside the container
    pub target_path: String,
    /// Binary payload, values base64-encoded
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// String payload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

/// A deployable unit within an Application
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component name, unique within its Application
    pub name: String,
    /// Namespace, inherited from the Platform CR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// User labels merged into every emitted primitive
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Component annotations (operator hints live under the domain prefix)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Workload controller kind
    #[serde(default)]
    pub workload: WorkloadKind,
    /// Container image
    #[serde(default)]
    pub image_info: ImageInfo,
    /// Replica count (Deployments and StatefulSets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Compute resources
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Node affinity hints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affinity: Vec<AffinityRule>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,
    /// Wholesale env sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    /// Command override, executed via a shell wrapper
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Attached volumes
    #[serde(default)]
    pub storage: Storage,
    /// /etc/hosts aliases, `"<ip> <host> [host...]"`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// Network exposure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    /// Health check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Mounted configurations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<Configuration>,
    /// Emit HPA and VPA for this component
    #[serde(default)]
    pub auto_scale: bool,
}

impl Component {
    /// Exposed ports, empty when no network block is present
    pub fn service_discovery(&self) -> &[ServiceDiscovery] {
        self.network
            .as_ref()
            .map(|n| n.service_discovery.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the pod uses host networking
    pub fn is_host_network(&self) -> bool {
        self.network
            .as_ref()
            .map(|n| n.kind == NetworkKind::Host)
            .unwrap_or(false)
    }

    /// All non-empty public domains, in ServiceDiscovery order
    pub fn domains(&self) -> Vec<&str> {
        self.service_discovery()
            .iter()
            .filter(|sd| !sd.domain.is_empty())
            .map(|sd| sd.domain.as_str())
            .collect()
    }

    /// The port used for SELF_ADDR and dependency addresses
    pub fn default_port(&self) -> Option<i32> {
        self.service_discovery().first().map(|sd| sd.port)
    }

    /// Namespace, defaulting to "default" until inherited from the CR
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }
}
