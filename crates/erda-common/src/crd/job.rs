//! Initialization jobs run before (PreJob) or after (PostJob) the
//! applications of a Platform.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{AffinityRule, EnvVar, ImageInfo, ResourceRequirements, Storage};

/// Job ordering class
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum JobType {
    /// Runs before any application component is created
    #[default]
    PreJob,
    /// Runs after the applications (accepted; not sequenced)
    PostJob,
}

impl JobType {
    /// Lowercased label value (`pre-job` keeps the original's plain
    /// lowercasing: `prejob` / `postjob`)
    pub fn label_value(&self) -> &'static str {
        match self {
            JobType::PreJob => "prejob",
            JobType::PostJob => "postjob",
        }
    }
}

/// An initialization job, created once per logical name and retained until
/// success
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job name, unique within the Platform
    pub name: String,
    /// Namespace, inherited from the Platform CR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// User labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations copied onto the job and its pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Ordering class
    #[serde(rename = "type", default)]
    pub kind: JobType,
    /// Retry budget; defaults to 6 when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    /// Container image
    #[serde(default)]
    pub image_info: ImageInfo,
    /// Command line, executed directly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,
    /// Compute resources
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Node affinity hints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affinity: Vec<AffinityRule>,
    /// Attached volumes
    #[serde(default)]
    pub storage: Storage,
    /// /etc/hosts aliases
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}
