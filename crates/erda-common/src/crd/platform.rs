//! The Platform custom resource: one instance represents an entire
//! deployed Erda fleet in a namespace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::application::Application;
use super::job::Job;

/// Platform lifecycle phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PlatformPhase {
    /// Status not yet observed
    #[default]
    Unknown,
    /// Initialization jobs are running
    Initialization,
    /// Applications are converging
    Deploying,
    /// Every component is ready and no orphans remain
    Ready,
    /// Terminal for the current generation
    Failed,
}

/// Observed state of a job, component, or application
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ResourceState {
    /// Not yet observed
    #[default]
    Unknown,
    /// Workload exists but is not fully available
    Deploying,
    /// All readiness criteria met
    Ready,
    /// Job pods are executing
    Running,
    /// Job reached the Complete condition
    Completed,
    /// Job reached the Failed condition
    Failed,
}

/// One observation recorded on the Platform status, newest first
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Machine-readable reason, surfaced as the LastMessage printer column
    pub reason: String,
    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the observation was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Conditions retained on the status, newest first
pub const MAX_CONDITIONS: usize = 20;

/// Observed state of one component, index-aligned with the spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Component name
    pub name: String,
    /// Observed state
    #[serde(default)]
    pub status: ResourceState,
}

/// Observed state of one application, index-aligned with the spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Application name
    pub name: String,
    /// Ready iff every component is Ready
    #[serde(default)]
    pub status: ResourceState,
    /// Per-component states, one per spec component at the same index
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentStatus>,
}

/// Desired state of a Platform
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "erda.terminus.io",
    version = "v1beta1",
    kind = "Platform",
    namespaced,
    status = "PlatformStatus",
    shortname = "erda",
    printcolumn = r#"{"name":"Status","type":"string","description":"platform phase","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"LastMessage","type":"string","description":"last condition reason","jsonPath":".status.conditions[0].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Applications in deployment order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<Application>,
    /// Initialization jobs; PreJobs gate the applications
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<Job>,
}

/// Observed state of a Platform
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: PlatformPhase,
    /// Per-job states by job name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub jobs: BTreeMap<String, ResourceState>,
    /// Per-application states, one per spec application at the same index
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<ApplicationStatus>,
    /// Recent observations, newest first, bounded at [`MAX_CONDITIONS`]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl PlatformStatus {
    /// Seed a status mirroring the spec shape, everything Unknown
    pub fn seeded_from(spec: &PlatformSpec) -> Self {
        Self {
            phase: PlatformPhase::Unknown,
            jobs: BTreeMap::new(),
            applications: spec
                .applications
                .iter()
                .map(|app| ApplicationStatus {
                    name: app.name.clone(),
                    status: ResourceState::Unknown,
                    components: app
                        .components
                        .iter()
                        .map(|c| ComponentStatus {
                            name: c.name.clone(),
                            status: ResourceState::Unknown,
                        })
                        .collect(),
                })
                .collect(),
            conditions: Vec::new(),
        }
    }

    /// Record a condition at the head of the list, trimming to the bound
    pub fn push_condition(&mut self, reason: impl Into<String>, message: Option<String>) {
        self.conditions.insert(
            0,
            Condition {
                reason: reason.into(),
                message,
                timestamp: Some(Utc::now()),
            },
        );
        self.conditions.truncate(MAX_CONDITIONS);
    }
}

impl Platform {
    /// Controller owner reference carried by every emitted primitive
    pub fn controller_owner(&self) -> OwnerReference {
        self.controller_owner_ref(&())
            .expect("Platform always has a name after admission")
    }

    /// Status, seeded from the spec when absent
    pub fn status_or_seeded(&self) -> PlatformStatus {
        self.status
            .clone()
            .unwrap_or_else(|| PlatformStatus::seeded_from(&self.spec))
    }
}
