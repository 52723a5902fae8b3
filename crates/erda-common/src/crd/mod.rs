//! Custom Resource Definitions for the Erda platform operator
//!
//! A single kind is registered: `Platform`. Its spec holds an ordered list
//! of applications (each an ordered list of components) plus ordered
//! initialization jobs; its status mirrors the spec shape index-for-index.

mod application;
mod component;
mod job;
mod platform;

pub use application::Application;
pub use component::{
    parse_cpu, parse_memory_mib, AffinityKind, AffinityRule, Component, Configuration,
    ConfigurationKind, EnvFromSource, EnvVar, ExecCheck, HealthCheck, HttpCheck, ImageInfo,
    LocalRef, Microservices, Network, NetworkKind, ResourceRequirements, ServiceDiscovery,
    Storage, TrafficSecurity, Volume, VolumeSnapshot, WorkloadKind,
};
pub use job::{Job, JobType};
pub use platform::{
    ApplicationStatus, ComponentStatus, Condition, Platform, PlatformPhase, PlatformSpec,
    PlatformStatus, ResourceState, MAX_CONDITIONS,
};
