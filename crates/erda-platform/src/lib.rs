//! Erda platform reconciliation: renders a Platform spec into Kubernetes
//! primitives, diffs desired against live state, and converges the cluster
//! with bounded work per tick.
//!
//! Subsystem map:
//! - [`render`]: pure spec-to-manifest translation
//! - [`diff`]: spec-revision diffing and kind-specific semantic equality
//! - [`launch`]: bucketed execution with readiness gates
//! - [`controller`]: the per-CR reconcile loop
//! - [`status`]: live-state projection onto the CR status
//! - [`envs`]: cross-component environment injection
//! - [`jobs`]: the initialization job gate

#![deny(missing_docs)]

pub mod client;
pub mod controller;
pub mod diff;
pub mod envs;
pub mod jobs;
pub mod launch;
pub mod render;
pub mod status;

pub use client::{PlatformKubeClient, PlatformKubeClientImpl};
pub use controller::{error_policy, reconcile, Context};
