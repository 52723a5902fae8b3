//! Three-way set diff between two platform spec revisions.
//!
//! Each application is an envelope: when its shared env bag drifts, every
//! shared component in it is treated as updated (global-env fan-out);
//! otherwise only components whose spec changed update. Components ending
//! in `-action` are never deployed and are filtered from every bucket.

use std::collections::BTreeMap;
use std::fmt;

use erda_common::crd::{Application, Component, EnvVar, PlatformSpec, WorkloadKind};

/// The six-bucket action set handed to the Launcher
#[derive(Clone, Debug, Default)]
pub struct Actions {
    /// Service-class components to create
    pub added_services: BTreeMap<String, Component>,
    /// Service-class components to update
    pub updated_services: BTreeMap<String, Component>,
    /// Service-class components to delete
    pub deleted_services: BTreeMap<String, Component>,
    /// Per-node components to create
    pub added_daemon_sets: BTreeMap<String, Component>,
    /// Per-node components to update
    pub updated_daemon_sets: BTreeMap<String, Component>,
    /// Per-node components to delete
    pub deleted_daemon_sets: BTreeMap<String, Component>,
}

impl Actions {
    /// True when no bucket holds work
    pub fn is_empty(&self) -> bool {
        self.added_services.is_empty()
            && self.updated_services.is_empty()
            && self.deleted_services.is_empty()
            && self.added_daemon_sets.is_empty()
            && self.updated_daemon_sets.is_empty()
            && self.deleted_daemon_sets.is_empty()
    }

    /// Drop entries whose name carries the trailing filter suffix
    fn filter_action_suffix(&mut self) {
        for bucket in [
            &mut self.added_services,
            &mut self.updated_services,
            &mut self.deleted_services,
            &mut self.added_daemon_sets,
            &mut self.updated_daemon_sets,
            &mut self.deleted_daemon_sets,
        ] {
            bucket.retain(|name, _| !name.ends_with("-action"));
        }
    }
}

impl fmt::Display for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |bucket: &BTreeMap<String, Component>| -> String {
            bucket.keys().cloned().collect::<Vec<_>>().join(", ")
        };
        write!(
            f,
            "service: ADD: [{}], UPDATE: [{}], DELETE: [{}], daemonset: ADD: [{}], UPDATE: [{}], DELETE: [{}]",
            names(&self.added_services),
            names(&self.updated_services),
            names(&self.deleted_services),
            names(&self.added_daemon_sets),
            names(&self.updated_daemon_sets),
            names(&self.deleted_daemon_sets),
        )
    }
}

struct Envelope {
    env_drift: bool,
    current: BTreeMap<String, Component>,
    target: BTreeMap<String, Component>,
}

/// Diff between two platform spec revisions; the current side may be
/// absent (first deployment)
pub struct SpecDiff {
    envelopes: Vec<Envelope>,
}

fn components_by_name(app: &Application) -> BTreeMap<String, Component> {
    app.components
        .iter()
        .map(|c| (c.name.clone(), c.clone()))
        .collect()
}

fn env_bag(envs: &[EnvVar]) -> BTreeMap<&str, Option<&str>> {
    envs.iter()
        .map(|e| (e.name.as_str(), e.value.as_deref()))
        .collect()
}

impl SpecDiff {
    /// Build the per-application envelopes
    pub fn new(current: Option<&PlatformSpec>, target: &PlatformSpec) -> Self {
        let mut envelopes = Vec::new();
        let blank = PlatformSpec::default();
        let current = current.unwrap_or(&blank);

        // every target application, drifted-from-current or brand new
        for target_app in &target.applications {
            let current_app = current
                .applications
                .iter()
                .find(|a| a.name == target_app.name);
            envelopes.push(Envelope {
                env_drift: match current_app {
                    Some(app) => env_bag(&app.envs) != env_bag(&target_app.envs),
                    None => true,
                },
                current: current_app.map(components_by_name).unwrap_or_default(),
                target: components_by_name(target_app),
            });
        }
        // applications dropped from the spec delete all their components
        for current_app in &current.applications {
            if !target.applications.iter().any(|a| a.name == current_app.name) {
                envelopes.push(Envelope {
                    env_drift: false,
                    current: components_by_name(current_app),
                    target: BTreeMap::new(),
                });
            }
        }

        Self { envelopes }
    }

    /// Partition every envelope into the six action buckets
    pub fn actions(&self) -> Actions {
        let mut actions = Actions::default();

        for envelope in &self.envelopes {
            for (name, component) in &envelope.target {
                let buckets = match component.workload {
                    WorkloadKind::PerNode => (
                        &mut actions.added_daemon_sets,
                        &mut actions.updated_daemon_sets,
                    ),
                    _ => (&mut actions.added_services, &mut actions.updated_services),
                };
                match envelope.current.get(name) {
                    None => {
                        buckets.0.insert(name.clone(), component.clone());
                    }
                    Some(current) if envelope.env_drift || current != component => {
                        buckets.1.insert(name.clone(), component.clone());
                    }
                    Some(_) => {}
                }
            }
            for (name, component) in &envelope.current {
                if envelope.target.contains_key(name) {
                    continue;
                }
                let bucket = match component.workload {
                    WorkloadKind::PerNode => &mut actions.deleted_daemon_sets,
                    _ => &mut actions.deleted_services,
                };
                bucket.insert(name.clone(), component.clone());
            }
        }

        actions.filter_action_suffix();
        actions
    }
}
