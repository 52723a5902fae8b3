//! Scheduling affinity: prefer non-master, non-lb nodes and spread a
//! component's pods across hostnames and zones. Components labeled both
//! cpu_bound and io_bound repel other bound pods with a single combined
//! term; a single bound label yields two weight-50 terms.

use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodAffinityTerm, PodAntiAffinity, PreferredSchedulingTerm, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use erda_common::crd::{AffinityKind, AffinityRule, Component, Job};
use erda_common::labels::{BOUND_PREFIX, COMPONENT_LABEL, CPU_BOUND, IO_BOUND};

fn avoid_node_role(key: &str, weight: i32) -> PreferredSchedulingTerm {
    PreferredSchedulingTerm {
        weight,
        preference: NodeSelectorTerm {
            match_expressions: Some(vec![NodeSelectorRequirement {
                key: key.to_string(),
                operator: "DoesNotExist".to_string(),
                values: None,
            }]),
            match_fields: None,
        },
    }
}

fn default_node_affinity() -> NodeAffinity {
    NodeAffinity {
        preferred_during_scheduling_ignored_during_execution: Some(vec![
            avoid_node_role("node-role.kubernetes.io/master", 100),
            avoid_node_role("node-role.kubernetes.io/lb", 80),
        ]),
        required_during_scheduling_ignored_during_execution: None,
    }
}

fn spread_term(component_name: &str, topology_key: &str) -> WeightedPodAffinityTerm {
    WeightedPodAffinityTerm {
        weight: 100,
        pod_affinity_term: PodAffinityTerm {
            topology_key: topology_key.to_string(),
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: COMPONENT_LABEL.to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![component_name.to_string()]),
                }]),
                match_labels: None,
            }),
            ..Default::default()
        },
    }
}

fn bound_exists_term(weight: i32, keys: &[&str]) -> WeightedPodAffinityTerm {
    WeightedPodAffinityTerm {
        weight,
        pod_affinity_term: PodAffinityTerm {
            topology_key: "kubernetes.io/hostname".to_string(),
            label_selector: Some(LabelSelector {
                match_expressions: Some(
                    keys.iter()
                        .map(|key| LabelSelectorRequirement {
                            key: format!("{BOUND_PREFIX}{key}"),
                            operator: "Exists".to_string(),
                            values: None,
                        })
                        .collect(),
                ),
                match_labels: None,
            }),
            ..Default::default()
        },
    }
}

/// Merge user affinity hints: preferred hints get weight-100 preferred
/// terms, requested hints land in the required node selector
fn apply_user_rules(rules: &[AffinityRule], node_affinity: &mut NodeAffinity) {
    for rule in rules {
        let requirement = NodeSelectorRequirement {
            key: rule.key.clone(),
            operator: match (&rule.value, rule.exist) {
                (Some(_), _) => "In".to_string(),
                (None, true) => "Exists".to_string(),
                (None, false) => "DoesNotExist".to_string(),
            },
            values: rule.value.clone().map(|v| vec![v]),
        };
        let term = NodeSelectorTerm {
            match_expressions: Some(vec![requirement]),
            match_fields: None,
        };
        match rule.kind {
            AffinityKind::NodePreferred => {
                node_affinity
                    .preferred_during_scheduling_ignored_during_execution
                    .get_or_insert_with(Vec::new)
                    .push(PreferredSchedulingTerm {
                        weight: 100,
                        preference: term,
                    });
            }
            AffinityKind::NodeRequested => {
                node_affinity
                    .required_during_scheduling_ignored_during_execution
                    .get_or_insert_with(|| NodeSelector {
                        node_selector_terms: Vec::new(),
                    })
                    .node_selector_terms
                    .push(term);
            }
        }
    }
}

/// Affinity block for a component pod
pub fn component_affinity(component: &Component) -> Affinity {
    let mut node_affinity = default_node_affinity();
    apply_user_rules(&component.affinity, &mut node_affinity);

    let mut anti_terms = vec![
        spread_term(&component.name, "kubernetes.io/hostname"),
        spread_term(&component.name, "kubernetes.io/zone"),
    ];
    let cpu_bound = component.labels.contains_key(CPU_BOUND);
    let io_bound = component.labels.contains_key(IO_BOUND);
    if cpu_bound && io_bound {
        anti_terms.push(bound_exists_term(100, &[CPU_BOUND, IO_BOUND]));
    } else {
        anti_terms.push(bound_exists_term(50, &[CPU_BOUND]));
        anti_terms.push(bound_exists_term(50, &[IO_BOUND]));
    }

    Affinity {
        node_affinity: Some(node_affinity),
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(anti_terms),
            required_during_scheduling_ignored_during_execution: None,
        }),
        pod_affinity: None,
    }
}

/// Affinity block for a job pod: node preferences only
pub fn job_affinity(job: &Job) -> Affinity {
    let mut node_affinity = default_node_affinity();
    apply_user_rules(&job.affinity, &mut node_affinity);
    Affinity {
        node_affinity: Some(node_affinity),
        pod_anti_affinity: None,
        pod_affinity: None,
    }
}
