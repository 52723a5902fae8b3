//! Environment injection: resolves cross-component dependency addresses,
//! public-domain URLs, and resource-derived variables into each component's
//! final env list.
//!
//! Composition order (later wins on name conflict):
//! 1. component envs
//! 2. SELF_ADDR / SELF_PUBLIC_URL / SELF_PUBLIC_ADDR
//! 3. DICE_* resource-derived envs
//! 4. application envs merged underneath (component entries take precedence)
//! 5. dependency-derived `<NAME>_ADDR` / `_PUBLIC_*` envs
//! 6. `_KEY_` wrapped keys promoted to `KEY`

use std::env;

use erda_common::crd::{Component, EnvVar, NetworkKind, Platform, PlatformSpec};
use erda_common::labels::{parse_protocol, ANNOTATION_SSL_ENABLED, ENV_SPECIFIED_NAMESPACE};

/// Produce the spec actually deployed: namespaces inherited from the CR,
/// workload kinds defaulted, env lists fully composed.
pub fn inject(platform: &Platform) -> PlatformSpec {
    let mut spec = platform.spec.clone();
    let namespace = platform
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());

    let depend_envs = compose_depend_envs(&spec, &namespace);

    for job in &mut spec.jobs {
        job.namespace = Some(namespace.clone());
    }

    for app in &mut spec.applications {
        let protocol = parse_protocol(
            app.annotations
                .get(ANNOTATION_SSL_ENABLED)
                .map(String::as_str),
        );
        let app_envs = app.envs.clone();
        let app_env_from = app.env_from.clone();
        for component in &mut app.components {
            component.namespace = Some(namespace.clone());

            let mut envs = component.envs.clone();
            let has_self_addr = envs.iter().any(|e| e.name == "SELF_ADDR");
            if !component.service_discovery().is_empty() && !has_self_addr {
                envs.extend(compose_self_addr_envs(component, protocol));
            }
            envs.extend(compose_resource_envs(component));
            envs = merge_envs(&app_envs, envs);
            envs = overlay_depend_envs(&depend_envs, envs);
            envs = promote_wrapped_envs(envs);
            component.envs = envs;

            let mut env_from = app_env_from.clone();
            env_from.extend(component.env_from.clone());
            component.env_from = env_from;
        }
    }

    spec
}

/// Namespace used in generated cluster-local addresses
fn address_namespace(default: &str) -> String {
    match env::var(ENV_SPECIFIED_NAMESPACE) {
        Ok(ns) if !ns.is_empty() => ns,
        _ => default.to_string(),
    }
}

/// SELF_ADDR plus SELF_PUBLIC_URL / SELF_PUBLIC_ADDR when a domain is set
fn compose_self_addr_envs(component: &Component, protocol: &str) -> Vec<EnvVar> {
    let mut envs = Vec::new();
    let sd = match component.service_discovery().first() {
        Some(sd) => sd,
        None => return envs,
    };
    let namespace = address_namespace(component.namespace());
    envs.push(EnvVar::new(
        "SELF_ADDR",
        format!(
            "{}.{}.svc.cluster.local:{}",
            component.name, namespace, sd.port
        ),
    ));
    if !sd.domain.is_empty() {
        envs.push(EnvVar::new(
            "SELF_PUBLIC_URL",
            format!("{}://{}", protocol, sd.domain),
        ));
        envs.push(EnvVar::new("SELF_PUBLIC_ADDR", sd.domain.clone()));
    }
    envs
}

/// DICE_* envs derived from the component resources; origin is the larger
/// of request and limit
fn compose_resource_envs(component: &Component) -> Vec<EnvVar> {
    let cpu_request = component.resources.requested_cpu();
    let mem_request = component.resources.requested_memory_mib();
    let cpu_origin = cpu_request.max(component.resources.limit_cpu());
    let mem_origin = mem_request.max(component.resources.limit_memory_mib());
    vec![
        EnvVar::new("DICE_CPU_ORIGIN", format!("{cpu_origin:.6}")),
        EnvVar::new("DICE_MEM_ORIGIN", format!("{mem_origin}")),
        EnvVar::new("DICE_CPU_REQUEST", format!("{cpu_request:.6}")),
        EnvVar::new("DICE_MEM_REQUEST", format!("{mem_request}")),
        EnvVar::new("DICE_CPU_LIMIT", format!("{cpu_origin:.6}")),
        EnvVar::new("DICE_MEM_LIMIT", format!("{mem_origin}")),
    ]
}

/// Dependency envs for every non-host component exposing a port:
/// `<UPPER_SNAKE>_ADDR`, and `_PUBLIC_URL` / `_PUBLIC_ADDR` when a domain
/// is published
fn compose_depend_envs(spec: &PlatformSpec, namespace: &str) -> Vec<EnvVar> {
    let mut envs = Vec::new();
    for app in &spec.applications {
        let protocol = parse_protocol(
            app.annotations
                .get(ANNOTATION_SSL_ENABLED)
                .map(String::as_str),
        );
        for component in &app.components {
            if component
                .network
                .as_ref()
                .map(|n| n.kind == NetworkKind::Host)
                .unwrap_or(true)
            {
                continue;
            }
            let sd = match component.service_discovery().first() {
                Some(sd) => sd,
                None => continue,
            };
            let key = upper_snake(&component.name);
            let address_ns = address_namespace(namespace);
            envs.push(EnvVar::new(
                format!("{key}_ADDR"),
                format!(
                    "{}.{}.svc.cluster.local:{}",
                    component.name, address_ns, sd.port
                ),
            ));
            if sd.domain.is_empty() {
                continue;
            }
            envs.push(EnvVar::new(
                format!("{key}_PUBLIC_URL"),
                format!("{}://{}", protocol, sd.domain),
            ));
            envs.push(EnvVar::new(format!("{key}_PUBLIC_ADDR"), sd.domain.clone()));
        }
    }
    envs
}

fn upper_snake(name: &str) -> String {
    name.replace('-', "_").to_uppercase()
}

/// Merge application envs underneath component envs; the component entry
/// wins on a name conflict, relative order of first appearance is kept
pub fn merge_envs(app_envs: &[EnvVar], component_envs: Vec<EnvVar>) -> Vec<EnvVar> {
    let mut merged: Vec<EnvVar> = Vec::with_capacity(app_envs.len() + component_envs.len());
    let mut used = vec![false; component_envs.len()];

    for app_env in app_envs {
        match component_envs.iter().position(|e| e.name == app_env.name) {
            Some(i) => {
                used[i] = true;
                merged.push(component_envs[i].clone());
            }
            None => merged.push(app_env.clone()),
        }
    }
    for (i, env) in component_envs.into_iter().enumerate() {
        if !used[i] {
            merged.push(env);
        }
    }
    merged
}

/// Overlay dependency envs; the dependency value wins, unseen names append
pub fn overlay_depend_envs(depend_envs: &[EnvVar], mut envs: Vec<EnvVar>) -> Vec<EnvVar> {
    for depend in depend_envs {
        match envs.iter_mut().find(|e| e.name == depend.name) {
            Some(existing) => {
                existing.value = depend.value.clone();
                existing.value_from = depend.value_from.clone();
            }
            None => envs.push(depend.clone()),
        }
    }
    envs
}

/// Promote `_KEY_` wrapped entries onto `KEY`; runtime overrides defeat
/// baked-in values this way
pub fn promote_wrapped_envs(mut envs: Vec<EnvVar>) -> Vec<EnvVar> {
    let promoted: Vec<(String, Option<String>)> = envs
        .iter()
        .filter(|e| e.name.len() > 2 && e.name.starts_with('_') && e.name.ends_with('_'))
        .map(|e| {
            (
                e.name
                    .trim_start_matches('_')
                    .trim_end_matches('_')
                    .to_string(),
                e.value.clone(),
            )
        })
        .collect();

    for (name, value) in promoted {
        match envs
            .iter_mut()
            .find(|e| e.name == name && !(e.name.starts_with('_') && e.name.ends_with('_')))
        {
            Some(existing) => existing.value = value,
            None => envs.push(EnvVar {
                name,
                value,
                value_from: None,
            }),
        }
    }
    envs
}
