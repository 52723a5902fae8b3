//! Shared kube-rs helpers: API discovery lookups and patch parameters.

use kube::api::{PatchParams, PostParams};
use kube::discovery::{ApiResource, Discovery};
use tracing::{info, warn};

use crate::FIELD_MANAGER;

/// Patch parameters for server-side apply with our field manager
pub fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

/// Post parameters for create calls
pub fn post_params() -> PostParams {
    PostParams::default()
}

/// Look up a single resource in API discovery results
///
/// Returns `None` when the group or kind is not served; callers decide
/// whether that is a fallback or an error.
pub fn find_discovered_resource(
    discovery: &Discovery,
    group: &str,
    kind: &str,
) -> Option<ApiResource> {
    for api_group in discovery.groups() {
        if api_group.name() != group {
            continue;
        }
        for (ar, _caps) in api_group.resources_by_stability() {
            if ar.kind == kind {
                info!(
                    group = %group,
                    kind = %kind,
                    api_version = %ar.api_version,
                    "discovered API version"
                );
                return Some(ar);
            }
        }
    }
    warn!(group = %group, kind = %kind, "resource not found in API discovery");
    None
}

/// Build an `ApiResource` from a literal apiVersion and kind
///
/// For group-versions that are known to be served but absent from a failed
/// discovery run.
pub fn build_api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: plural.to_string(),
    }
}
