//! Cross-subsystem scenarios exercised through the public API: rendering,
//! diffing, env injection, and status projection working together.

use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use erda_common::crd::{
    Application, Component, ImageInfo, Network, Platform, PlatformSpec, ResourceState,
    ServiceDiscovery, WorkloadKind,
};
use erda_common::labels::{COMPONENT_LABEL, MANAGED_LABEL};
use erda_platform::diff::workload::workloads_equal;
use erda_platform::diff::SpecDiff;
use erda_platform::envs;
use erda_platform::render::ingress::{IngressStrategy, NetworkingV1Strategy};
use erda_platform::render::workload::compose_workload;
use erda_platform::render::{service, Workload};
use erda_platform::status::project;

fn owner() -> OwnerReference {
    OwnerReference {
        api_version: "erda.terminus.io/v1beta1".into(),
        kind: "Platform".into(),
        name: "erda".into(),
        uid: "uid-1".into(),
        controller: Some(true),
        ..Default::default()
    }
}

fn api_component() -> Component {
    Component {
        name: "api".into(),
        namespace: Some("erda-system".into()),
        replicas: Some(2),
        image_info: ImageInfo {
            image: "img:1".into(),
            ..Default::default()
        },
        network: Some(Network {
            service_discovery: vec![ServiceDiscovery {
                port: 8080,
                domain: "api.example.com".into(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn platform_with(components: Vec<Component>) -> Platform {
    let mut platform = Platform::new(
        "erda",
        PlatformSpec {
            applications: vec![Application {
                name: "core".into(),
                components,
                ..Default::default()
            }],
            jobs: Vec::new(),
        },
    );
    platform.metadata.namespace = Some("erda-system".into());
    platform.metadata.uid = Some("uid-1".into());
    platform
}

/// S1: one stateless component renders a 2-replica Deployment, a ClusterIP
/// Service on 8080/TCP, and a TLS'd Ingress routing the domain to it
#[test]
fn s1_single_component_renders_full_primitive_set() {
    let component = api_component();

    let workload = compose_workload(&component, &owner()).unwrap();
    let deployment = match workload {
        Workload::Deployment(d) => d,
        other => panic!("expected a Deployment, got {:?}", other.kind()),
    };
    let spec = deployment.spec.unwrap();
    assert_eq!(spec.replicas, Some(2));
    let labels = spec.selector.match_labels.unwrap();
    assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
    assert_eq!(labels.get(COMPONENT_LABEL).map(String::as_str), Some("api"));
    let container = &spec.template.spec.unwrap().containers[0];
    assert_eq!(container.name, "api");
    assert_eq!(container.image.as_deref(), Some("img:1"));

    let svc = service::compose_service(&component, &owner()).unwrap();
    let svc_spec = svc.spec.unwrap();
    assert_eq!(svc_spec.type_.as_deref(), Some("ClusterIP"));
    let ports = svc_spec.ports.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].port, 8080);
    assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));

    let ingress = NetworkingV1Strategy::new().render(&component, &owner());
    assert_eq!(ingress["spec"]["rules"][0]["host"], "api.example.com");
    assert_eq!(
        ingress["spec"]["rules"][0]["http"]["paths"][0]["backend"]["service"]["port"]["number"],
        8080
    );
    assert_eq!(
        ingress["spec"]["tls"][0]["hosts"][0],
        "api.example.com"
    );
}

/// S2 at the diff level: an image edit updates exactly one component
#[test]
fn s2_image_edit_is_a_single_update() {
    let current = platform_with(vec![api_component()]).spec;
    let mut target = current.clone();
    target.applications[0].components[0].image_info.image = "img:2".into();

    let actions = SpecDiff::new(Some(&current), &target).actions();
    assert_eq!(actions.updated_services.len(), 1);
    assert!(actions.updated_services.contains_key("api"));
    assert!(actions.added_services.is_empty());
    assert!(actions.deleted_services.is_empty());
}

/// S6: two ServiceDiscovery entries, one domain: both ports on the
/// Service, exactly one ingress rule
#[test]
fn s6_partial_domains() {
    let mut component = api_component();
    component
        .network
        .as_mut()
        .unwrap()
        .service_discovery
        .push(ServiceDiscovery {
            port: 9090,
            ..Default::default()
        });

    let svc = service::compose_service(&component, &owner()).unwrap();
    let ports = svc.spec.unwrap().ports.unwrap();
    assert_eq!(ports.len(), 2);

    let ingress = NetworkingV1Strategy::new().render(&component, &owner());
    let rules = ingress["spec"]["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["host"], "api.example.com");
}

/// Round-trip property: rendering a component twice yields semantically
/// equal workloads across every kind
#[test]
fn render_diff_round_trip_is_quiet() {
    for kind in [
        WorkloadKind::Stateless,
        WorkloadKind::Stateful,
        WorkloadKind::PerNode,
    ] {
        let mut component = api_component();
        component.workload = kind;
        let first = compose_workload(&component, &owner()).unwrap();
        let second = compose_workload(&component, &owner()).unwrap();
        assert!(
            workloads_equal(&first, &second).unwrap(),
            "round trip drifted for {kind}"
        );
    }
}

/// Injection is stable: injecting an already-injected spec changes nothing
/// the differ can see
#[test]
fn injection_is_idempotent_under_diff() {
    let platform = platform_with(vec![api_component()]);
    let injected = envs::inject(&platform);

    let mut reinjected_platform = platform.clone();
    reinjected_platform.spec = injected.clone();
    let reinjected = envs::inject(&reinjected_platform);

    // every env the first pass produced survives the second pass unchanged
    let first = &injected.applications[0].components[0];
    let second = &reinjected.applications[0].components[0];
    for env in &first.envs {
        let found = second.envs.iter().find(|e| e.name == env.name);
        assert_eq!(
            found.and_then(|e| e.value.as_deref()),
            env.value.as_deref(),
            "env {} drifted across injection passes",
            env.name
        );
    }
}

/// Monotonic status: a Ready projection stays Ready while live state holds
#[test]
fn ready_projection_is_stable() {
    let platform = platform_with(vec![api_component()]);
    let injected = envs::inject(&platform);
    let component = injected.applications[0].components[0].clone();

    let live = || {
        let mut workload = compose_workload(&component, &owner()).unwrap();
        if let Workload::Deployment(d) = &mut workload {
            d.status = Some(DeploymentStatus {
                observed_generation: Some(1),
                available_replicas: Some(2),
                ..Default::default()
            });
        }
        workload
    };

    let first = project(&injected, vec![live()]);
    assert!(first.all_ready);
    let second = project(&injected, vec![live()]);
    assert!(second.all_ready);
    assert_eq!(first.applications, second.applications);

    // readiness regression on the live side drops the projection
    let mut regressed = live();
    if let Workload::Deployment(d) = &mut regressed {
        d.status.as_mut().unwrap().unavailable_replicas = Some(1);
        d.status.as_mut().unwrap().available_replicas = Some(1);
    }
    let third = project(&injected, vec![regressed]);
    assert!(!third.all_ready);
    assert_eq!(
        third.applications[0].components[0].status,
        ResourceState::Deploying
    );
}

/// Dependency envs generated for one component resolve against the service
/// rendered for the other
#[test]
fn dependency_envs_point_at_rendered_services() {
    let mut worker = api_component();
    worker.name = "worker".into();
    worker.network.as_mut().unwrap().service_discovery[0].domain = String::new();

    let platform = platform_with(vec![api_component(), worker]);
    let injected = envs::inject(&platform);

    let worker_envs = &injected.applications[0].components[1].envs;
    let api_addr = worker_envs
        .iter()
        .find(|e| e.name == "API_ADDR")
        .and_then(|e| e.value.clone())
        .expect("worker should learn the api address");

    let api_service =
        service::compose_service(&injected.applications[0].components[0], &owner()).unwrap();
    let port = api_service.spec.unwrap().ports.unwrap()[0].port;
    assert_eq!(
        api_addr,
        format!(
            "{}.{}.svc.cluster.local:{}",
            api_service.metadata.name.unwrap(),
            api_service.metadata.namespace.unwrap(),
            port
        )
    );
}
