//! Reconcile story tests against the mocked client.

use std::sync::{Arc, Mutex};

use k8s_openapi::api::apps::v1::DeploymentStatus;
use kube::runtime::controller::Action;

use erda_common::crd::{
    Application, Component, ImageInfo, Job, JobType, Network, Platform, PlatformPhase,
    PlatformSpec, ResourceState, ServiceDiscovery,
};
use erda_common::labels::{ANNOTATION_LAST_APPLIED, JOB_NAME_LABEL, JOB_TYPE_LABEL, MANAGED_LABEL};

use crate::client::MockPlatformKubeClient;
use crate::envs;
use crate::render::ingress::{IngressStrategy, NetworkingV1Strategy};
use crate::render::workload::compose_workload;
use crate::render::Workload;

use super::{error_policy, reconcile, Context, CONFLICT_REQUEUE_INTERVAL, REQUEUE_INTERVAL};

fn api_component() -> Component {
    Component {
        name: "api".into(),
        image_info: ImageInfo {
            image: "img:1".into(),
            ..Default::default()
        },
        replicas: Some(2),
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

fn platform(components: Vec<Component>, jobs: Vec<Job>) -> Platform {
    let mut platform = Platform::new(
        "erda",
        PlatformSpec {
            applications: vec![Application {
                name: "core".into(),
                components,
                ..Default::default()
            }],
            jobs,
        },
    );
    platform.metadata.namespace = Some("erda-system".into());
    platform.metadata.uid = Some("uid-1".into());
    platform
}

fn context(mock: MockPlatformKubeClient) -> Arc<Context> {
    Arc::new(Context {
        client: Arc::new(mock),
        ingress: Arc::new(NetworkingV1Strategy::new()),
    })
}

/// Rendered workload for the injected form of a component, marked ready
fn ready_live_workload(platform: &Platform, index: usize) -> Workload {
    let injected = envs::inject(platform);
    let component = injected.applications[0].components[index].clone();
    let mut workload = compose_workload(&component, &platform.controller_owner()).unwrap();
    if let Workload::Deployment(d) = &mut workload {
        d.status = Some(DeploymentStatus {
            observed_generation: Some(1),
            available_replicas: component.replicas,
            replicas: component.replicas,
            ..Default::default()
        });
    }
    workload
}

fn with_last_applied(mut platform: Platform) -> Platform {
    let injected = envs::inject(&platform);
    platform.metadata.annotations.get_or_insert_with(Default::default).insert(
        ANNOTATION_LAST_APPLIED.to_string(),
        serde_json::to_string(&injected).unwrap(),
    );
    platform
}

type PhaseLog = Arc<Mutex<Vec<PlatformPhase>>>;

fn track_status(mock: &mut MockPlatformKubeClient) -> PhaseLog {
    let log: PhaseLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    mock.expect_patch_platform_status()
        .returning(move |_, _, status| {
            sink.lock().unwrap().push(status.phase);
            Ok(())
        });
    log
}

/// S1: a fresh platform converges to Ready in one tick when the workload
/// comes up
#[tokio::test]
async fn story_fresh_platform_becomes_ready() {
    let platform = platform(vec![api_component()], vec![]);
    let live = ready_live_workload(&platform, 0);

    let mut mock = MockPlatformKubeClient::new();
    let phases = track_status(&mut mock);
    mock.expect_get_service().returning(|_, _| Ok(None));
    mock.expect_create_service()
        .times(1)
        .withf(|service| {
            service
                .spec
                .as_ref()
                .and_then(|s| s.ports.as_ref())
                .map(|ports| ports[0].port == 8080)
                .unwrap_or(false)
        })
        .returning(|_| Ok(()));
    mock.expect_get_ingress().returning(|_, _, _| Ok(None));
    mock.expect_apply_ingress()
        .times(1)
        .withf(|_, name, _, manifest| {
            name == "api" && manifest["spec"]["rules"][0]["host"] == "api.example.com"
        })
        .returning(|_, _, _, _| Ok(()));
    mock.expect_get_workload().returning(|_, _, _| Ok(None));
    mock.expect_create_workload()
        .times(1)
        .withf(|workload| workload.name() == "api")
        .returning(|_| Ok(()));
    mock.expect_wait_workload_ready().returning(|_, _, _| Ok(()));
    mock.expect_annotate_platform()
        .times(1)
        .withf(|_, _, key, _| key == ANNOTATION_LAST_APPLIED)
        .returning(|_, _, _, _| Ok(()));
    mock.expect_list_workloads()
        .returning(move |_| Ok(vec![live.clone()]));

    let action = reconcile(Arc::new(platform), context(mock)).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(phases.lock().unwrap().last(), Some(&PlatformPhase::Ready));
}

/// S3: with a PreJob present, no workload is created on the first tick;
/// the job is
#[tokio::test]
async fn story_job_gate_blocks_workload_creation() {
    let job = Job {
        name: "init".into(),
        kind: JobType::PreJob,
        image_info: ImageInfo {
            image: "job:1".into(),
            ..Default::default()
        },
        ..Default::default()
    };
    let platform = platform(vec![api_component()], vec![job]);

    let mut mock = MockPlatformKubeClient::new();
    track_status(&mut mock);
    mock.expect_list_jobs().returning(|_, _| Ok(vec![]));
    mock.expect_create_job()
        .times(1)
        .withf(|job| job.metadata.name.as_deref() == Some("erda-prejob-init"))
        .returning(|_| Ok(()));
    // no workload/service expectations: any create would panic the mock

    let action = reconcile(Arc::new(platform), context(mock)).await.unwrap();
    assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
}

/// S4: a failed PreJob is terminal: Phase Failed, no requeue, no
/// deployments
#[tokio::test]
async fn story_failed_job_stops_the_platform() {
    use k8s_openapi::api::batch::v1::{Job as BatchJob, JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    let job = Job {
        name: "init".into(),
        kind: JobType::PreJob,
        ..Default::default()
    };
    let mut platform = platform(vec![api_component()], vec![job]);
    platform.status = Some({
        let mut status = platform.status_or_seeded();
        status.phase = PlatformPhase::Initialization;
        status.jobs.insert("init".into(), ResourceState::Running);
        status
    });

    let mut mock = MockPlatformKubeClient::new();
    let phases = track_status(&mut mock);
    mock.expect_list_jobs().returning(|_, _| {
        Ok(vec![BatchJob {
            metadata: ObjectMeta {
                name: Some("erda-prejob-init".into()),
                labels: Some(
                    [
                        (MANAGED_LABEL.to_string(), "true".to_string()),
                        (JOB_NAME_LABEL.to_string(), "init".to_string()),
                        (JOB_TYPE_LABEL.to_string(), "prejob".to_string()),
                    ]
                    .into(),
                ),
                ..Default::default()
            },
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: "Failed".into(),
                    status: "True".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }])
    });

    let action = reconcile(Arc::new(platform), context(mock)).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(phases.lock().unwrap().last(), Some(&PlatformPhase::Failed));
}

/// S5: a live workload no longer in the spec is deleted along with its
/// service and ingress
#[tokio::test]
async fn story_orphans_are_garbage_collected() {
    let platform = with_last_applied(platform(vec![api_component()], vec![]));
    let api_live = ready_live_workload(&platform, 0);
    let api_for_repair = api_live.clone();

    // a leftover deployment the spec no longer names
    let mut legacy = platform.clone();
    legacy.spec.applications[0].components[0].name = "legacy".into();
    let legacy_live = ready_live_workload(&legacy, 0);

    let mut mock = MockPlatformKubeClient::new();
    track_status(&mut mock);
    mock.expect_get_workload()
        .returning(move |_, _, _| Ok(Some(api_for_repair.clone())));
    mock.expect_list_workloads()
        .returning(move |_| Ok(vec![api_live.clone(), legacy_live.clone()]));
    mock.expect_delete_workload()
        .times(1)
        .withf(|_, name, _| name == "legacy")
        .returning(|_, _, _| Ok(()));
    mock.expect_delete_service()
        .times(1)
        .withf(|name, _| name == "legacy")
        .returning(|_, _| Ok(()));
    mock.expect_delete_ingress()
        .times(1)
        .withf(|_, name, _| name == "legacy")
        .returning(|_, _, _| Ok(()));
    mock.expect_delete_hpa().returning(|_, _| Ok(()));
    mock.expect_delete_vpa().returning(|_, _| Ok(()));

    let action = reconcile(Arc::new(platform), context(mock)).await.unwrap();
    // orphans present this tick, Ready comes on the next one
    assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
}

/// Property: reconciling a converged platform issues no primitive writes
#[tokio::test]
async fn story_converged_platform_is_idempotent() {
    let platform = with_last_applied(platform(vec![api_component()], vec![]));
    let api_live = ready_live_workload(&platform, 0);
    let api_for_repair = api_live.clone();

    let mut mock = MockPlatformKubeClient::new();
    let phases = track_status(&mut mock);
    mock.expect_get_workload()
        .returning(move |_, _, _| Ok(Some(api_for_repair.clone())));
    mock.expect_list_workloads()
        .returning(move |_| Ok(vec![api_live.clone()]));
    // no create/update/delete/annotate expectations: a write panics the mock

    let action = reconcile(Arc::new(platform), context(mock)).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(phases.lock().unwrap().last(), Some(&PlatformPhase::Ready));
}

/// S2: an image edit updates the deployment but leaves the service and
/// ingress untouched
#[tokio::test]
async fn story_image_edit_updates_only_the_workload() {
    // last-applied records img:1, the spec now wants img:2
    let old = platform(vec![api_component()], vec![]);
    let mut platform = with_last_applied(old);
    platform.spec.applications[0].components[0].image_info.image = "img:2".into();
    let stale_live = ready_live_workload(&with_last_applied(self::platform(
        vec![api_component()],
        vec![],
    )), 0);

    let live_service = {
        let injected = envs::inject(&platform);
        crate::render::service::compose_service(
            &injected.applications[0].components[0],
            &platform.controller_owner(),
        )
        .unwrap()
    };
    let live_ingress = {
        let injected = envs::inject(&platform);
        let strategy = NetworkingV1Strategy::new();
        let manifest = strategy.render(
            &injected.applications[0].components[0],
            &platform.controller_owner(),
        );
        kube::api::DynamicObject {
            types: None,
            metadata: kube::api::ObjectMeta {
                name: Some("api".into()),
                ..Default::default()
            },
            data: serde_json::json!({ "spec": manifest["spec"] }),
        }
    };

    let updated = platform.clone();
    let updated_live = ready_live_workload(&updated, 0);

    let mut mock = MockPlatformKubeClient::new();
    track_status(&mut mock);
    mock.expect_get_workload()
        .returning(move |_, _, _| Ok(Some(stale_live.clone())));
    mock.expect_get_service()
        .returning(move |_, _| Ok(Some(live_service.clone())));
    mock.expect_get_ingress()
        .returning(move |_, _, _| Ok(Some(live_ingress.clone())));
    mock.expect_update_workload()
        .times(1)
        .withf(|workload| match workload {
            Workload::Deployment(d) => {
                d.spec
                    .as_ref()
                    .and_then(|s| s.template.spec.as_ref())
                    .map(|p| p.containers[0].image.as_deref() == Some("img:2"))
                    .unwrap_or(false)
            }
            _ => false,
        })
        .returning(|_| Ok(()));
    // create_service / apply_ingress / create_workload are NOT expected
    mock.expect_wait_workload_ready().returning(|_, _, _| Ok(()));
    mock.expect_annotate_platform().returning(|_, _, _, _| Ok(()));
    mock.expect_list_workloads()
        .returning(move |_| Ok(vec![updated_live.clone()]));

    let action = reconcile(Arc::new(platform), context(mock)).await.unwrap();
    assert_eq!(action, Action::await_change());
}

#[test]
fn test_error_policy_routing() {
    let platform = Arc::new(platform(vec![], vec![]));
    let ctx = context(MockPlatformKubeClient::new());

    let conflict = erda_common::Error::Kube {
        source: kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "conflict".into(),
            reason: "Conflict".into(),
            code: 409,
        }),
    };
    assert_eq!(
        error_policy(platform.clone(), &conflict, ctx.clone()),
        Action::requeue(CONFLICT_REQUEUE_INTERVAL)
    );

    let bad_spec = erda_common::Error::bad_spec("nope");
    assert_eq!(
        error_policy(platform.clone(), &bad_spec, ctx.clone()),
        Action::await_change()
    );

    let transient = erda_common::Error::internal("blip");
    assert_eq!(
        error_policy(platform, &transient, ctx),
        Action::requeue(REQUEUE_INTERVAL)
    );
}
