use std::sync::Arc;
use std::time::Duration;

use crop_farm::{
    EVENT_TIMER_SWITCH, FarmFactory, FarmProvisioner, ProvisionParams, ServiceRegistry, Session,
};
use crop_storage::{PageQuery, StoreFactory};
use domain::{
    ConsistencyLevel, ErrorKind, Permission, SERVER_DEVICE_TYPE, StepState, StoreKind, User,
    Workflow, WorkflowStep, roles,
};

fn setup() -> (Arc<FarmFactory>, FarmProvisioner, tokio::sync::mpsc::Receiver<domain::FarmConfig>, tokio::sync::mpsc::Receiver<u64>) {
    let stores = Arc::new(StoreFactory::new());
    let registry = ServiceRegistry::new();
    let factory = Arc::new(FarmFactory::new(stores.clone(), registry.clone()));
    let (provisioner, provisioned, deprovisioned) = FarmProvisioner::new(stores, registry, 4);
    (factory, provisioner, provisioned, deprovisioned)
}

#[tokio::test]
async fn provision_creates_default_devices_and_admin_permission() {
    let (factory, provisioner, mut provisioned, _deprovisioned) = setup();
    let owner = User::from_email("grower@example.com");

    let config = provisioner
        .provision(
            &owner,
            ProvisionParams {
                name: "north".to_string(),
                interval: 0,
                ..ProvisionParams::default()
            },
        )
        .await
        .expect("provision");

    let types: Vec<&str> = config.devices.iter().map(|d| d.device_type.as_str()).collect();
    assert_eq!(types, vec![SERVER_DEVICE_TYPE, "nutrient", "climate"]);
    let nutrient = config.device_by_type("nutrient").expect("nutrient");
    assert_eq!(nutrient.channels.len(), 4);
    assert!(nutrient.metric_by_key("ph").is_some());
    assert!(nutrient.uri.starts_with("virtual://"));
    assert_eq!(provisioned.try_recv().expect("published").id, config.id);

    let permissions = factory
        .store_factory()
        .permission_store(StoreKind::Memory)
        .expect("permissions");
    let granted = permissions.list_by_farm(config.id).await.expect("list");
    assert_eq!(granted.len(), 1);
    assert!(granted[0].is_admin());
    assert_eq!(granted[0].user_id, owner.id);

    let farm = factory.create_and_run(config).await.expect("run");
    assert_eq!(farm.devices().expect("devices").len(), 2);
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn provisioning_loop_starts_new_farms() {
    let (factory, provisioner, provisioned, _deprovisioned) = setup();
    let loop_handle = factory.spawn_provisioning_loop(provisioned);
    let config = provisioner
        .provision(&User::from_email("a@example.com"), ProvisionParams {
            interval: 0,
            ..ProvisionParams::default()
        })
        .await
        .expect("provision");

    let registry = factory.registry();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while registry.get_farm(config.id).is_err() {
        assert!(tokio::time::Instant::now() < deadline, "farm never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    registry.get_farm(config.id).expect("farm").stop().await.expect("stop");
    loop_handle.abort();
}

#[tokio::test]
async fn deprovision_requires_admin_and_removes_rows() {
    let (factory, provisioner, _provisioned, mut deprovisioned) = setup();
    let owner = User::from_email("owner@example.com");
    let config = provisioner
        .provision(&owner, ProvisionParams {
            interval: 0,
            ..ProvisionParams::default()
        })
        .await
        .expect("provision");
    factory.create_and_run(config.clone()).await.expect("run");

    let stranger = User::from_email("stranger@example.com");
    let err = provisioner
        .deprovision(&stranger, config.id)
        .await
        .expect_err("not admin");
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    provisioner.deprovision(&owner, config.id).await.expect("deprovision");
    assert_eq!(deprovisioned.try_recv().expect("published"), config.id);
    assert!(factory.registry().get_farm(config.id).is_err());
    let err = factory
        .store_factory()
        .farm_config_store(StoreKind::Memory)
        .expect("store")
        .get(config.id, ConsistencyLevel::Local)
        .await
        .expect_err("deleted");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn session_checks_role_per_farm() {
    let stores = StoreFactory::new();
    let permissions = stores.permission_store(StoreKind::Memory).expect("store");
    let analyst = User::from_email("analyst@example.com");
    permissions
        .save(&Permission {
            user_id: analyst.id,
            organization_id: 1,
            farm_id: 5,
            role_id: roles::ANALYST,
        })
        .await
        .expect("save");

    let session = Session::new(analyst.clone(), 5);
    session.authorize_read(permissions.as_ref()).await.expect("read");
    let err = session
        .authorize_write(permissions.as_ref())
        .await
        .expect_err("analyst cannot write");
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let other_farm = Session::new(analyst, 6);
    let err = other_farm
        .authorize_read(permissions.as_ref())
        .await
        .expect_err("no role");
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workflow_runs_steps_and_resets() {
    let (factory, provisioner, _provisioned, _deprovisioned) = setup();
    let config = provisioner
        .provision(&User::from_email("wf@example.com"), ProvisionParams {
            interval: 0,
            ..ProvisionParams::default()
        })
        .await
        .expect("provision");
    let farm = factory.create_and_run(config.clone()).await.expect("run");
    let nutrient = config.device_by_type("nutrient").expect("nutrient");
    let channel = &nutrient.channels[0];

    let workflows = factory.registry().get_workflow(config.id).expect("workflows");
    let workflow = workflows
        .create(Workflow {
            name: "flush".to_string(),
            steps: vec![WorkflowStep {
                device_id: nutrient.id,
                channel_id: channel.id,
                duration: 1,
                ..WorkflowStep::default()
            }],
            ..Workflow::default()
        })
        .await
        .expect("create");
    assert_ne!(workflow.id, 0);

    let handle = farm.run_workflow(workflow.id).expect("start");
    let err = farm.run_workflow(workflow.id).expect_err("already running");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let finished = tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("finished in time")
        .expect("joined")
        .expect("workflow ok");
    assert!(finished.last_completed.is_some());
    assert!(finished.steps.iter().all(|s| s.state == StepState::Ready));
    assert!(!workflows.is_running(workflow.id));
    assert_eq!(
        workflows.get(workflow.id).expect("saved").last_completed,
        finished.last_completed
    );

    let events = farm
        .event_log()
        .get_page(PageQuery::default(), ConsistencyLevel::Local)
        .await
        .expect("events");
    assert!(events.entities.iter().any(|e| e.event_type == EVENT_TIMER_SWITCH));
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn workflow_with_unknown_channel_is_rejected() {
    let (factory, provisioner, _provisioned, _deprovisioned) = setup();
    let config = provisioner
        .provision(&User::from_email("x@example.com"), ProvisionParams {
            interval: 0,
            ..ProvisionParams::default()
        })
        .await
        .expect("provision");
    let farm = factory.create_and_run(config.clone()).await.expect("run");
    let nutrient = config.device_by_type("nutrient").expect("nutrient");

    let err = factory
        .registry()
        .get_workflow(config.id)
        .expect("workflows")
        .create(Workflow {
            steps: vec![WorkflowStep {
                device_id: nutrient.id,
                channel_id: 1,
                ..WorkflowStep::default()
            }],
            ..Workflow::default()
        })
        .await
        .expect_err("unknown channel");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    farm.stop().await.expect("stop");
}
