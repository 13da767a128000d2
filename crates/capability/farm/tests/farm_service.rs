use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use crop_cluster::{ClusterParams, LocalReplicator, ReplicationHub, Replicator, kv_factory};
use crop_farm::{
    EVENT_SWITCH, FarmError, FarmFactory, FarmService, FarmSubscriptions, ServiceRegistry,
};
use crop_rules::FixedClock;
use crop_storage::{PageQuery, StoreFactory};
use domain::{
    Channel, Comparator, Condition, ConsistencyLevel, DeviceConfig, DeviceState,
    DeviceStateChange, DeviceStateDelta, ErrorKind, FarmConfig, FarmMode, Metric,
    SERVER_DEVICE_TYPE, StoreKind,
};

const NUTRIENT_ID: u64 = 11;

fn nutrient(farm_id: u64, uri: &str) -> DeviceConfig {
    DeviceConfig {
        id: NUTRIENT_ID,
        farm_id,
        device_type: "nutrient".to_string(),
        uri: uri.to_string(),
        enabled: true,
        metrics: vec![
            Metric {
                id: 101,
                device_id: NUTRIENT_ID,
                key: "ph".to_string(),
                enabled: true,
                ..Metric::default()
            },
            Metric {
                id: 102,
                device_id: NUTRIENT_ID,
                key: "ec".to_string(),
                enabled: true,
                ..Metric::default()
            },
        ],
        channels: (0..3)
            .map(|board_id| Channel {
                id: 200 + board_id as u64,
                device_id: NUTRIENT_ID,
                board_id,
                enabled: true,
                ..Channel::default()
            })
            .collect(),
        ..DeviceConfig::default()
    }
}

fn farm_config(farm_id: u64) -> FarmConfig {
    FarmConfig {
        id: farm_id,
        organization_id: 1,
        name: "greenhouse".to_string(),
        mode: FarmMode::Virtual,
        timezone: "UTC".to_string(),
        devices: vec![
            DeviceConfig {
                id: 10,
                farm_id,
                device_type: SERVER_DEVICE_TYPE.to_string(),
                enabled: true,
                ..DeviceConfig::default()
            },
            nutrient(farm_id, "virtual://nutrient"),
        ],
        ..FarmConfig::default()
    }
}

fn factory(stores: StoreFactory) -> FarmFactory {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap());
    FarmFactory::new(Arc::new(stores), ServiceRegistry::new()).with_clock(Arc::new(clock))
}

async fn start(factory: &FarmFactory, config: FarmConfig) -> (Arc<FarmService>, FarmSubscriptions) {
    factory
        .store_factory()
        .farm_config_store(config.stores.config)
        .expect("config store")
        .save(&config)
        .await
        .expect("save config");
    let (farm, subscriptions) = factory.build_service(config).expect("build");
    farm.initialize_state(false).await.expect("init");
    farm.run().expect("run");
    (farm, subscriptions)
}

async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn initialize_state_zeroes_every_active_device() {
    let factory = factory(StoreFactory::new());
    let (farm, _subscriptions) = factory.build_service(farm_config(1)).expect("build");
    farm.initialize_state(true).await.expect("init");

    let state = farm.state().expect("state");
    assert!(state.device(SERVER_DEVICE_TYPE).is_none());
    let nutrient = state.device("nutrient").expect("nutrient state");
    assert_eq!(nutrient.metric("ph"), Some(0.0));
    assert_eq!(nutrient.metric("ec"), Some(0.0));
    assert_eq!(nutrient.channels, vec![0, 0, 0]);
    assert_eq!(farm.devices().expect("devices").len(), 1);

    let persisted = farm
        .stores()
        .farm_state
        .get(1, ConsistencyLevel::Local)
        .await
        .expect("persisted");
    assert_eq!(persisted, state);
}

#[tokio::test]
async fn identical_state_publishes_no_delta() {
    let factory = factory(StoreFactory::new());
    let (farm, mut subscriptions) = factory.build_service(farm_config(2)).expect("build");
    farm.initialize_state(false).await.expect("init");
    let current = farm
        .state()
        .expect("state")
        .device("nutrient")
        .cloned()
        .expect("nutrient");

    farm.on_device_state_change(DeviceStateChange {
        device_id: NUTRIENT_ID,
        device_type: "nutrient".to_string(),
        state: current.clone(),
        is_poll_event: false,
    })
    .await
    .expect("apply");
    assert!(subscriptions.device_state_delta.try_recv().is_err());

    let mut changed = current;
    changed.set_metric("ph", 6.2);
    farm.on_device_state_change(DeviceStateChange {
        device_id: NUTRIENT_ID,
        device_type: "nutrient".to_string(),
        state: changed,
        is_poll_event: false,
    })
    .await
    .expect("apply");
    let event = subscriptions.device_state_delta.try_recv().expect("delta");
    assert_eq!(event.delta, DeviceStateDelta::metric("ph", 6.2));
}

#[tokio::test]
async fn shrinking_device_state_publishes_delta() {
    let factory = factory(StoreFactory::new());
    let (farm, mut subscriptions) = factory.build_service(farm_config(16)).expect("build");
    farm.initialize_state(false).await.expect("init");

    let mut state = DeviceState {
        id: NUTRIENT_ID,
        channels: vec![0, 0],
        ..DeviceState::default()
    };
    state.set_metric("ph", 0.0);
    farm.on_device_state_change(DeviceStateChange {
        device_id: NUTRIENT_ID,
        device_type: "nutrient".to_string(),
        state: state.clone(),
        is_poll_event: false,
    })
    .await
    .expect("apply");

    let event = subscriptions.device_state_delta.try_recv().expect("delta");
    assert!(event.delta.removed_metrics.contains("ec"));
    assert_eq!(event.delta.channel_count, Some(2));
    assert_eq!(
        farm.state().expect("state").device("nutrient"),
        Some(&state)
    );
}

#[tokio::test]
async fn follower_publishes_delta_but_skips_writes() {
    let hub = ReplicationHub::new();
    let one = LocalReplicator::start_node(ClusterParams::new(1, vec![1, 2], None), hub.clone());
    let two = LocalReplicator::start_node(ClusterParams::new(2, vec![1, 2], None), hub.clone());
    one.add_group(7, kv_factory(), false).await.expect("join one");
    two.add_group(7, kv_factory(), false).await.expect("join two");
    hub.transfer_leader(7, 1).expect("transfer");
    assert!(!two.is_leader(7));

    let factory = factory(StoreFactory::new().with_replicator(two.clone()));
    let mut config = farm_config(7);
    config.mode = FarmMode::Cluster;
    let (farm, mut subscriptions) = factory.build_service(config).expect("build");
    assert!(!farm.is_leader());

    let mut state = DeviceState {
        id: NUTRIENT_ID,
        channels: vec![0, 1, 0],
        ..DeviceState::default()
    };
    state.set_metric("ph", 6.4);
    farm.on_device_state_change(DeviceStateChange {
        device_id: NUTRIENT_ID,
        device_type: "nutrient".to_string(),
        state,
        is_poll_event: true,
    })
    .await
    .expect("ignored");

    assert!(subscriptions.device_state_delta.try_recv().is_ok());
    assert!(farm.state().expect("state").device("nutrient").is_none());
    let history = farm
        .stores()
        .device_data
        .get_last_30_days(NUTRIENT_ID, "ph")
        .await
        .expect("history");
    assert!(history.is_empty());
}

#[tokio::test]
async fn switch_updates_state_logs_and_notifies() {
    let factory = factory(StoreFactory::new());
    let mut config = farm_config(3);
    config.devices[1].channels[1].notify = true;
    let (farm, mut subscriptions) = start(&factory, config).await;
    let device = farm.device("nutrient").expect("device");

    device.switch(1, 1, "manual on").await.expect("switch");

    let event = tokio::time::timeout(Duration::from_secs(5), subscriptions.device_state_delta.recv())
        .await
        .expect("delta in time")
        .expect("delta");
    assert_eq!(event.device_type, "nutrient");
    assert_eq!(event.delta, DeviceStateDelta::channel(1, 1));
    assert_eq!(farm.state().expect("state").channel_value("nutrient", 1), Some(1));

    let notification = subscriptions.farm_notify.try_recv().expect("notification");
    assert_eq!(notification.event_type, EVENT_SWITCH);
    assert_eq!(notification.message, "manual on");
    assert_eq!(notification.timestamp, Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap());

    let page = farm
        .event_log()
        .get_page(PageQuery::default(), ConsistencyLevel::Local)
        .await
        .expect("events");
    assert_eq!(page.entities.len(), 1);
    assert_eq!(page.entities[0].device_id, NUTRIENT_ID);

    let err = device.switch(9, 1, "missing").await.expect_err("no channel");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn poll_runs_rules_for_matching_condition() {
    let factory = factory(StoreFactory::new());
    let mut config = farm_config(4);
    config.devices[1].channels[2].conditions = vec![Condition {
        id: 300,
        channel_id: 202,
        metric_id: 101,
        comparator: Comparator::Gt,
        threshold: 6.0,
    }];
    let (farm, _subscriptions) = start(&factory, config).await;
    let device = farm.device("nutrient").expect("device");

    device.set_metric_value("ph", 6.3).await.expect("metric");
    farm.poll().await.expect("poll");

    let watched = farm.clone();
    eventually(move || {
        watched
            .state()
            .map(|s| s.channel_value("nutrient", 2) == Some(1))
            .unwrap_or(false)
    })
    .await;
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn maintenance_mode_skips_rules() {
    let factory = factory(StoreFactory::new());
    let mut config = farm_config(5);
    config.mode = FarmMode::Maintenance;
    config.devices[1].channels[0].conditions = vec![Condition {
        id: 301,
        channel_id: 200,
        metric_id: 101,
        comparator: Comparator::Ge,
        threshold: 0.0,
    }];
    let device = config.devices[1].clone();
    let (farm, _subscriptions) = factory.build_service(config).expect("build");
    farm.initialize_state(false).await.expect("init");

    let report = farm
        .manage(&device, &farm.state().expect("state"))
        .await
        .expect("manage");
    assert!(report.outcomes.is_empty());
}

#[tokio::test]
async fn config_value_flows_through_config_watcher() {
    let factory = factory(StoreFactory::new());
    let (farm, mut subscriptions) = start(&factory, farm_config(6)).await;

    farm.set_config_value(NUTRIENT_ID, "nutrient.gallons", "10")
        .await
        .expect("set value");

    let published = tokio::time::timeout(Duration::from_secs(5), subscriptions.farm_config.recv())
        .await
        .expect("config in time")
        .expect("config");
    let device = published.device_by_id(NUTRIENT_ID).expect("device");
    assert_eq!(device.int_setting("gallons"), Some(10));
    assert_eq!(
        farm.device("nutrient")
            .expect("device")
            .config()
            .expect("config")
            .setting("nutrient.gallons"),
        Some("10")
    );
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn mode_change_swaps_transport() {
    let factory = factory(StoreFactory::new());
    let mut config = farm_config(8);
    config.mode = FarmMode::Standalone;
    config.devices[1].uri = "http://127.0.0.1:9".to_string();
    let (farm, mut subscriptions) = start(&factory, config.clone()).await;
    let device = farm.device("nutrient").expect("device");
    assert!(!device.is_virtual());

    config.mode = FarmMode::Virtual;
    farm.set_config(config).await.expect("set config");
    tokio::time::timeout(Duration::from_secs(5), subscriptions.farm_config.recv())
        .await
        .expect("config in time")
        .expect("config");

    assert!(device.is_virtual());
    assert_eq!(farm.mode(), FarmMode::Virtual);
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn set_switch_value_publishes_minimal_delta() {
    let factory = factory(StoreFactory::new());
    let (farm, mut subscriptions) = factory.build_service(farm_config(9)).expect("build");
    farm.initialize_state(true).await.expect("init");

    farm.set_switch_value("nutrient", 201, 1).await.expect("switch value");
    let event = subscriptions.device_state_delta.try_recv().expect("delta");
    assert_eq!(event.delta, DeviceStateDelta::channel(1, 1));

    farm.set_metric_value("nutrient", "ec", 1.4).await.expect("metric value");
    let event = subscriptions.device_state_delta.try_recv().expect("delta");
    assert_eq!(event.delta, DeviceStateDelta::metric("ec", 1.4));

    let persisted = farm
        .stores()
        .farm_state
        .get(9, ConsistencyLevel::Local)
        .await
        .expect("persisted");
    assert_eq!(persisted.channel_value("nutrient", 1), Some(1));
    assert_eq!(persisted.metric_value("nutrient", "ec"), Some(1.4));

    let err = farm
        .set_switch_value("nutrient", 999, 1)
        .await
        .expect_err("unknown channel");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn run_is_idempotent_and_stop_deregisters() {
    let factory = factory(StoreFactory::new());
    let registry = factory.registry();
    let (farm, _subscriptions) = start(&factory, farm_config(12)).await;
    farm.run().expect("second run is a no-op");
    assert!(farm.is_running());

    farm.stop().await.expect("stop");
    assert!(!farm.is_running());
    assert!(matches!(registry.get_farm(12), Err(FarmError::NotFound(_))));
    assert!(registry.devices(12).expect("devices").is_empty());
    let err = farm.run().expect_err("stopped farm");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let factory = factory(StoreFactory::new());
    let _first = factory.build_service(farm_config(13)).expect("build");
    let err = factory
        .build_service(farm_config(13))
        .map(|_| ())
        .expect_err("duplicate");
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let registry = factory.registry();
    registry.remove_farm_services(13).expect("remove");
    registry.remove_farm_services(13).expect("remove again");
}

#[tokio::test]
async fn relational_farm_without_pool_fails_to_build() {
    let factory = factory(StoreFactory::new());
    let mut config = farm_config(14);
    config.stores.config = StoreKind::Relational;
    let err = factory.build_service(config).map(|_| ()).expect_err("no pool");
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(factory.registry().get_farm(14).is_err());
}

#[tokio::test]
async fn switch_succeeds_when_state_change_queue_is_full() {
    let factory = factory(StoreFactory::new()).with_channel_capacity(1);
    let mut config = farm_config(17);
    config.devices[1].channels[2].backoff = 10;
    config.devices[1].channels[2].conditions = vec![Condition {
        id: 302,
        channel_id: 202,
        metric_id: 101,
        comparator: Comparator::Gt,
        threshold: 6.0,
    }];
    let device_config = config.devices[1].clone();
    let (farm, mut subscriptions) = factory.build_service(config).expect("build");
    farm.initialize_state(false).await.expect("init");
    let device = farm.device("nutrient").expect("device");

    device.switch(0, 1, "fills queue").await.expect("first switch");
    device.switch(1, 1, "queue full").await.expect("switch with full queue");
    let stored = farm
        .stores()
        .device_state
        .get(NUTRIENT_ID, ConsistencyLevel::Local)
        .await
        .expect("stored");
    assert_eq!(stored.channel(1), Some(1));
    let reported = subscriptions.farm_error.try_recv().expect("dropped publication reported");
    assert_eq!(reported.kind, ErrorKind::BufferFull);

    farm.set_metric_value("nutrient", "ph", 6.3).await.expect("ph");
    let report = farm
        .manage(&device_config, &farm.state().expect("state"))
        .await
        .expect("manage");
    assert!(report.errors.is_empty());
    assert!(farm.backoff().expect("backoff").last_fired(202).is_some());
}

#[tokio::test]
async fn config_mutations_round_trip_through_store() {
    let factory = factory(StoreFactory::new());
    let (farm, _subscriptions) = start(&factory, farm_config(18)).await;

    let mut expected = farm.config().expect("config");
    expected.name = "glasshouse".to_string();
    expected.timezone = "Europe/Paris".to_string();
    expected.interval = 120;
    farm.set_config(expected.clone()).await.expect("set config");

    let mut device = expected.devices[1].clone();
    device.channels[0].name = "doser".to_string();
    device.channels[0].duration = 45;
    farm.set_device_config(device.clone()).await.expect("set device");
    expected.set_device(device);

    farm.set_config_value(NUTRIENT_ID, "nutrient.gallons", "12")
        .await
        .expect("set value");
    expected.devices[1]
        .settings
        .insert("nutrient.gallons".to_string(), "12".to_string());

    let stored = farm.load_config().await.expect("load");
    assert_eq!(stored, farm.config().expect("config"));
    assert_eq!(stored, expected);
    farm.stop().await.expect("stop");
}
