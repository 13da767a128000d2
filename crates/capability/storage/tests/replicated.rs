use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crop_cluster::{ClusterParams, LocalReplicator, ReplicationHub, Replicator, groups};
use crop_storage::{
    DeviceDataStore, DeviceStateStore, EventLogStore, FarmConfigStore, FarmStateStore, PageQuery,
    PermissionStore, ReplicatedBackend, ReplicatedDeviceDataStore, ReplicatedDeviceStateStore,
    ReplicatedEventLogStore, ReplicatedFarmConfigStore, ReplicatedFarmStateStore,
    ReplicatedPermissionStore,
};
use domain::{
    ConsistencyLevel, DeviceState, ErrorKind, EventLogEntry, FarmConfig, FarmState, Permission,
    roles,
};

fn backend() -> ReplicatedBackend {
    let node: Arc<dyn Replicator> = LocalReplicator::single_node(1, None);
    ReplicatedBackend::new(node, false).with_ready_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn farm_config_is_listed_through_directory_group() {
    let backend = backend();
    let store = ReplicatedFarmConfigStore::new(backend.clone());
    for id in [12, 11] {
        let farm = FarmConfig {
            id,
            name: format!("farm-{id}"),
            ..FarmConfig::default()
        };
        store.save(&farm).await.expect("save");
    }
    assert!(backend.replicator().has_group(groups::farm_config(11)));
    assert!(backend.replicator().has_group(groups::farm_directory()));

    let page = store
        .get_page(PageQuery::default(), ConsistencyLevel::Quorum)
        .await
        .expect("page");
    assert_eq!(
        page.entities.iter().map(|f| f.id).collect::<Vec<_>>(),
        vec![11, 12]
    );

    store.delete(11).await.expect("delete");
    let err = store
        .get(11, ConsistencyLevel::Local)
        .await
        .expect_err("deleted");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn state_groups_hold_latest_snapshot() {
    let backend = backend();
    let farm_states = ReplicatedFarmStateStore::new(backend.clone());
    let mut state = FarmState::new(3);
    state.set_channel_value("climate", 1, 1);
    farm_states.save(&state).await.expect("save");
    assert_eq!(
        farm_states
            .get(3, ConsistencyLevel::Quorum)
            .await
            .expect("get"),
        state
    );

    let device_states = ReplicatedDeviceStateStore::new(backend);
    let mut device = DeviceState::default();
    device.set_metric("temp", 71.5);
    device_states.save(30, &device).await.expect("save");
    let loaded = device_states
        .get(30, ConsistencyLevel::Local)
        .await
        .expect("get");
    assert_eq!(loaded.id, 30);
    assert_eq!(loaded.metric("temp"), Some(71.5));
}

#[tokio::test]
async fn device_data_and_event_log_share_replicator() {
    let backend = backend();
    let data = ReplicatedDeviceDataStore::new(backend.clone());
    let mut sample = DeviceState::default();
    sample.set_metric("ph", 6.1);
    data.save(8, &sample).await.expect("save");
    assert_eq!(data.get_last_30_days(8, "ph").await.expect("history"), vec![6.1]);
    data.delete(8).await.expect("delete");
    assert!(data.get_last_30_days(8, "ph").await.expect("history").is_empty());

    let events = ReplicatedEventLogStore::new(backend.clone());
    let created = events
        .create(EventLogEntry {
            id: 0,
            farm_id: 4,
            device_id: 8,
            device_name: "nutrient".to_string(),
            event_type: "switch".to_string(),
            message: "channel 1 on".to_string(),
            timestamp: Utc::now(),
        })
        .await
        .expect("create");
    assert_ne!(created.id, 0);
    let page = events
        .get_page(4, PageQuery::default(), ConsistencyLevel::Quorum)
        .await
        .expect("page");
    assert_eq!(page.entities, vec![created]);

    let permissions = ReplicatedPermissionStore::new(backend);
    let permission = Permission {
        user_id: 2,
        organization_id: 1,
        farm_id: 4,
        role_id: roles::ADMIN,
    };
    permissions.save(&permission).await.expect("save");
    assert_eq!(
        permissions.list_by_farm(4).await.expect("list"),
        vec![permission]
    );
    assert_eq!(permissions.list_by_user(2).await.expect("list").len(), 1);
}

#[tokio::test]
async fn follower_writes_surface_not_leader() {
    let hub = ReplicationHub::new();
    let one = LocalReplicator::start_node(ClusterParams::new(1, vec![1, 2], None), hub.clone());
    let two = LocalReplicator::start_node(ClusterParams::new(2, vec![1, 2], None), hub.clone());
    let ready = Duration::from_secs(2);

    let group = groups::farm_state(5);
    let first = ReplicatedFarmStateStore::new(
        ReplicatedBackend::new(one.clone(), false).with_ready_timeout(Duration::from_millis(50)),
    );
    let second =
        ReplicatedFarmStateStore::new(ReplicatedBackend::new(two.clone(), false).with_ready_timeout(ready));

    // 单节点尚未达到多数派
    assert!(first.save(&FarmState::new(5)).await.is_err());
    second.save(&FarmState::new(5)).await.ok();
    one.wait_for_ready(group, ready).await.expect("ready");

    let follower = if one.is_leader(group) { &second } else { &first };
    let err = follower
        .save(&FarmState::new(5))
        .await
        .expect_err("follower write");
    assert!(err.is_not_leader());
    assert_eq!(err.kind(), ErrorKind::NotLeader);
}
