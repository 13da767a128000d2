use std::sync::Arc;
use std::time::Duration;

use crop_cluster::{ClusterError, ClusterParams, KvClient, LocalReplicator, ReplicationHub, Replicator, kv_factory};
use domain::ConsistencyLevel;

const READY: Duration = Duration::from_secs(2);

#[tokio::test]
async fn single_node_is_leader_and_serves_reads() {
    let node = LocalReplicator::single_node(1, None);
    let client = KvClient::new(node.clone(), 42);
    client.ensure_group(false, READY).await.expect("ready");
    assert!(node.is_leader(42));

    client.put("farm:1", &"greenhouse").await.expect("put");
    let value: Option<String> = client
        .get("farm:1", ConsistencyLevel::Quorum)
        .await
        .expect("get");
    assert_eq!(value.as_deref(), Some("greenhouse"));
}

#[tokio::test]
async fn follower_rejects_writes_and_catches_up_on_quorum_read() {
    let hub = ReplicationHub::new();
    let one = LocalReplicator::start_node(ClusterParams::new(1, vec![1, 2], None), hub.clone());
    let two = LocalReplicator::start_node(ClusterParams::new(2, vec![1, 2], None), hub.clone());

    one.add_group(7, kv_factory(), false).await.expect("add one");
    assert!(one.wait_for_ready(7, Duration::from_millis(60)).await.is_err());
    two.add_group(7, kv_factory(), false).await.expect("add two");
    one.wait_for_ready(7, READY).await.expect("ready");

    let (leader, follower): (Arc<LocalReplicator>, Arc<LocalReplicator>) = if one.is_leader(7) {
        (one.clone(), two.clone())
    } else {
        (two.clone(), one.clone())
    };
    assert!(!follower.is_leader(7));

    let follower_client = KvClient::new(follower.clone(), 7);
    let err = follower_client.put("k", &1).await.expect_err("not leader");
    assert!(err.is_not_leader());

    KvClient::new(leader.clone(), 7)
        .put("k", &5)
        .await
        .expect("leader put");

    let stale: Option<i64> = follower_client
        .get("k", ConsistencyLevel::Local)
        .await
        .expect("local read");
    assert_eq!(stale, None);
    let fresh: Option<i64> = follower_client
        .get("k", ConsistencyLevel::Quorum)
        .await
        .expect("quorum read");
    assert_eq!(fresh, Some(5));
}

#[tokio::test]
async fn leadership_can_be_transferred() {
    let hub = ReplicationHub::new();
    let one = LocalReplicator::start_node(ClusterParams::new(1, vec![1, 2, 3], None), hub.clone());
    let two = LocalReplicator::start_node(ClusterParams::new(2, vec![1, 2, 3], None), hub.clone());
    one.add_group(9, kv_factory(), false).await.expect("add");
    two.add_group(9, kv_factory(), false).await.expect("add");

    hub.transfer_leader(9, 2).expect("transfer");
    assert!(two.is_leader(9));
    assert!(!one.is_leader(9));

    let err = hub.transfer_leader(9, 3).expect_err("not a member");
    assert!(matches!(err, ClusterError::NotReady(9)));
}

#[tokio::test]
async fn durable_log_is_replayed_on_add_group() {
    let dir = std::env::temp_dir().join(format!("crop-cluster-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let first = LocalReplicator::single_node(1, Some(dir.clone()));
    let client = KvClient::new(first.clone(), 11);
    client.ensure_group(true, READY).await.expect("ready");
    client.put("a", &1).await.expect("put");
    client.put("b", &2).await.expect("put");
    client.delete("a").await.expect("delete");

    // 新进程（新 hub）回放同一目录下的日志。
    let second = LocalReplicator::single_node(1, Some(dir.clone()));
    let replayed = KvClient::new(second.clone(), 11);
    replayed.ensure_group(true, READY).await.expect("ready");
    let items: Vec<(String, i64)> = replayed
        .scan("", ConsistencyLevel::Local)
        .await
        .expect("scan");
    assert_eq!(items, vec![("b".to_string(), 2)]);

    let _ = std::fs::remove_dir_all(&dir);
}
