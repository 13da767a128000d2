//! 复制状态机存储
//!
//! 每个逻辑集合对应一个复制组：写入提交给 leader，`local` 读直接查本地副本，
//! `quorum` 读先经 read-index。follower 上的写入返回 `NotLeader`。
//! 本节点尚未加入的组在首次访问时加入并等待就绪。

use std::sync::Arc;
use std::time::Duration;

use crop_cluster::{KvClient, Replicator};

use crate::error::StorageError;

mod device_data;
mod device_state;
mod event_log;
mod farm_config;
mod farm_state;
mod permission;

pub use device_data::ReplicatedDeviceDataStore;
pub use device_state::ReplicatedDeviceStateStore;
pub use event_log::ReplicatedEventLogStore;
pub use farm_config::ReplicatedFarmConfigStore;
pub use farm_state::ReplicatedFarmStateStore;
pub use permission::ReplicatedPermissionStore;

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// 复制存储共用的连接参数。
#[derive(Clone)]
pub struct ReplicatedBackend {
    replicator: Arc<dyn Replicator>,
    durable: bool,
    ready_timeout: Duration,
}

impl ReplicatedBackend {
    /// `durable` 对应 replicated-disk：日志落盘并在加入时回放。
    pub fn new(replicator: Arc<dyn Replicator>, durable: bool) -> Self {
        Self {
            replicator,
            durable,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn replicator(&self) -> Arc<dyn Replicator> {
        self.replicator.clone()
    }

    pub(crate) async fn group(&self, group_id: u64) -> Result<KvClient, StorageError> {
        let client = KvClient::new(self.replicator.clone(), group_id);
        if !self.replicator.has_group(group_id) {
            client.ensure_group(self.durable, self.ready_timeout).await?;
        }
        Ok(client)
    }
}

/// 有序键：定宽十进制，保证字典序与数值序一致。
pub(crate) fn ordered(id: u64) -> String {
    format!("{id:020}")
}
