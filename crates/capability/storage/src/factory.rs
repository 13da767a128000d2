//! 存储工厂：按 [`StoreKind`] 构建具体存储。
//!
//! 配置、时序、事件日志与权限的内存实现在进程内共享；内存状态存储每次新建，
//! 由农场独占并在 `Stop` 时关闭。请求一个未配置的后端返回 `InvalidInput`。

use std::sync::Arc;
use std::time::Duration;

use crop_cluster::Replicator;
use domain::StoreKind;
use sqlx::PgPool;

use crate::error::StorageError;
use crate::in_memory::{
    InMemoryDeviceDataStore, InMemoryDeviceStateStore, InMemoryEventLogStore,
    InMemoryFarmConfigStore, InMemoryFarmStateStore, InMemoryPermissionStore,
};
use crate::postgres::{
    PgDeviceDataStore, PgDeviceStateStore, PgEventLogStore, PgFarmConfigStore, PgFarmStateStore,
    PgPermissionStore,
};
use crate::redis::RedisTsDeviceDataStore;
use crate::replicated::{
    ReplicatedBackend, ReplicatedDeviceDataStore, ReplicatedDeviceStateStore,
    ReplicatedEventLogStore, ReplicatedFarmConfigStore, ReplicatedFarmStateStore,
    ReplicatedPermissionStore,
};
use crate::traits::{
    DeviceDataStore, DeviceStateStore, EventLogStore, FarmConfigStore, FarmStateStore,
    PermissionStore,
};

pub struct StoreFactory {
    pool: Option<PgPool>,
    redis: Option<redis::Client>,
    replicator: Option<Arc<dyn Replicator>>,
    state_ttl: Duration,
    state_tick: Duration,
    memory_config: Arc<InMemoryFarmConfigStore>,
    memory_data: Arc<InMemoryDeviceDataStore>,
    memory_events: Arc<InMemoryEventLogStore>,
    memory_permissions: Arc<InMemoryPermissionStore>,
}

impl Default for StoreFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreFactory {
    pub fn new() -> Self {
        Self {
            pool: None,
            redis: None,
            replicator: None,
            state_ttl: Duration::ZERO,
            state_tick: Duration::from_secs(60),
            memory_config: Arc::new(InMemoryFarmConfigStore::new()),
            memory_data: Arc::new(InMemoryDeviceDataStore::new()),
            memory_events: Arc::new(InMemoryEventLogStore::new()),
            memory_permissions: Arc::new(InMemoryPermissionStore::new()),
        }
    }

    pub fn with_postgres(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_redis(mut self, client: redis::Client) -> Self {
        self.redis = Some(client);
        self
    }

    pub fn with_replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    /// 内存状态存储的 TTL 与清理周期；`ttl` 为零表示永不过期。
    pub fn with_state_ttl(mut self, ttl: Duration, tick: Duration) -> Self {
        self.state_ttl = ttl;
        self.state_tick = tick;
        self
    }

    pub fn replicator(&self) -> Option<Arc<dyn Replicator>> {
        self.replicator.clone()
    }

    pub fn farm_config_store(&self, kind: StoreKind) -> Result<Arc<dyn FarmConfigStore>, StorageError> {
        Ok(match kind {
            StoreKind::Memory => self.memory_config.clone(),
            StoreKind::Relational => Arc::new(PgFarmConfigStore::new(self.pool(kind)?)),
            StoreKind::ReplicatedMemory | StoreKind::ReplicatedDisk => {
                Arc::new(ReplicatedFarmConfigStore::new(self.backend(kind)?))
            }
            StoreKind::RedisTs => return Err(unsupported(kind, "farm config")),
        })
    }

    pub fn farm_state_store(&self, kind: StoreKind) -> Result<Arc<dyn FarmStateStore>, StorageError> {
        Ok(match kind {
            StoreKind::Memory => Arc::new(if self.state_ttl.is_zero() {
                InMemoryFarmStateStore::new()
            } else {
                InMemoryFarmStateStore::with_ttl(self.state_ttl, self.state_tick)
            }),
            StoreKind::Relational => Arc::new(PgFarmStateStore::new(self.pool(kind)?)),
            StoreKind::ReplicatedMemory | StoreKind::ReplicatedDisk => {
                Arc::new(ReplicatedFarmStateStore::new(self.backend(kind)?))
            }
            StoreKind::RedisTs => return Err(unsupported(kind, "farm state")),
        })
    }

    pub fn device_state_store(
        &self,
        kind: StoreKind,
    ) -> Result<Arc<dyn DeviceStateStore>, StorageError> {
        Ok(match kind {
            StoreKind::Memory => Arc::new(if self.state_ttl.is_zero() {
                InMemoryDeviceStateStore::new()
            } else {
                InMemoryDeviceStateStore::with_ttl(self.state_ttl, self.state_tick)
            }),
            StoreKind::Relational => Arc::new(PgDeviceStateStore::new(self.pool(kind)?)),
            StoreKind::ReplicatedMemory | StoreKind::ReplicatedDisk => {
                Arc::new(ReplicatedDeviceStateStore::new(self.backend(kind)?))
            }
            StoreKind::RedisTs => return Err(unsupported(kind, "device state")),
        })
    }

    pub fn device_data_store(&self, kind: StoreKind) -> Result<Arc<dyn DeviceDataStore>, StorageError> {
        Ok(match kind {
            StoreKind::Memory => self.memory_data.clone(),
            StoreKind::Relational => Arc::new(PgDeviceDataStore::new(self.pool(kind)?)),
            StoreKind::ReplicatedMemory | StoreKind::ReplicatedDisk => {
                Arc::new(ReplicatedDeviceDataStore::new(self.backend(kind)?))
            }
            StoreKind::RedisTs => {
                let client = self.redis.clone().ok_or_else(|| missing(kind, "redis client"))?;
                Arc::new(RedisTsDeviceDataStore::new(client))
            }
        })
    }

    /// 事件日志跟随配置存储的后端。
    pub fn event_log_store(&self, kind: StoreKind) -> Result<Arc<dyn EventLogStore>, StorageError> {
        Ok(match kind {
            StoreKind::Memory => self.memory_events.clone(),
            StoreKind::Relational => Arc::new(PgEventLogStore::new(self.pool(kind)?)),
            StoreKind::ReplicatedMemory | StoreKind::ReplicatedDisk => {
                Arc::new(ReplicatedEventLogStore::new(self.backend(kind)?))
            }
            StoreKind::RedisTs => return Err(unsupported(kind, "event log")),
        })
    }

    pub fn permission_store(&self, kind: StoreKind) -> Result<Arc<dyn PermissionStore>, StorageError> {
        Ok(match kind {
            StoreKind::Memory => self.memory_permissions.clone(),
            StoreKind::Relational => Arc::new(PgPermissionStore::new(self.pool(kind)?)),
            StoreKind::ReplicatedMemory | StoreKind::ReplicatedDisk => {
                Arc::new(ReplicatedPermissionStore::new(self.backend(kind)?))
            }
            StoreKind::RedisTs => return Err(unsupported(kind, "permission")),
        })
    }

    fn pool(&self, kind: StoreKind) -> Result<PgPool, StorageError> {
        self.pool.clone().ok_or_else(|| missing(kind, "database pool"))
    }

    fn backend(&self, kind: StoreKind) -> Result<ReplicatedBackend, StorageError> {
        let replicator = self
            .replicator
            .clone()
            .ok_or_else(|| missing(kind, "replicator"))?;
        Ok(ReplicatedBackend::new(replicator, kind == StoreKind::ReplicatedDisk))
    }
}

fn missing(kind: StoreKind, what: &str) -> StorageError {
    StorageError::invalid(format!("store kind {} requires a {what}", kind.as_str()))
}

fn unsupported(kind: StoreKind, collection: &str) -> StorageError {
    StorageError::invalid(format!(
        "store kind {} does not support {collection}",
        kind.as_str()
    ))
}
