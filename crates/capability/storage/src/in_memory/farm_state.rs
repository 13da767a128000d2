//! 农场状态内存实现（TTL 淘汰）

use std::time::Duration;

use domain::{ConsistencyLevel, FarmState};

use crate::error::StorageError;
use crate::traits::FarmStateStore;
use crate::ttl::TtlMap;

pub struct InMemoryFarmStateStore {
    states: TtlMap<u64, FarmState>,
}

impl InMemoryFarmStateStore {
    pub fn new() -> Self {
        Self {
            states: TtlMap::new(),
        }
    }

    /// 带 TTL 清理任务（需要在 tokio 运行时内调用）。
    pub fn with_ttl(ttl: Duration, tick: Duration) -> Self {
        Self {
            states: TtlMap::with_ttl("farm_state", ttl, tick),
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.states.is_sweeping()
    }
}

impl Default for InMemoryFarmStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FarmStateStore for InMemoryFarmStateStore {
    async fn get(
        &self,
        farm_id: u64,
        _consistency: ConsistencyLevel,
    ) -> Result<FarmState, StorageError> {
        self.states
            .get(&farm_id)?
            .ok_or_else(|| StorageError::not_found(format!("farm state {farm_id} not found")))
    }

    async fn save(&self, state: &FarmState) -> Result<(), StorageError> {
        self.states.insert(state.farm_id, state.clone())
    }

    async fn delete(&self, farm_id: u64) -> Result<(), StorageError> {
        self.states.remove(&farm_id)
    }

    async fn close(&self) {
        self.states.close();
    }
}
