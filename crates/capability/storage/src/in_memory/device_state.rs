//! 设备状态内存实现（TTL 淘汰）

use std::time::Duration;

use domain::{ConsistencyLevel, DeviceState};

use crate::error::StorageError;
use crate::traits::DeviceStateStore;
use crate::ttl::TtlMap;

pub struct InMemoryDeviceStateStore {
    states: TtlMap<u64, DeviceState>,
}

impl InMemoryDeviceStateStore {
    pub fn new() -> Self {
        Self {
            states: TtlMap::new(),
        }
    }

    pub fn with_ttl(ttl: Duration, tick: Duration) -> Self {
        Self {
            states: TtlMap::with_ttl("device_state", ttl, tick),
        }
    }
}

impl Default for InMemoryDeviceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DeviceStateStore for InMemoryDeviceStateStore {
    async fn get(
        &self,
        device_id: u64,
        _consistency: ConsistencyLevel,
    ) -> Result<DeviceState, StorageError> {
        self.states
            .get(&device_id)?
            .ok_or_else(|| StorageError::not_found(format!("device state {device_id} not found")))
    }

    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError> {
        let mut state = state.clone();
        state.id = device_id;
        self.states.insert(device_id, state)
    }

    async fn delete(&self, device_id: u64) -> Result<(), StorageError> {
        self.states.remove(&device_id)
    }

    async fn close(&self) {
        self.states.close();
    }
}
