use domain::{ConsistencyLevel, DeviceState};

use super::ReplicatedBackend;
use crate::error::StorageError;
use crate::traits::DeviceStateStore;
use crop_cluster::groups;

const STATE_KEY: &str = "state";

pub struct ReplicatedDeviceStateStore {
    backend: ReplicatedBackend,
}

impl ReplicatedDeviceStateStore {
    pub fn new(backend: ReplicatedBackend) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl DeviceStateStore for ReplicatedDeviceStateStore {
    async fn get(
        &self,
        device_id: u64,
        consistency: ConsistencyLevel,
    ) -> Result<DeviceState, StorageError> {
        let group = self.backend.group(groups::device_state(device_id)).await?;
        group
            .get::<DeviceState>(STATE_KEY, consistency)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("device state {device_id} not found")))
    }

    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError> {
        let mut state = state.clone();
        state.id = device_id;
        let group = self.backend.group(groups::device_state(device_id)).await?;
        group.put(STATE_KEY, &state).await?;
        Ok(())
    }

    async fn delete(&self, device_id: u64) -> Result<(), StorageError> {
        let group = self.backend.group(groups::device_state(device_id)).await?;
        group.delete(STATE_KEY).await?;
        Ok(())
    }
}
