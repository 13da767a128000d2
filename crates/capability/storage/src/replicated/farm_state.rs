use domain::{ConsistencyLevel, FarmState};

use super::ReplicatedBackend;
use crate::error::StorageError;
use crate::traits::FarmStateStore;
use crop_cluster::groups;

const STATE_KEY: &str = "state";

pub struct ReplicatedFarmStateStore {
    backend: ReplicatedBackend,
}

impl ReplicatedFarmStateStore {
    pub fn new(backend: ReplicatedBackend) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl FarmStateStore for ReplicatedFarmStateStore {
    async fn get(
        &self,
        farm_id: u64,
        consistency: ConsistencyLevel,
    ) -> Result<FarmState, StorageError> {
        let group = self.backend.group(groups::farm_state(farm_id)).await?;
        group
            .get::<FarmState>(STATE_KEY, consistency)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("farm state {farm_id} not found")))
    }

    async fn save(&self, state: &FarmState) -> Result<(), StorageError> {
        let group = self.backend.group(groups::farm_state(state.farm_id)).await?;
        group.put(STATE_KEY, state).await?;
        Ok(())
    }

    async fn delete(&self, farm_id: u64) -> Result<(), StorageError> {
        let group = self.backend.group(groups::farm_state(farm_id)).await?;
        group.delete(STATE_KEY).await?;
        Ok(())
    }
}
