use domain::{ConsistencyLevel, DeviceConfig, FarmConfig};

use super::{ReplicatedBackend, ordered};
use crate::error::StorageError;
use crate::pager::{Page, PageQuery, paginate};
use crate::traits::FarmConfigStore;
use crop_cluster::groups;

const CONFIG_KEY: &str = "config";

/// 农场配置：每个农场一个复制组（组 ID 即农场 ID），另有全局目录组记录农场列表。
pub struct ReplicatedFarmConfigStore {
    backend: ReplicatedBackend,
}

impl ReplicatedFarmConfigStore {
    pub fn new(backend: ReplicatedBackend) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl FarmConfigStore for ReplicatedFarmConfigStore {
    async fn get(
        &self,
        farm_id: u64,
        consistency: ConsistencyLevel,
    ) -> Result<FarmConfig, StorageError> {
        let group = self.backend.group(groups::farm_config(farm_id)).await?;
        group
            .get::<FarmConfig>(CONFIG_KEY, consistency)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("farm {farm_id} not found")))
    }

    async fn get_page(
        &self,
        query: PageQuery,
        consistency: ConsistencyLevel,
    ) -> Result<Page<FarmConfig>, StorageError> {
        let directory = self.backend.group(groups::farm_directory()).await?;
        let ids: Vec<(String, u64)> = directory.scan("farm:", consistency).await?;
        let page = paginate(ids, query);
        let mut entities = Vec::with_capacity(page.entities.len());
        for (_, farm_id) in page.entities {
            match self.get(farm_id, consistency).await {
                Ok(farm) => entities.push(farm),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(Page {
            entities,
            page: page.page,
            page_size: page.page_size,
            has_more: page.has_more,
        })
    }

    async fn save(&self, farm: &FarmConfig) -> Result<(), StorageError> {
        let group = self.backend.group(groups::farm_config(farm.id)).await?;
        group.put(CONFIG_KEY, farm).await?;
        let directory = self.backend.group(groups::farm_directory()).await?;
        directory
            .put(&format!("farm:{}", ordered(farm.id)), &farm.id)
            .await?;
        Ok(())
    }

    async fn delete(&self, farm_id: u64) -> Result<(), StorageError> {
        let group = self.backend.group(groups::farm_config(farm_id)).await?;
        group.delete(CONFIG_KEY).await?;
        let directory = self.backend.group(groups::farm_directory()).await?;
        directory
            .delete(&format!("farm:{}", ordered(farm_id)))
            .await?;
        Ok(())
    }

    async fn save_device(&self, device: &DeviceConfig) -> Result<FarmConfig, StorageError> {
        let mut farm = self.get(device.farm_id, ConsistencyLevel::Quorum).await?;
        farm.set_device(device.clone());
        self.save(&farm).await?;
        Ok(farm)
    }

    async fn set_device_setting(
        &self,
        farm_id: u64,
        device_id: u64,
        key: &str,
        value: &str,
    ) -> Result<FarmConfig, StorageError> {
        let mut farm = self.get(farm_id, ConsistencyLevel::Quorum).await?;
        let device = farm
            .devices
            .iter_mut()
            .find(|d| d.id == device_id)
            .ok_or_else(|| StorageError::not_found(format!("device {device_id} not found")))?;
        device.settings.insert(key.to_string(), value.to_string());
        self.save(&farm).await?;
        Ok(farm)
    }
}
