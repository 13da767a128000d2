//! 农场配置内存实现

use std::collections::BTreeMap;
use std::sync::RwLock;

use domain::{ConsistencyLevel, DeviceConfig, FarmConfig};

use crate::error::StorageError;
use crate::pager::{Page, PageQuery, paginate};
use crate::traits::FarmConfigStore;

/// 农场配置内存存储（按农场 ID 有序）。
#[derive(Default)]
pub struct InMemoryFarmConfigStore {
    farms: RwLock<BTreeMap<u64, FarmConfig>>,
}

impl InMemoryFarmConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, farm_id: u64, apply: F) -> Result<FarmConfig, StorageError>
    where
        F: FnOnce(&mut FarmConfig) -> Result<(), StorageError>,
    {
        let mut farms = self
            .farms
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let farm = farms
            .get_mut(&farm_id)
            .ok_or_else(|| StorageError::not_found(format!("farm {farm_id} not found")))?;
        apply(farm)?;
        Ok(farm.clone())
    }
}

#[async_trait::async_trait]
impl FarmConfigStore for InMemoryFarmConfigStore {
    async fn get(
        &self,
        farm_id: u64,
        _consistency: ConsistencyLevel,
    ) -> Result<FarmConfig, StorageError> {
        let farms = self
            .farms
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        farms
            .get(&farm_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("farm {farm_id} not found")))
    }

    async fn get_page(
        &self,
        query: PageQuery,
        _consistency: ConsistencyLevel,
    ) -> Result<Page<FarmConfig>, StorageError> {
        let farms = self
            .farms
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(paginate(farms.values().cloned().collect(), query))
    }

    async fn save(&self, farm: &FarmConfig) -> Result<(), StorageError> {
        let mut farms = self
            .farms
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        farms.insert(farm.id, farm.clone());
        Ok(())
    }

    async fn delete(&self, farm_id: u64) -> Result<(), StorageError> {
        let mut farms = self
            .farms
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        farms.remove(&farm_id);
        Ok(())
    }

    async fn save_device(&self, device: &DeviceConfig) -> Result<FarmConfig, StorageError> {
        self.update(device.farm_id, |farm| {
            farm.set_device(device.clone());
            Ok(())
        })
    }

    async fn set_device_setting(
        &self,
        farm_id: u64,
        device_id: u64,
        key: &str,
        value: &str,
    ) -> Result<FarmConfig, StorageError> {
        self.update(farm_id, |farm| {
            let device = farm
                .devices
                .iter_mut()
                .find(|d| d.id == device_id)
                .ok_or_else(|| StorageError::not_found(format!("device {device_id} not found")))?;
            device.settings.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }
}
