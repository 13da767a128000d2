//! 服务注册表
//!
//! 以农场 ID（及设备类型）为键的并发目录。写操作持独占锁，枚举持共享锁；
//! 锁内只做映射操作，不做任何 I/O 或通道发送。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::device::DeviceService;
use crate::error::FarmError;
use crate::event_log::EventLogService;
use crate::farm::FarmService;
use crate::workflow::WorkflowService;

#[derive(Default)]
struct RegistryInner {
    farms: BTreeMap<u64, Arc<FarmService>>,
    devices: HashMap<u64, BTreeMap<String, Arc<DeviceService>>>,
    event_logs: HashMap<u64, Arc<EventLogService>>,
    workflows: HashMap<u64, Arc<WorkflowService>>,
}

#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
}

fn lock_failed() -> FarmError {
    FarmError::Storage(crop_storage::StorageError::new("lock failed"))
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_farm(&self, farm: Arc<FarmService>) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        let farm_id = farm.id();
        if inner.farms.contains_key(&farm_id) {
            return Err(FarmError::AlreadyExists(format!("farm {farm_id}")));
        }
        inner.farms.insert(farm_id, farm);
        Ok(())
    }

    pub fn remove_farm(&self, farm_id: u64) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        inner.farms.remove(&farm_id);
        Ok(())
    }

    pub fn get_farm(&self, farm_id: u64) -> Result<Arc<FarmService>, FarmError> {
        let inner = self.inner.read().map_err(|_| lock_failed())?;
        inner
            .farms
            .get(&farm_id)
            .cloned()
            .ok_or_else(|| FarmError::NotFound(format!("farm {farm_id}")))
    }

    /// 按农场 ID 升序枚举。
    pub fn farms(&self) -> Result<Vec<Arc<FarmService>>, FarmError> {
        let inner = self.inner.read().map_err(|_| lock_failed())?;
        Ok(inner.farms.values().cloned().collect())
    }

    pub fn add_device(&self, farm_id: u64, device: Arc<DeviceService>) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        let device_type = device.device_type();
        let devices = inner.devices.entry(farm_id).or_default();
        if devices.contains_key(&device_type) {
            return Err(FarmError::AlreadyExists(format!(
                "device {device_type} in farm {farm_id}"
            )));
        }
        devices.insert(device_type, device);
        Ok(())
    }

    pub fn remove_device(&self, farm_id: u64, device_type: &str) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        if let Some(devices) = inner.devices.get_mut(&farm_id) {
            devices.remove(device_type);
            if devices.is_empty() {
                inner.devices.remove(&farm_id);
            }
        }
        Ok(())
    }

    pub fn get_device(
        &self,
        farm_id: u64,
        device_type: &str,
    ) -> Result<Arc<DeviceService>, FarmError> {
        let inner = self.inner.read().map_err(|_| lock_failed())?;
        inner
            .devices
            .get(&farm_id)
            .and_then(|devices| devices.get(device_type))
            .cloned()
            .ok_or_else(|| FarmError::NotFound(format!("device {device_type} in farm {farm_id}")))
    }

    pub fn get_device_by_id(
        &self,
        farm_id: u64,
        device_id: u64,
    ) -> Result<Arc<DeviceService>, FarmError> {
        let inner = self.inner.read().map_err(|_| lock_failed())?;
        inner
            .devices
            .get(&farm_id)
            .and_then(|devices| devices.values().find(|d| d.device_id() == device_id))
            .cloned()
            .ok_or_else(|| FarmError::NotFound(format!("device {device_id} in farm {farm_id}")))
    }

    pub fn devices(&self, farm_id: u64) -> Result<Vec<Arc<DeviceService>>, FarmError> {
        let inner = self.inner.read().map_err(|_| lock_failed())?;
        Ok(inner
            .devices
            .get(&farm_id)
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default())
    }

    pub fn add_event_log(
        &self,
        farm_id: u64,
        service: Arc<EventLogService>,
    ) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        if inner.event_logs.contains_key(&farm_id) {
            return Err(FarmError::AlreadyExists(format!("event log {farm_id}")));
        }
        inner.event_logs.insert(farm_id, service);
        Ok(())
    }

    pub fn get_event_log(&self, farm_id: u64) -> Result<Arc<EventLogService>, FarmError> {
        let inner = self.inner.read().map_err(|_| lock_failed())?;
        inner
            .event_logs
            .get(&farm_id)
            .cloned()
            .ok_or_else(|| FarmError::NotFound(format!("event log {farm_id}")))
    }

    pub fn remove_event_log(&self, farm_id: u64) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        inner.event_logs.remove(&farm_id);
        Ok(())
    }

    pub fn add_workflow(
        &self,
        farm_id: u64,
        service: Arc<WorkflowService>,
    ) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        if inner.workflows.contains_key(&farm_id) {
            return Err(FarmError::AlreadyExists(format!("workflow service {farm_id}")));
        }
        inner.workflows.insert(farm_id, service);
        Ok(())
    }

    pub fn get_workflow(&self, farm_id: u64) -> Result<Arc<WorkflowService>, FarmError> {
        let inner = self.inner.read().map_err(|_| lock_failed())?;
        inner
            .workflows
            .get(&farm_id)
            .cloned()
            .ok_or_else(|| FarmError::NotFound(format!("workflow service {farm_id}")))
    }

    pub fn remove_workflow(&self, farm_id: u64) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        inner.workflows.remove(&farm_id);
        Ok(())
    }

    /// 移除某农场的全部服务（幂等）。
    pub fn remove_farm_services(&self, farm_id: u64) -> Result<(), FarmError> {
        let mut inner = self.inner.write().map_err(|_| lock_failed())?;
        inner.farms.remove(&farm_id);
        inner.devices.remove(&farm_id);
        inner.event_logs.remove(&farm_id);
        inner.workflows.remove(&farm_id);
        Ok(())
    }
}
