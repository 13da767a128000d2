use std::sync::Arc;

use chrono::Utc;
use crop_storage::{EventLogStore, Page, PageQuery};
use domain::{ConsistencyLevel, EventLogEntry};

use crate::error::FarmError;

/// 农场事件日志服务。
pub struct EventLogService {
    farm_id: u64,
    store: Arc<dyn EventLogStore>,
}

impl EventLogService {
    pub fn new(farm_id: u64, store: Arc<dyn EventLogStore>) -> Self {
        Self { farm_id, store }
    }

    pub fn farm_id(&self) -> u64 {
        self.farm_id
    }

    pub async fn create(
        &self,
        device_id: u64,
        device_name: &str,
        event_type: &str,
        message: &str,
    ) -> Result<EventLogEntry, FarmError> {
        let entry = EventLogEntry {
            id: 0,
            farm_id: self.farm_id,
            device_id,
            device_name: device_name.to_string(),
            event_type: event_type.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        Ok(self.store.create(entry).await?)
    }

    /// 按时间倒序分页。
    pub async fn get_page(
        &self,
        query: PageQuery,
        consistency: ConsistencyLevel,
    ) -> Result<Page<EventLogEntry>, FarmError> {
        Ok(self.store.get_page(self.farm_id, query, consistency).await?)
    }

    pub async fn delete_all(&self) -> Result<(), FarmError> {
        Ok(self.store.delete_by_farm(self.farm_id).await?)
    }
}
