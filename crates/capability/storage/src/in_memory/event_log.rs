//! 事件日志内存实现

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use domain::{ConsistencyLevel, EventLogEntry};

use crate::error::StorageError;
use crate::pager::{Page, PageQuery, paginate};
use crate::traits::EventLogStore;

pub struct InMemoryEventLogStore {
    logs: RwLock<Vec<EventLogEntry>>,
    next_id: AtomicU64,
}

impl InMemoryEventLogStore {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryEventLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventLogStore for InMemoryEventLogStore {
    async fn create(&self, mut entry: EventLogEntry) -> Result<EventLogEntry, StorageError> {
        if entry.id == 0 {
            entry.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        let mut logs = self
            .logs
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        logs.push(entry.clone());
        Ok(entry)
    }

    async fn get_page(
        &self,
        farm_id: u64,
        query: PageQuery,
        _consistency: ConsistencyLevel,
    ) -> Result<Page<EventLogEntry>, StorageError> {
        let logs = self
            .logs
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<EventLogEntry> = logs
            .iter()
            .filter(|entry| entry.farm_id == farm_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(paginate(items, query))
    }

    async fn delete_by_farm(&self, farm_id: u64) -> Result<(), StorageError> {
        let mut logs = self
            .logs
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        logs.retain(|entry| entry.farm_id != farm_id);
        Ok(())
    }
}
