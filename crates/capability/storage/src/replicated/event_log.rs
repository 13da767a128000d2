use domain::{ConsistencyLevel, EventLogEntry, random_id};

use super::{ReplicatedBackend, ordered};
use crate::error::StorageError;
use crate::pager::{Page, PageQuery, paginate};
use crate::traits::EventLogStore;
use crop_cluster::groups;

const EVENT_PREFIX: &str = "event:";

pub struct ReplicatedEventLogStore {
    backend: ReplicatedBackend,
}

impl ReplicatedEventLogStore {
    pub fn new(backend: ReplicatedBackend) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl EventLogStore for ReplicatedEventLogStore {
    async fn create(&self, mut entry: EventLogEntry) -> Result<EventLogEntry, StorageError> {
        if entry.id == 0 {
            entry.id = random_id();
        }
        let ts_ms = entry.timestamp.timestamp_millis().max(0) as u64;
        let group = self.backend.group(groups::event_log(entry.farm_id)).await?;
        group
            .put(
                &format!("{EVENT_PREFIX}{}:{}", ordered(ts_ms), ordered(entry.id)),
                &entry,
            )
            .await?;
        Ok(entry)
    }

    async fn get_page(
        &self,
        farm_id: u64,
        query: PageQuery,
        consistency: ConsistencyLevel,
    ) -> Result<Page<EventLogEntry>, StorageError> {
        let group = self.backend.group(groups::event_log(farm_id)).await?;
        let items: Vec<(String, EventLogEntry)> = group.scan(EVENT_PREFIX, consistency).await?;
        let newest_first: Vec<EventLogEntry> =
            items.into_iter().rev().map(|(_, entry)| entry).collect();
        Ok(paginate(newest_first, query))
    }

    async fn delete_by_farm(&self, farm_id: u64) -> Result<(), StorageError> {
        let group = self.backend.group(groups::event_log(farm_id)).await?;
        group.delete_prefix(EVENT_PREFIX).await?;
        Ok(())
    }
}
