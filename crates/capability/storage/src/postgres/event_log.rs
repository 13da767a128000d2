//! Postgres 事件日志存储

use chrono::{DateTime, Utc};
use domain::{ConsistencyLevel, EventLogEntry};
use sqlx::{PgPool, Row};

use super::{from_db_id, to_db_id};
use crate::error::StorageError;
use crate::pager::{Page, PageQuery};
use crate::traits::EventLogStore;

pub struct PgEventLogStore {
    pub pool: PgPool,
}

impl PgEventLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EventLogStore for PgEventLogStore {
    async fn create(&self, mut entry: EventLogEntry) -> Result<EventLogEntry, StorageError> {
        let row = sqlx::query(
            "insert into event_logs (farm_id, device_id, device_name, event_type, message, ts) \
             values ($1, $2, $3, $4, $5, $6) returning id",
        )
        .bind(to_db_id(entry.farm_id))
        .bind(to_db_id(entry.device_id))
        .bind(&entry.device_name)
        .bind(&entry.event_type)
        .bind(&entry.message)
        .bind(entry.timestamp)
        .fetch_one(&self.pool)
        .await?;
        entry.id = from_db_id(row.try_get("id")?);
        Ok(entry)
    }

    async fn get_page(
        &self,
        farm_id: u64,
        query: PageQuery,
        _consistency: ConsistencyLevel,
    ) -> Result<Page<EventLogEntry>, StorageError> {
        let query = query.normalized();
        let rows = sqlx::query(
            "select id, farm_id, device_id, device_name, event_type, message, ts \
             from event_logs where farm_id = $1 order by ts desc, id desc limit $2 offset $3",
        )
        .bind(to_db_id(farm_id))
        .bind((query.page_size + 1) as i64)
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            entities.push(EventLogEntry {
                id: from_db_id(row.try_get("id")?),
                farm_id: from_db_id(row.try_get("farm_id")?),
                device_id: from_db_id(row.try_get("device_id")?),
                device_name: row.try_get("device_name")?,
                event_type: row.try_get("event_type")?,
                message: row.try_get("message")?,
                timestamp: row.try_get::<DateTime<Utc>, _>("ts")?,
            });
        }
        let has_more = entities.len() > query.page_size;
        entities.truncate(query.page_size);
        Ok(Page {
            entities,
            page: query.page,
            page_size: query.page_size,
            has_more,
        })
    }

    async fn delete_by_farm(&self, farm_id: u64) -> Result<(), StorageError> {
        sqlx::query("delete from event_logs where farm_id = $1")
            .bind(to_db_id(farm_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
