//! Postgres 设备时序数据存储

use std::collections::BTreeMap;

use domain::DeviceState;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::to_db_id;
use crate::error::StorageError;
use crate::traits::DeviceDataStore;

pub struct PgDeviceDataStore {
    pub pool: PgPool,
}

impl PgDeviceDataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeviceDataStore for PgDeviceDataStore {
    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError> {
        sqlx::query("insert into device_data (device_id, ts, metrics) values ($1, now(), $2)")
            .bind(to_db_id(device_id))
            .bind(Json(&state.metrics))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_last_30_days(
        &self,
        device_id: u64,
        metric_key: &str,
    ) -> Result<Vec<f64>, StorageError> {
        let rows = sqlx::query(
            "select metrics from device_data \
             where device_id = $1 and ts >= now() - interval '30 days' order by ts",
        )
        .bind(to_db_id(device_id))
        .fetch_all(&self.pool)
        .await?;
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let metrics = row.try_get::<Json<BTreeMap<String, f64>>, _>("metrics")?.0;
            if let Some(value) = metrics.get(metric_key) {
                values.push(*value);
            }
        }
        Ok(values)
    }

    async fn delete(&self, device_id: u64) -> Result<(), StorageError> {
        sqlx::query("delete from device_data where device_id = $1")
            .bind(to_db_id(device_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
