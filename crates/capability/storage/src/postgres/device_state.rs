//! Postgres 设备状态存储

use domain::{ConsistencyLevel, DeviceState};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::to_db_id;
use crate::error::StorageError;
use crate::traits::DeviceStateStore;

pub struct PgDeviceStateStore {
    pub pool: PgPool,
}

impl PgDeviceStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeviceStateStore for PgDeviceStateStore {
    async fn get(
        &self,
        device_id: u64,
        _consistency: ConsistencyLevel,
    ) -> Result<DeviceState, StorageError> {
        let row = sqlx::query("select state from device_states where device_id = $1")
            .bind(to_db_id(device_id))
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StorageError::not_found(format!(
                "device state {device_id} not found"
            )));
        };
        Ok(row.try_get::<Json<DeviceState>, _>("state")?.0)
    }

    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError> {
        let mut state = state.clone();
        state.id = device_id;
        sqlx::query(
            "insert into device_states (device_id, state, updated_at) values ($1, $2, now()) \
             on conflict (device_id) do update set state = excluded.state, updated_at = now()",
        )
        .bind(to_db_id(device_id))
        .bind(Json(&state))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, device_id: u64) -> Result<(), StorageError> {
        sqlx::query("delete from device_states where device_id = $1")
            .bind(to_db_id(device_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
