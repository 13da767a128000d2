//! Postgres 农场状态存储

use domain::{ConsistencyLevel, FarmState};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::to_db_id;
use crate::error::StorageError;
use crate::traits::FarmStateStore;

pub struct PgFarmStateStore {
    pub pool: PgPool,
}

impl PgFarmStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FarmStateStore for PgFarmStateStore {
    async fn get(
        &self,
        farm_id: u64,
        _consistency: ConsistencyLevel,
    ) -> Result<FarmState, StorageError> {
        let row = sqlx::query("select state from farm_states where farm_id = $1")
            .bind(to_db_id(farm_id))
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StorageError::not_found(format!(
                "farm state {farm_id} not found"
            )));
        };
        Ok(row.try_get::<Json<FarmState>, _>("state")?.0)
    }

    async fn save(&self, state: &FarmState) -> Result<(), StorageError> {
        sqlx::query(
            "insert into farm_states (farm_id, state, updated_at) values ($1, $2, now()) \
             on conflict (farm_id) do update set state = excluded.state, updated_at = now()",
        )
        .bind(to_db_id(state.farm_id))
        .bind(Json(state))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, farm_id: u64) -> Result<(), StorageError> {
        sqlx::query("delete from farm_states where farm_id = $1")
            .bind(to_db_id(farm_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
