//! Postgres 农场配置存储

use domain::{ConsistencyLevel, DeviceConfig, FarmConfig};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::to_db_id;
use crate::error::StorageError;
use crate::pager::{Page, PageQuery};
use crate::traits::FarmConfigStore;

pub struct PgFarmConfigStore {
    pub pool: PgPool,
}

impl PgFarmConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 锁定农场行，修改配置后写回农场与设备表。
    async fn update<F>(&self, farm_id: u64, apply: F) -> Result<FarmConfig, StorageError>
    where
        F: FnOnce(&mut FarmConfig) -> Result<(), StorageError> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("select config from farms where id = $1 for update")
            .bind(to_db_id(farm_id))
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(StorageError::not_found(format!("farm {farm_id} not found")));
        };
        let mut farm = row.try_get::<Json<FarmConfig>, _>("config")?.0;
        apply(&mut farm)?;
        write_farm(&mut tx, &farm).await?;
        tx.commit().await?;
        Ok(farm)
    }
}

async fn write_farm(
    tx: &mut Transaction<'_, Postgres>,
    farm: &FarmConfig,
) -> Result<(), StorageError> {
    sqlx::query(
        "insert into farms (id, organization_id, name, config, updated_at) \
         values ($1, $2, $3, $4, now()) \
         on conflict (id) do update set organization_id = excluded.organization_id, \
         name = excluded.name, config = excluded.config, updated_at = now()",
    )
    .bind(to_db_id(farm.id))
    .bind(to_db_id(farm.organization_id))
    .bind(&farm.name)
    .bind(Json(farm))
    .execute(&mut **tx)
    .await?;
    sqlx::query("delete from devices where farm_id = $1")
        .bind(to_db_id(farm.id))
        .execute(&mut **tx)
        .await?;
    for device in &farm.devices {
        sqlx::query("insert into devices (id, farm_id, type, config) values ($1, $2, $3, $4)")
            .bind(to_db_id(device.id))
            .bind(to_db_id(farm.id))
            .bind(&device.device_type)
            .bind(Json(device))
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl FarmConfigStore for PgFarmConfigStore {
    async fn get(
        &self,
        farm_id: u64,
        _consistency: ConsistencyLevel,
    ) -> Result<FarmConfig, StorageError> {
        let row = sqlx::query("select config from farms where id = $1")
            .bind(to_db_id(farm_id))
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StorageError::not_found(format!("farm {farm_id} not found")));
        };
        Ok(row.try_get::<Json<FarmConfig>, _>("config")?.0)
    }

    async fn get_page(
        &self,
        query: PageQuery,
        _consistency: ConsistencyLevel,
    ) -> Result<Page<FarmConfig>, StorageError> {
        let query = query.normalized();
        let rows = sqlx::query("select config from farms order by id limit $1 offset $2")
            .bind((query.page_size + 1) as i64)
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            entities.push(row.try_get::<Json<FarmConfig>, _>("config")?.0);
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

    async fn save(&self, farm: &FarmConfig) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        write_farm(&mut tx, farm).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, farm_id: u64) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("delete from devices where farm_id = $1")
            .bind(to_db_id(farm_id))
            .execute(&mut *tx)
            .await?;
        sqlx::query("delete from farms where id = $1")
            .bind(to_db_id(farm_id))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_device(&self, device: &DeviceConfig) -> Result<FarmConfig, StorageError> {
        let device = device.clone();
        self.update(device.farm_id, move |farm| {
            farm.set_device(device);
            Ok(())
        })
        .await
    }

    async fn set_device_setting(
        &self,
        farm_id: u64,
        device_id: u64,
        key: &str,
        value: &str,
    ) -> Result<FarmConfig, StorageError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.update(farm_id, move |farm| {
            let device = farm
                .devices
                .iter_mut()
                .find(|d| d.id == device_id)
                .ok_or_else(|| StorageError::not_found(format!("device {device_id} not found")))?;
            device.settings.insert(key, value);
            Ok(())
        })
        .await
    }
}
