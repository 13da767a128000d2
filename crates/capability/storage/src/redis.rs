//! Redis 时序数据存储（RedisTimeSeries 模块）
//!
//! 每个 (设备, 指标) 一条时间序列：`crop:device:{device_id}:{metric}`，保留 30 天。

use chrono::Utc;
use domain::DeviceState;

use crate::error::StorageError;
use crate::traits::DeviceDataStore;

const RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

fn series_key(device_id: u64, metric_key: &str) -> String {
    format!("crop:device:{device_id}:{metric_key}")
}

/// RedisTimeSeries 设备数据存储。
pub struct RedisTsDeviceDataStore {
    client: redis::Client,
}

impl RedisTsDeviceDataStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| StorageError::new(err.to_string()))?;
        Ok(Self::new(client))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StorageError> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::new(err.to_string()))
    }
}

#[async_trait::async_trait]
impl DeviceDataStore for RedisTsDeviceDataStore {
    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError> {
        let mut connection = self.connection().await?;
        let now_ms = Utc::now().timestamp_millis();
        for (key, value) in &state.metrics {
            redis::cmd("TS.ADD")
                .arg(series_key(device_id, key))
                .arg(now_ms)
                .arg(*value)
                .arg("RETENTION")
                .arg(RETENTION_MS)
                .arg("ON_DUPLICATE")
                .arg("LAST")
                .arg("LABELS")
                .arg("device")
                .arg(device_id)
                .arg("metric")
                .arg(key)
                .query_async::<_, i64>(&mut connection)
                .await?;
        }
        Ok(())
    }

    async fn get_last_30_days(
        &self,
        device_id: u64,
        metric_key: &str,
    ) -> Result<Vec<f64>, StorageError> {
        let mut connection = self.connection().await?;
        let from = Utc::now().timestamp_millis() - RETENTION_MS;
        let result: Result<Vec<(i64, String)>, redis::RedisError> = redis::cmd("TS.RANGE")
            .arg(series_key(device_id, metric_key))
            .arg(from)
            .arg("+")
            .query_async(&mut connection)
            .await;
        let samples = match result {
            Ok(samples) => samples,
            // 序列尚未创建
            Err(err) if err.to_string().contains("does not exist") => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        samples
            .into_iter()
            .map(|(_, raw)| {
                raw.parse::<f64>()
                    .map_err(|err| StorageError::new(err.to_string()))
            })
            .collect()
    }

    async fn delete(&self, device_id: u64) -> Result<(), StorageError> {
        let mut connection = self.connection().await?;
        let pattern = format!("crop:device:{device_id}:*");
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut connection)
                .await?;
            if !keys.is_empty() {
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<_, i64>(&mut connection)
                    .await?;
            }
            if next_cursor == 0 {
                return Ok(());
            }
            cursor = next_cursor;
        }
    }
}
