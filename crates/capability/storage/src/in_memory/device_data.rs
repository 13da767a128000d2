//! 设备时序数据内存实现
//!
//! 每个设备保留最近 30 天的状态采样，写入时顺带裁剪过期采样。

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use domain::DeviceState;

use crate::error::StorageError;
use crate::traits::DeviceDataStore;

const RETENTION_DAYS: i64 = 30;

#[derive(Default)]
pub struct InMemoryDeviceDataStore {
    samples: RwLock<HashMap<u64, Vec<(DateTime<Utc>, DeviceState)>>>,
}

impl InMemoryDeviceDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定时间写入采样（测试与回填使用）。
    pub fn save_at(
        &self,
        device_id: u64,
        at: DateTime<Utc>,
        state: &DeviceState,
    ) -> Result<(), StorageError> {
        let mut samples = self
            .samples
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let series = samples.entry(device_id).or_default();
        series.push((at, state.clone()));
        series.sort_by_key(|(ts, _)| *ts);
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        series.retain(|(ts, _)| *ts >= cutoff);
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeviceDataStore for InMemoryDeviceDataStore {
    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError> {
        self.save_at(device_id, Utc::now(), state)
    }

    async fn get_last_30_days(
        &self,
        device_id: u64,
        metric_key: &str,
    ) -> Result<Vec<f64>, StorageError> {
        let samples = self
            .samples
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        Ok(samples
            .get(&device_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|(ts, _)| *ts >= cutoff)
                    .filter_map(|(_, state)| state.metric(metric_key))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, device_id: u64) -> Result<(), StorageError> {
        let mut samples = self
            .samples
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        samples.remove(&device_id);
        Ok(())
    }
}
