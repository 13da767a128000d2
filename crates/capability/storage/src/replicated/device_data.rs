use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use domain::{ConsistencyLevel, DeviceState, random_id};

use super::{ReplicatedBackend, ordered};
use crate::error::StorageError;
use crate::traits::DeviceDataStore;
use crop_cluster::groups;

const SAMPLE_PREFIX: &str = "sample:";

/// 设备时序数据：每个设备一个复制组，采样键为 `sample:{毫秒时间戳}:{随机后缀}`。
pub struct ReplicatedDeviceDataStore {
    backend: ReplicatedBackend,
}

impl ReplicatedDeviceDataStore {
    pub fn new(backend: ReplicatedBackend) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl DeviceDataStore for ReplicatedDeviceDataStore {
    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError> {
        let group = self.backend.group(groups::device_data(device_id)).await?;
        let ts_ms = Utc::now().timestamp_millis().max(0) as u64;
        group
            .put(
                &format!("{SAMPLE_PREFIX}{}:{}", ordered(ts_ms), ordered(random_id())),
                &state.metrics,
            )
            .await?;
        Ok(())
    }

    async fn get_last_30_days(
        &self,
        device_id: u64,
        metric_key: &str,
    ) -> Result<Vec<f64>, StorageError> {
        let group = self.backend.group(groups::device_data(device_id)).await?;
        let cutoff = (Utc::now() - Duration::days(30)).timestamp_millis().max(0) as u64;
        let samples: Vec<(String, BTreeMap<String, f64>)> =
            group.scan(SAMPLE_PREFIX, ConsistencyLevel::Local).await?;
        Ok(samples
            .into_iter()
            .filter(|(key, _)| {
                key.trim_start_matches(SAMPLE_PREFIX)
                    .split(':')
                    .next()
                    .and_then(|ts| ts.parse::<u64>().ok())
                    .is_some_and(|ts| ts >= cutoff)
            })
            .filter_map(|(_, metrics)| metrics.get(metric_key).copied())
            .collect())
    }

    async fn delete(&self, device_id: u64) -> Result<(), StorageError> {
        let group = self.backend.group(groups::device_data(device_id)).await?;
        group.delete_prefix(SAMPLE_PREFIX).await?;
        Ok(())
    }
}
