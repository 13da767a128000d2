//! 农场状态与增量
//!
//! FarmState 以设备类型为键；DeviceState 的通道数组按板位定位，取值 0/1。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;

/// 单设备状态。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub channels: Vec<i32>,
}

impl DeviceState {
    /// 按设备配置生成零值状态：所有指标为 0，所有通道关闭。
    pub fn zeroed(config: &DeviceConfig) -> Self {
        Self {
            id: config.id,
            metrics: config
                .metrics
                .iter()
                .map(|m| (m.key.clone(), 0.0))
                .collect(),
            channels: vec![0; config.channel_slots()],
        }
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    pub fn channel(&self, board_id: usize) -> Option<i32> {
        self.channels.get(board_id).copied()
    }

    pub fn set_metric(&mut self, key: impl Into<String>, value: f64) {
        self.metrics.insert(key.into(), value);
    }

    /// 设置通道位置；板位超出当前长度时补零扩展。
    pub fn set_channel(&mut self, board_id: usize, value: i32) {
        if board_id >= self.channels.len() {
            self.channels.resize(board_id + 1, 0);
        }
        self.channels[board_id] = value;
    }
}

/// 农场状态：设备类型 → 设备状态。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmState {
    pub farm_id: u64,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceState>,
}

impl FarmState {
    pub fn new(farm_id: u64) -> Self {
        Self {
            farm_id,
            devices: BTreeMap::new(),
        }
    }

    pub fn device(&self, device_type: &str) -> Option<&DeviceState> {
        self.devices.get(device_type)
    }

    pub fn put_device(&mut self, device_type: impl Into<String>, state: DeviceState) {
        self.devices.insert(device_type.into(), state);
    }

    pub fn metric_value(&self, device_type: &str, key: &str) -> Option<f64> {
        self.device(device_type).and_then(|d| d.metric(key))
    }

    pub fn channel_value(&self, device_type: &str, board_id: usize) -> Option<i32> {
        self.device(device_type).and_then(|d| d.channel(board_id))
    }

    pub fn set_metric_value(&mut self, device_type: &str, key: &str, value: f64) {
        self.devices
            .entry(device_type.to_string())
            .or_default()
            .set_metric(key, value);
    }

    pub fn set_channel_value(&mut self, device_type: &str, board_id: usize, value: i32) {
        self.devices
            .entry(device_type.to_string())
            .or_default()
            .set_channel(board_id, value);
    }
}

/// 设备状态增量：只包含发生变化的指标与通道。
///
/// 新状态不再上报的指标记入 `removed_metrics`；通道变少时 `channel_count` 为新长度。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateDelta {
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub channels: BTreeMap<usize, i32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub removed_metrics: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<usize>,
}

impl DeviceStateDelta {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
            && self.channels.is_empty()
            && self.removed_metrics.is_empty()
            && self.channel_count.is_none()
    }

    pub fn metric(key: impl Into<String>, value: f64) -> Self {
        let mut delta = Self::default();
        delta.metrics.insert(key.into(), value);
        delta
    }

    pub fn channel(board_id: usize, value: i32) -> Self {
        let mut delta = Self::default();
        delta.channels.insert(board_id, value);
        delta
    }

    /// 将增量应用到状态上，返回新状态。
    pub fn apply(&self, prev: &DeviceState) -> DeviceState {
        let mut next = prev.clone();
        for key in &self.removed_metrics {
            next.metrics.remove(key);
        }
        if let Some(count) = self.channel_count {
            next.channels.truncate(count);
        }
        for (key, value) in &self.metrics {
            next.set_metric(key.clone(), *value);
        }
        for (board_id, value) in &self.channels {
            next.set_channel(*board_id, *value);
        }
        next
    }
}

/// 计算 `prev` → `next` 的增量。`prev` 为空时视为首次观测，全部条目都计入增量。
pub fn diff(prev: Option<&DeviceState>, next: &DeviceState) -> DeviceStateDelta {
    let mut delta = DeviceStateDelta::default();
    for (key, value) in &next.metrics {
        let changed = match prev.and_then(|p| p.metric(key)) {
            Some(old) => old != *value,
            None => true,
        };
        if changed {
            delta.metrics.insert(key.clone(), *value);
        }
    }
    for (board_id, value) in next.channels.iter().enumerate() {
        let changed = match prev.and_then(|p| p.channel(board_id)) {
            Some(old) => old != *value,
            None => true,
        };
        if changed {
            delta.channels.insert(board_id, *value);
        }
    }
    if let Some(prev) = prev {
        delta.removed_metrics = prev
            .metrics
            .keys()
            .filter(|key| !next.metrics.contains_key(*key))
            .cloned()
            .collect();
        if next.channels.len() < prev.channels.len() {
            delta.channel_count = Some(next.channels.len());
        }
    }
    delta
}
