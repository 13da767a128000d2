//! 控制环事件

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::state::{DeviceState, DeviceStateDelta};

/// 设备状态变化（轮询或执行后发出）。
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStateChange {
    pub device_id: u64,
    pub device_type: String,
    pub state: DeviceState,
    pub is_poll_event: bool,
}

/// 向订阅者扇出的增量事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateDeltaEvent {
    pub farm_id: u64,
    pub device_type: String,
    pub delta: DeviceStateDelta,
}

/// 事件日志条目。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    #[serde(default)]
    pub id: u64,
    pub farm_id: u64,
    pub device_id: u64,
    pub device_name: String,
    pub event_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// 农场通知（开关事件、指标告警）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmNotification {
    pub farm_id: u64,
    pub device_id: u64,
    pub device_type: String,
    pub event_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// 农场级错误事件（发往 FarmErrorChan）。
#[derive(Debug, Clone, PartialEq)]
pub struct FarmErrorEvent {
    pub farm_id: u64,
    pub device_id: Option<u64>,
    pub kind: ErrorKind,
    pub message: String,
}
