use async_trait::async_trait;
use domain::DeviceState;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// 切换结果（设备返回的 `Switch` 对象）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Switch {
    pub channel_id: usize,
    pub position: i32,
}

/// 定时切换结果：通道置为开并在 `duration` 秒后回落。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerEvent {
    pub channel_id: usize,
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    #[serde(default)]
    pub hardware_version: String,
    #[serde(default)]
    pub firmware_version: String,
}

/// 智能开关。
///
/// 实现不持有互斥；同一设备的切换由调用方（DeviceService）串行化。
#[async_trait]
pub trait SmartSwitch: Send + Sync {
    fn device_type(&self) -> &str;

    /// 读取设备状态（指标与通道位置）。返回值的 `id` 由调用方补写。
    async fn state(&self) -> Result<DeviceState, TransportError>;

    async fn switch(&self, board_id: usize, position: i32) -> Result<Switch, TransportError>;

    async fn timer_switch(&self, board_id: usize, seconds: u64)
    -> Result<TimerEvent, TransportError>;

    async fn refresh_system_info(&self) -> Result<SystemInfo, TransportError>;

    fn is_virtual(&self) -> bool {
        false
    }
}
