use chrono::{DateTime, Utc};
use domain::{DeviceConfig, FarmConfig, FarmState};

/// 单次规则求值的输入快照。
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub farm: &'a FarmConfig,
    pub device: &'a DeviceConfig,
    pub state: &'a FarmState,
    pub now: DateTime<Utc>,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        farm: &'a FarmConfig,
        device: &'a DeviceConfig,
        state: &'a FarmState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            farm,
            device,
            state,
            now,
        }
    }

    /// 通道当前位置；状态中没有该板位时视为关。
    pub fn position(&self, board_id: usize) -> i32 {
        self.state
            .channel_value(&self.device.device_type, board_id)
            .unwrap_or(0)
    }
}
