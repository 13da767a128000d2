use async_trait::async_trait;

use crate::error::RuleError;

/// 规则处理器回调的执行端（由设备服务实现）。
///
/// `message` 写入事件日志与通知。
#[async_trait]
pub trait SwitchActuator: Send + Sync {
    async fn switch(&self, board_id: usize, position: i32, message: &str)
    -> Result<(), RuleError>;

    async fn timer_switch(
        &self,
        board_id: usize,
        seconds: u64,
        message: &str,
    ) -> Result<(), RuleError>;
}
