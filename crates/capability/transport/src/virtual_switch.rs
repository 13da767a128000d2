//! 虚拟智能开关
//!
//! 状态保存在设备状态存储中；定时切换先置开，再由后台任务在到期后置关。
//! 记录不存在时以配置生成的零值状态为准。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crop_storage::DeviceStateStore;
use domain::{ConsistencyLevel, DeviceConfig, DeviceState};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::switch::{SmartSwitch, Switch, SystemInfo, TimerEvent};

pub struct VirtualSmartSwitch {
    device_id: u64,
    device_type: String,
    initial: DeviceState,
    store: Arc<dyn DeviceStateStore>,
}

impl VirtualSmartSwitch {
    pub fn new(config: &DeviceConfig, store: Arc<dyn DeviceStateStore>) -> Self {
        Self {
            device_id: config.id,
            device_type: config.device_type.clone(),
            initial: DeviceState::zeroed(config),
            store,
        }
    }

    async fn set_position(&self, board_id: usize, position: i32) -> Result<(), TransportError> {
        set_position(&*self.store, self.device_id, &self.initial, board_id, position).await
    }
}

async fn load(
    store: &dyn DeviceStateStore,
    device_id: u64,
    initial: &DeviceState,
) -> Result<DeviceState, TransportError> {
    match store.get(device_id, ConsistencyLevel::Local).await {
        Ok(state) => Ok(state),
        Err(err) if err.is_not_found() => Ok(initial.clone()),
        Err(err) => Err(err.into()),
    }
}

async fn set_position(
    store: &dyn DeviceStateStore,
    device_id: u64,
    initial: &DeviceState,
    board_id: usize,
    position: i32,
) -> Result<(), TransportError> {
    let mut state = load(store, device_id, initial).await?;
    state.set_channel(board_id, position);
    store.save(device_id, &state).await?;
    Ok(())
}

#[async_trait]
impl SmartSwitch for VirtualSmartSwitch {
    fn device_type(&self) -> &str {
        &self.device_type
    }

    async fn state(&self) -> Result<DeviceState, TransportError> {
        load(&*self.store, self.device_id, &self.initial).await
    }

    async fn switch(&self, board_id: usize, position: i32) -> Result<Switch, TransportError> {
        self.set_position(board_id, position).await?;
        Ok(Switch {
            channel_id: board_id,
            position,
        })
    }

    async fn timer_switch(
        &self,
        board_id: usize,
        seconds: u64,
    ) -> Result<TimerEvent, TransportError> {
        self.set_position(board_id, 1).await?;
        let store = self.store.clone();
        let initial = self.initial.clone();
        let device_id = self.device_id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            match set_position(&*store, device_id, &initial, board_id, 0).await {
                Ok(()) => debug!(
                    target: "crop.device",
                    device_id,
                    board_id,
                    "virtual_timer_reverted"
                ),
                Err(err) => warn!(
                    target: "crop.device",
                    device_id,
                    board_id,
                    error = %err,
                    "virtual_timer_revert_failed"
                ),
            }
        });
        Ok(TimerEvent {
            channel_id: board_id,
            duration: seconds,
        })
    }

    async fn refresh_system_info(&self) -> Result<SystemInfo, TransportError> {
        Ok(SystemInfo {
            hardware_version: "virtual".to_string(),
            firmware_version: "virtual".to_string(),
        })
    }

    fn is_virtual(&self) -> bool {
        true
    }
}
