//! 农场内部通道
//!
//! 所有通道都有界；发布使用 `try_send`，满时丢弃并返回 `BufferFull`，从不阻塞生产者。
//! 监视器消费的三条通道（配置变更、农场状态变更、设备状态变更）由 FarmService 自己持有接收端，
//! 其余四条（配置、增量、错误、通知）交给订阅方。

use domain::{
    DeviceStateChange, DeviceStateDeltaEvent, FarmConfig, FarmErrorEvent, FarmNotification,
    FarmState,
};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, warn};

use crate::error::FarmError;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

pub const FARM_CONFIG: &str = "farm_config";
pub const FARM_CONFIG_CHANGE: &str = "farm_config_change";
pub const FARM_STATE_CHANGE: &str = "farm_state_change";
pub const DEVICE_STATE_CHANGE: &str = "device_state_change";
pub const DEVICE_STATE_DELTA: &str = "device_state_delta";
pub const FARM_ERROR: &str = "farm_error";
pub const FARM_NOTIFY: &str = "farm_notify";

/// 发送端集合（可克隆，设备服务与变更订阅共用）。
#[derive(Clone)]
pub struct FarmChannels {
    pub farm_id: u64,
    pub farm_config: Sender<FarmConfig>,
    pub farm_config_change: Sender<FarmConfig>,
    pub farm_state_change: Sender<FarmState>,
    pub device_state_change: Sender<DeviceStateChange>,
    pub device_state_delta: Sender<DeviceStateDeltaEvent>,
    pub farm_error: Sender<FarmErrorEvent>,
    pub farm_notify: Sender<FarmNotification>,
}

/// 监视器使用的接收端。
pub struct WatcherReceivers {
    pub farm_config_change: Receiver<FarmConfig>,
    pub farm_state_change: Receiver<FarmState>,
    pub device_state_change: Receiver<DeviceStateChange>,
}

/// 对外订阅的接收端。
pub struct FarmSubscriptions {
    pub farm_config: Receiver<FarmConfig>,
    pub device_state_delta: Receiver<DeviceStateDeltaEvent>,
    pub farm_error: Receiver<FarmErrorEvent>,
    pub farm_notify: Receiver<FarmNotification>,
}

impl FarmChannels {
    pub fn new(farm_id: u64, capacity: usize) -> (Self, WatcherReceivers, FarmSubscriptions) {
        let capacity = capacity.max(1);
        let (farm_config, farm_config_rx) = mpsc::channel(capacity);
        let (farm_config_change, farm_config_change_rx) = mpsc::channel(capacity);
        let (farm_state_change, farm_state_change_rx) = mpsc::channel(capacity);
        let (device_state_change, device_state_change_rx) = mpsc::channel(capacity);
        let (device_state_delta, device_state_delta_rx) = mpsc::channel(capacity);
        let (farm_error, farm_error_rx) = mpsc::channel(capacity);
        let (farm_notify, farm_notify_rx) = mpsc::channel(capacity);
        (
            Self {
                farm_id,
                farm_config,
                farm_config_change,
                farm_state_change,
                device_state_change,
                device_state_delta,
                farm_error,
                farm_notify,
            },
            WatcherReceivers {
                farm_config_change: farm_config_change_rx,
                farm_state_change: farm_state_change_rx,
                device_state_change: device_state_change_rx,
            },
            FarmSubscriptions {
                farm_config: farm_config_rx,
                device_state_delta: device_state_delta_rx,
                farm_error: farm_error_rx,
                farm_notify: farm_notify_rx,
            },
        )
    }

    pub fn publish_config(&self, config: FarmConfig) -> Result<(), FarmError> {
        publish(self.farm_id, &self.farm_config, config, FARM_CONFIG)
    }

    pub fn publish_config_change(&self, config: FarmConfig) -> Result<(), FarmError> {
        publish(self.farm_id, &self.farm_config_change, config, FARM_CONFIG_CHANGE)
    }

    pub fn publish_state_change(&self, state: FarmState) -> Result<(), FarmError> {
        publish(self.farm_id, &self.farm_state_change, state, FARM_STATE_CHANGE)
    }

    pub fn publish_device_state_change(&self, change: DeviceStateChange) -> Result<(), FarmError> {
        publish(self.farm_id, &self.device_state_change, change, DEVICE_STATE_CHANGE)
    }

    pub fn publish_delta(&self, event: DeviceStateDeltaEvent) -> Result<(), FarmError> {
        let result = publish(self.farm_id, &self.device_state_delta, event, DEVICE_STATE_DELTA);
        match &result {
            Ok(()) => crop_telemetry::record_delta_published(),
            Err(FarmError::BufferFull(_)) => crop_telemetry::record_delta_dropped(),
            Err(_) => {}
        }
        result
    }

    pub fn publish_error(&self, event: FarmErrorEvent) -> Result<(), FarmError> {
        publish(self.farm_id, &self.farm_error, event, FARM_ERROR)
    }

    pub fn publish_notification(&self, notification: FarmNotification) -> Result<(), FarmError> {
        let result = publish(self.farm_id, &self.farm_notify, notification, FARM_NOTIFY);
        if result.is_ok() {
            crop_telemetry::record_notification();
        }
        result
    }

    /// 上报错误事件；通道本身出错时只记日志。
    pub fn report(&self, device_id: Option<u64>, err: &FarmError) {
        let event = FarmErrorEvent {
            farm_id: self.farm_id,
            device_id,
            kind: err.kind(),
            message: err.to_string(),
        };
        let _ = self.publish_error(event);
    }
}

fn publish<T>(
    farm_id: u64,
    sender: &Sender<T>,
    value: T,
    channel: &'static str,
) -> Result<(), FarmError> {
    match sender.try_send(value) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            warn!(target: "crop.farm", farm_id, channel, "publication_dropped");
            Err(FarmError::BufferFull(channel))
        }
        Err(TrySendError::Closed(_)) => {
            debug!(target: "crop.farm", farm_id, channel, "publication_channel_closed");
            Err(FarmError::ChannelClosed(channel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::DeviceStateDelta;

    #[test]
    fn full_channel_drops_with_buffer_full() {
        let (channels, _watchers, mut subscriptions) = FarmChannels::new(1, 1);
        let event = DeviceStateDeltaEvent {
            farm_id: 1,
            device_type: "nutrient".to_string(),
            delta: DeviceStateDelta::metric("ph", 6.1),
        };
        channels.publish_delta(event.clone()).expect("first fits");
        let err = channels.publish_delta(event.clone()).expect_err("full");
        assert!(matches!(err, FarmError::BufferFull(DEVICE_STATE_DELTA)));
        assert_eq!(subscriptions.device_state_delta.try_recv().ok(), Some(event));
    }

    #[test]
    fn closed_channel_reports_closed() {
        let (channels, _watchers, subscriptions) = FarmChannels::new(1, 4);
        drop(subscriptions);
        let err = channels
            .publish_config(domain::FarmConfig::default())
            .expect_err("closed");
        assert!(matches!(err, FarmError::ChannelClosed(FARM_CONFIG)));
    }
}
