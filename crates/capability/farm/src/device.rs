//! 设备服务
//!
//! 每个 (农场, 设备) 一个实例。轮询与切换都在调用方任务内同步完成：
//! - 轮询结果写入设备状态存储，并以 `is_poll_event = true` 发往 DeviceStateChangeChan
//! - 切换经执行互斥串行化，成功后写事件日志、按通道配置发通知，再发非轮询状态变更
//!
//! 出错时只上报到 FarmErrorChan，服务本身继续工作。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use crop_rules::{Clock, RuleError, SwitchActuator};
use crop_storage::{DeviceDataStore, DeviceStateStore, StorageError};
use crop_transport::{SmartSwitch, SystemInfo};
use domain::{
    Channel, ConsistencyLevel, DeviceConfig, DeviceState, DeviceStateChange, FarmMode,
    FarmNotification,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channels::FarmChannels;
use crate::error::FarmError;
use crate::event_log::EventLogService;

pub const EVENT_SWITCH: &str = "switch";
pub const EVENT_TIMER_SWITCH: &str = "timer_switch";

pub struct DeviceService {
    farm_id: u64,
    config: RwLock<DeviceConfig>,
    transport: RwLock<Arc<dyn SmartSwitch>>,
    actuation: Mutex<()>,
    device_states: Arc<dyn DeviceStateStore>,
    device_data: Arc<dyn DeviceDataStore>,
    event_log: Arc<EventLogService>,
    channels: FarmChannels,
    clock: Arc<dyn Clock>,
    stopped: AtomicBool,
}

fn lock_failed() -> FarmError {
    FarmError::Storage(StorageError::new("lock failed"))
}

impl DeviceService {
    pub fn new(
        config: DeviceConfig,
        transport: Arc<dyn SmartSwitch>,
        device_states: Arc<dyn DeviceStateStore>,
        device_data: Arc<dyn DeviceDataStore>,
        event_log: Arc<EventLogService>,
        channels: FarmChannels,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            farm_id: channels.farm_id,
            config: RwLock::new(config),
            transport: RwLock::new(transport),
            actuation: Mutex::new(()),
            device_states,
            device_data,
            event_log,
            channels,
            clock,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn farm_id(&self) -> u64 {
        self.farm_id
    }

    pub fn device_id(&self) -> u64 {
        self.config.read().map(|c| c.id).unwrap_or_default()
    }

    pub fn device_type(&self) -> String {
        self.config
            .read()
            .map(|c| c.device_type.clone())
            .unwrap_or_default()
    }

    pub fn config(&self) -> Result<DeviceConfig, FarmError> {
        Ok(self.config.read().map_err(|_| lock_failed())?.clone())
    }

    pub fn set_config(&self, config: DeviceConfig) -> Result<(), FarmError> {
        let mut slot = self.config.write().map_err(|_| lock_failed())?;
        *slot = config;
        Ok(())
    }

    pub fn is_virtual(&self) -> bool {
        self.transport
            .read()
            .map(|t| t.is_virtual())
            .unwrap_or(false)
    }

    fn transport(&self) -> Result<Arc<dyn SmartSwitch>, FarmError> {
        Ok(self.transport.read().map_err(|_| lock_failed())?.clone())
    }

    /// 替换设备通信实现（模式切换时由配置监视器调用）。
    pub fn set_mode(&self, mode: FarmMode, transport: Arc<dyn SmartSwitch>) -> Result<(), FarmError> {
        let mut slot = self.transport.write().map_err(|_| lock_failed())?;
        *slot = transport;
        drop(slot);
        info!(
            target: "crop.device",
            farm_id = self.farm_id,
            device_type = %self.device_type(),
            mode = mode.as_str(),
            "device_transport_swapped"
        );
        Ok(())
    }

    /// 轮询设备状态。
    pub async fn poll(&self) -> Result<(), FarmError> {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(target: "crop.device", farm_id = self.farm_id, "device_poll_skipped_stopped");
            return Ok(());
        }
        let config = self.config()?;
        let started = Instant::now();
        let result = self.poll_once(&config).await;
        crop_telemetry::record_poll_latency_ms(started.elapsed().as_millis() as u64);
        match result {
            Ok(()) => {
                crop_telemetry::record_poll();
                Ok(())
            }
            Err(err) => {
                crop_telemetry::record_poll_failure();
                warn!(
                    target: "crop.device",
                    farm_id = self.farm_id,
                    device_id = config.id,
                    device_type = %config.device_type,
                    error = %err,
                    "device_poll_failed"
                );
                self.channels.report(Some(config.id), &err);
                Err(err)
            }
        }
    }

    async fn poll_once(&self, config: &DeviceConfig) -> Result<(), FarmError> {
        let transport = self.transport()?;
        let mut state = transport.state().await?;
        state.id = config.id;
        self.device_states.save(config.id, &state).await?;
        debug!(
            target: "crop.device",
            farm_id = self.farm_id,
            device_id = config.id,
            metrics = state.metrics.len(),
            channels = state.channels.len(),
            "device_polled"
        );
        self.channels.publish_device_state_change(DeviceStateChange {
            device_id: config.id,
            device_type: config.device_type.clone(),
            state,
            is_poll_event: true,
        })
    }

    pub async fn switch(&self, board_id: usize, position: i32, message: &str) -> Result<(), FarmError> {
        let (config, channel) = self.channel(board_id)?;
        let result = self.actuate(&config, &channel, Actuation::Switch(position), message).await;
        if result.is_ok() {
            crop_telemetry::record_switch();
        }
        result
    }

    pub async fn timer_switch(&self, board_id: usize, seconds: u64, message: &str) -> Result<(), FarmError> {
        let (config, channel) = self.channel(board_id)?;
        let result = self.actuate(&config, &channel, Actuation::Timer(seconds), message).await;
        if result.is_ok() {
            crop_telemetry::record_timer_switch();
        }
        result
    }

    fn channel(&self, board_id: usize) -> Result<(DeviceConfig, Channel), FarmError> {
        let config = self.config()?;
        let channel = config.channel_by_board(board_id).cloned().ok_or_else(|| {
            FarmError::NotFound(format!(
                "channel at board slot {board_id} on device {}",
                config.device_type
            ))
        })?;
        Ok((config, channel))
    }

    async fn actuate(
        &self,
        config: &DeviceConfig,
        channel: &Channel,
        action: Actuation,
        message: &str,
    ) -> Result<(), FarmError> {
        let state = match self.actuate_locked(config, channel, action).await {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    target: "crop.device",
                    farm_id = self.farm_id,
                    device_id = config.id,
                    channel_id = channel.id,
                    error = %err,
                    "device_switch_failed"
                );
                self.channels.report(Some(config.id), &err);
                return Err(err);
            }
        };

        info!(
            target: "crop.device",
            farm_id = self.farm_id,
            device_id = config.id,
            channel_id = channel.id,
            board_id = channel.board_id,
            action = ?action,
            "device_switched"
        );
        if let Err(err) = self
            .event_log
            .create(config.id, &config.device_type, action.event_type(), message)
            .await
        {
            warn!(target: "crop.device", farm_id = self.farm_id, error = %err, "event_log_failed");
        }
        if channel.notify {
            let _ = self.channels.publish_notification(FarmNotification {
                farm_id: self.farm_id,
                device_id: config.id,
                device_type: config.device_type.clone(),
                event_type: action.event_type().to_string(),
                message: message.to_string(),
                timestamp: self.clock.now(),
            });
        }
        // 设备已经切换，发布失败不改变调用结果
        if let Err(err) = self.channels.publish_device_state_change(DeviceStateChange {
            device_id: config.id,
            device_type: config.device_type.clone(),
            state,
            is_poll_event: false,
        }) {
            warn!(
                target: "crop.device",
                farm_id = self.farm_id,
                device_id = config.id,
                channel_id = channel.id,
                error = %err,
                "switch_state_change_dropped"
            );
            self.channels.report(Some(config.id), &err);
        }
        Ok(())
    }

    /// 持执行互斥调用设备并写回设备状态；互斥在返回前释放。
    async fn actuate_locked(
        &self,
        config: &DeviceConfig,
        channel: &Channel,
        action: Actuation,
    ) -> Result<DeviceState, FarmError> {
        let _guard = self.actuation.lock().await;
        let transport = self.transport()?;
        match action {
            Actuation::Switch(position) => {
                transport.switch(channel.board_id, position).await?;
            }
            Actuation::Timer(seconds) => {
                transport.timer_switch(channel.board_id, seconds).await?;
            }
        }
        let mut state = self.load_state(config).await?;
        state.set_channel(channel.board_id, action.position());
        self.device_states.save(config.id, &state).await?;
        Ok(state)
    }

    async fn load_state(&self, config: &DeviceConfig) -> Result<DeviceState, FarmError> {
        match self.device_states.get(config.id, ConsistencyLevel::Local).await {
            Ok(state) => Ok(state),
            Err(err) if err.is_not_found() => Ok(DeviceState::zeroed(config)),
            Err(err) => Err(err.into()),
        }
    }

    /// 直接写入指标值（虚拟设备使用），经状态监视器并入农场状态。
    pub async fn set_metric_value(&self, key: &str, value: f64) -> Result<(), FarmError> {
        let config = self.config()?;
        if config.metric_by_key(key).is_none() {
            return Err(FarmError::NotFound(format!(
                "metric {key} on device {}",
                config.device_type
            )));
        }
        let mut state = self.load_state(&config).await?;
        state.set_metric(key, value);
        self.device_states.save(config.id, &state).await?;
        self.channels.publish_device_state_change(DeviceStateChange {
            device_id: config.id,
            device_type: config.device_type.clone(),
            state,
            is_poll_event: false,
        })
    }

    pub async fn get_state(&self, consistency: ConsistencyLevel) -> Result<DeviceState, FarmError> {
        let config = self.config()?;
        match self.device_states.get(config.id, consistency).await {
            Ok(state) => Ok(state),
            Err(err) if err.is_not_found() => Ok(DeviceState::zeroed(&config)),
            Err(err) => Err(err.into()),
        }
    }

    /// 最近 30 天某指标的历史值。
    pub async fn get_history(&self, metric_key: &str) -> Result<Vec<f64>, FarmError> {
        let device_id = self.device_id();
        Ok(self.device_data.get_last_30_days(device_id, metric_key).await?)
    }

    /// 读取硬件 / 固件版本并写回设备配置，返回更新后的配置（由调用方持久化）。
    pub async fn refresh_system_info(&self) -> Result<DeviceConfig, FarmError> {
        let transport = self.transport()?;
        let SystemInfo {
            hardware_version,
            firmware_version,
        } = transport.refresh_system_info().await?;
        let mut slot = self.config.write().map_err(|_| lock_failed())?;
        slot.hardware_version = hardware_version;
        slot.firmware_version = firmware_version;
        Ok(slot.clone())
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(
                target: "crop.device",
                farm_id = self.farm_id,
                device_type = %self.device_type(),
                "device_stopped"
            );
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
enum Actuation {
    Switch(i32),
    Timer(u64),
}

impl Actuation {
    fn position(self) -> i32 {
        match self {
            Actuation::Switch(position) => position,
            Actuation::Timer(_) => 1,
        }
    }

    fn event_type(self) -> &'static str {
        match self {
            Actuation::Switch(_) => EVENT_SWITCH,
            Actuation::Timer(_) => EVENT_TIMER_SWITCH,
        }
    }
}

#[async_trait]
impl SwitchActuator for DeviceService {
    async fn switch(&self, board_id: usize, position: i32, message: &str) -> Result<(), RuleError> {
        DeviceService::switch(self, board_id, position, message)
            .await
            .map_err(|err| self.rule_error(board_id, err))
    }

    async fn timer_switch(&self, board_id: usize, seconds: u64, message: &str) -> Result<(), RuleError> {
        DeviceService::timer_switch(self, board_id, seconds, message)
            .await
            .map_err(|err| self.rule_error(board_id, err))
    }
}

impl DeviceService {
    fn rule_error(&self, board_id: usize, err: FarmError) -> RuleError {
        let channel_id = self
            .config
            .read()
            .ok()
            .and_then(|c| c.channel_by_board(board_id).map(|ch| ch.id))
            .unwrap_or_default();
        RuleError::actuation(channel_id, err.kind(), err.to_string())
    }
}
