//! 变更订阅适配器
//!
//! 把来源中的行变更落到运行中的农场：
//!
//! - 农场行：替换内存配置并经配置通道重新发布。
//! - 设备行：按设备 ID 找到所属农场，替换该设备配置后同上。
//! - 设备状态行：与农场当前状态求增量并发布；仅当本节点是该农场 leader 时更新内存状态。
//!
//! 来源断开后固定退避再重连；单条变更处理失败只记录日志。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crop_farm::{FarmService, ServiceRegistry};
use domain::{DeviceConfig, DeviceState, FarmConfig};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ChangeFeedError;
use crate::source::{ChangeEvent, ChangeSource};

pub const DEFAULT_RETRY: Duration = Duration::from_secs(30);

pub struct ChangeFeed {
    source: Arc<dyn ChangeSource>,
    registry: Arc<ServiceRegistry>,
    device_farms: RwLock<HashMap<u64, u64>>,
    retry: Duration,
}

/// 运行中的适配器任务。
pub struct ChangeFeedHandle {
    quit: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ChangeFeedHandle {
    pub async fn stop(self) {
        let _ = self.quit.send(());
        let _ = self.handle.await;
    }
}

impl ChangeFeed {
    pub fn new(source: Arc<dyn ChangeSource>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            source,
            registry,
            device_farms: RwLock::new(HashMap::new()),
            retry: DEFAULT_RETRY,
        }
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    pub fn spawn(self) -> ChangeFeedHandle {
        let (quit, quit_rx) = oneshot::channel();
        let feed = Arc::new(self);
        let handle = tokio::spawn(async move { feed.run(quit_rx).await });
        ChangeFeedHandle { quit, handle }
    }

    async fn run(&self, mut quit: oneshot::Receiver<()>) {
        info!(target: "crop.changefeed", retry_seconds = self.retry.as_secs(), "changefeed_started");
        loop {
            tokio::select! {
                _ = &mut quit => break,
                result = self.subscribe_once() => {
                    if let Err(err) = result {
                        warn!(target: "crop.changefeed", error = %err, "changefeed_disconnected");
                    }
                }
            }
            tokio::select! {
                _ = &mut quit => break,
                _ = tokio::time::sleep(self.retry) => {
                    debug!(target: "crop.changefeed", "changefeed_resubscribing");
                }
            }
        }
        info!(target: "crop.changefeed", "changefeed_stopped");
    }

    /// 连接一次来源并消费到断开为止。
    async fn subscribe_once(&self) -> Result<(), ChangeFeedError> {
        let mut subscription = self.source.connect().await?;
        self.rebuild_index()?;
        while let Some(event) = subscription.recv().await? {
            crop_telemetry::record_changefeed_event();
            if let Err(err) = self.handle(event) {
                warn!(target: "crop.changefeed", error = %err, kind = %err.kind(), "change_apply_failed");
            }
        }
        Err(ChangeFeedError::Disconnected("subscription closed".to_string()))
    }

    /// 依据当前注册表重建设备到农场的索引。
    pub fn rebuild_index(&self) -> Result<(), ChangeFeedError> {
        let mut index = HashMap::new();
        for farm in self.registry.farms()? {
            for device in farm.config()?.devices {
                index.insert(device.id, farm.id());
            }
        }
        let mut slot = self
            .device_farms
            .write()
            .map_err(|_| ChangeFeedError::Disconnected("lock failed".to_string()))?;
        *slot = index;
        Ok(())
    }

    pub fn farm_of_device(&self, device_id: u64) -> Option<u64> {
        self.device_farms
            .read()
            .ok()
            .and_then(|index| index.get(&device_id).copied())
    }

    fn index_devices(&self, farm_id: u64, devices: &[DeviceConfig]) {
        if let Ok(mut index) = self.device_farms.write() {
            index.retain(|_, owner| *owner != farm_id);
            for device in devices {
                index.insert(device.id, farm_id);
            }
        }
    }

    /// 处理单条变更；变更所属农场未在本进程运行时忽略。
    pub fn handle(&self, event: ChangeEvent) -> Result<(), ChangeFeedError> {
        match event {
            ChangeEvent::Farm(config) => self.on_farm(config),
            ChangeEvent::Device { farm_id, device } => self.on_device(farm_id, device),
            ChangeEvent::DeviceState { device_id, state } => self.on_device_state(device_id, state),
        }
    }

    fn running_farm(&self, farm_id: u64) -> Option<Arc<FarmService>> {
        match self.registry.get_farm(farm_id) {
            Ok(farm) => Some(farm),
            Err(_) => {
                debug!(target: "crop.changefeed", farm_id, "change_for_unknown_farm");
                None
            }
        }
    }

    fn on_farm(&self, config: FarmConfig) -> Result<(), ChangeFeedError> {
        let Some(farm) = self.running_farm(config.id) else {
            return Ok(());
        };
        self.index_devices(config.id, &config.devices);
        if farm.config()? == config {
            return Ok(());
        }
        debug!(target: "crop.changefeed", farm_id = config.id, "farm_row_changed");
        farm.apply_config(config)?;
        Ok(())
    }

    fn on_device(&self, farm_id: u64, device: DeviceConfig) -> Result<(), ChangeFeedError> {
        let farm_id = if farm_id != 0 {
            farm_id
        } else {
            match self.farm_of_device(device.id) {
                Some(farm_id) => farm_id,
                None => {
                    debug!(target: "crop.changefeed", device_id = device.id, "device_without_farm");
                    return Ok(());
                }
            }
        };
        let Some(farm) = self.running_farm(farm_id) else {
            return Ok(());
        };
        let mut config = farm.config()?;
        if config.device_by_id(device.id) == Some(&device) {
            return Ok(());
        }
        debug!(
            target: "crop.changefeed",
            farm_id,
            device_id = device.id,
            device_type = %device.device_type,
            "device_row_changed"
        );
        config.set_device(device);
        self.index_devices(farm_id, &config.devices);
        farm.apply_config(config)?;
        Ok(())
    }

    fn on_device_state(&self, device_id: u64, state: DeviceState) -> Result<(), ChangeFeedError> {
        let Some(farm_id) = self.farm_of_device(device_id) else {
            debug!(target: "crop.changefeed", device_id, "device_without_farm");
            return Ok(());
        };
        let Some(farm) = self.running_farm(farm_id) else {
            return Ok(());
        };
        let config = farm.config()?;
        let Some(device) = config.device_by_id(device_id) else {
            return Ok(());
        };
        let delta = farm.apply_device_state(&device.device_type, state, farm.is_leader())?;
        if !delta.is_empty() {
            debug!(
                target: "crop.changefeed",
                farm_id,
                device_id,
                metrics = delta.metrics.len(),
                channels = delta.channels.len(),
                "device_state_row_changed"
            );
        }
        Ok(())
    }
}
