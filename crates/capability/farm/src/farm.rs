//! 农场服务（控制环编排）
//!
//! 每个运行中的农场持有四个长期任务：状态监视器、配置监视器、设备状态监视器与轮询定时器。
//! `stop` 按固定顺序发出退出信号并等待任务结束，是唯一的释放入口。
//!
//! 配置变更只经 FarmConfigChangeChan 流向配置监视器，监视器只向 FarmConfigChan 发布，
//! 不回调任何修改方法。集群模式下非 leader 节点仍发布增量，但不写状态、不持久化、不执行规则。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crop_cluster::{KvClient, Replicator, groups};
use crop_rules::{BackoffTable, Clock, ManageReport, RuleEngine, ScheduleService};
use crop_storage::{
    DeviceDataStore, DeviceStateStore, EventLogStore, FarmConfigStore, FarmStateStore,
    StorageError,
};
use crop_transport::TransportFactory;
use domain::{
    ConsistencyLevel, DeviceConfig, DeviceState, DeviceStateChange, DeviceStateDelta,
    DeviceStateDeltaEvent, FarmConfig, FarmMode, FarmNotification, FarmState, Schedule, Workflow,
    diff,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::channels::{FarmChannels, WatcherReceivers};
use crate::device::DeviceService;
use crate::error::FarmError;
use crate::event_log::EventLogService;
use crate::registry::ServiceRegistry;

const INIT_RETRIES: u32 = 5;
const INIT_RETRY_STEP: Duration = Duration::from_millis(200);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

pub const EVENT_ALARM: &str = "alarm";

/// 农场使用的存储集合。
#[derive(Clone)]
pub struct FarmStores {
    pub farm_config: Arc<dyn FarmConfigStore>,
    pub farm_state: Arc<dyn FarmStateStore>,
    pub device_state: Arc<dyn DeviceStateStore>,
    pub device_data: Arc<dyn DeviceDataStore>,
    pub event_log: Arc<dyn EventLogStore>,
}

struct Worker {
    name: &'static str,
    quit: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct FarmService {
    farm_id: u64,
    config: RwLock<FarmConfig>,
    state: RwLock<FarmState>,
    /// 配置监视器最后一次应用的模式。
    applied_mode: Mutex<FarmMode>,
    backoff: Mutex<BackoffTable>,
    /// 已告警且尚未回到区间内的 (设备, 指标)。
    alarms: Mutex<HashSet<(u64, String)>>,
    stores: FarmStores,
    channels: FarmChannels,
    receivers: Mutex<Option<WatcherReceivers>>,
    workers: Mutex<Vec<Worker>>,
    running: AtomicBool,
    registry: Arc<ServiceRegistry>,
    event_log: Arc<EventLogService>,
    transports: TransportFactory,
    clock: Arc<dyn Clock>,
    cluster: Option<Arc<dyn Replicator>>,
}

fn lock_failed() -> FarmError {
    FarmError::Storage(StorageError::new("lock failed"))
}

impl FarmService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: FarmConfig,
        stores: FarmStores,
        channels: FarmChannels,
        receivers: WatcherReceivers,
        registry: Arc<ServiceRegistry>,
        event_log: Arc<EventLogService>,
        transports: TransportFactory,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            farm_id: config.id,
            state: RwLock::new(FarmState::new(config.id)),
            applied_mode: Mutex::new(config.mode),
            config: RwLock::new(config),
            backoff: Mutex::new(BackoffTable::new()),
            alarms: Mutex::new(HashSet::new()),
            stores,
            channels,
            receivers: Mutex::new(Some(receivers)),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            registry,
            event_log,
            transports,
            clock,
            cluster: None,
        }
    }

    /// 集群模式：写入前判定本节点是否为该农场的 leader。
    pub fn with_cluster(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.cluster = Some(replicator);
        self
    }

    pub fn id(&self) -> u64 {
        self.farm_id
    }

    pub fn organization_id(&self) -> u64 {
        self.config.read().map(|c| c.organization_id).unwrap_or_default()
    }

    pub fn config(&self) -> Result<FarmConfig, FarmError> {
        Ok(self.config.read().map_err(|_| lock_failed())?.clone())
    }

    pub fn state(&self) -> Result<FarmState, FarmError> {
        Ok(self.state.read().map_err(|_| lock_failed())?.clone())
    }

    pub fn mode(&self) -> FarmMode {
        self.config.read().map(|c| c.mode).unwrap_or_default()
    }

    pub fn channels(&self) -> &FarmChannels {
        &self.channels
    }

    pub fn stores(&self) -> &FarmStores {
        &self.stores
    }

    pub fn event_log(&self) -> Arc<EventLogService> {
        self.event_log.clone()
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub fn backoff(&self) -> Result<BackoffTable, FarmError> {
        Ok(self.backoff.lock().map_err(|_| lock_failed())?.clone())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_leader(&self) -> bool {
        match &self.cluster {
            Some(replicator) => replicator.is_leader(groups::farm_config(self.farm_id)),
            None => true,
        }
    }

    pub fn device(&self, device_type: &str) -> Result<Arc<DeviceService>, FarmError> {
        self.registry.get_device(self.farm_id, device_type)
    }

    pub fn device_by_id(&self, device_id: u64) -> Result<Arc<DeviceService>, FarmError> {
        self.registry.get_device_by_id(self.farm_id, device_id)
    }

    pub fn devices(&self) -> Result<Vec<Arc<DeviceService>>, FarmError> {
        self.registry.devices(self.farm_id)
    }

    /// 让已注册的设备服务与配置一致：新增设备建服务，已删除或停用的设备停止并注销。
    pub fn sync_devices(&self, config: &FarmConfig) -> Result<(), FarmError> {
        let active: Vec<&DeviceConfig> = config.active_devices().collect();
        for existing in self.registry.devices(self.farm_id)? {
            let device_type = existing.device_type();
            if !active.iter().any(|d| d.device_type == device_type) {
                existing.stop();
                self.registry.remove_device(self.farm_id, &device_type)?;
            }
        }
        for device in active {
            match self.registry.get_device(self.farm_id, &device.device_type) {
                Ok(service) => service.set_config(device.clone())?,
                Err(FarmError::NotFound(_)) => {
                    let transport = self.transports.build(config.mode, device)?;
                    let service = Arc::new(DeviceService::new(
                        device.clone(),
                        transport,
                        self.stores.device_state.clone(),
                        self.stores.device_data.clone(),
                        self.event_log.clone(),
                        self.channels.clone(),
                        self.clock.clone(),
                    ));
                    self.registry.add_device(self.farm_id, service)?;
                    debug!(
                        target: "crop.farm",
                        farm_id = self.farm_id,
                        device_type = %device.device_type,
                        "device_service_attached"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// 为每个启用设备生成零值状态并写入设备状态存储；`persist` 时同时写入农场状态存储。
    pub async fn initialize_state(&self, persist: bool) -> Result<(), FarmError> {
        let config = self.config()?;
        let mut state = FarmState::new(self.farm_id);
        for device in config.active_devices() {
            let device_state = DeviceState::zeroed(device);
            let store = self.stores.device_state.clone();
            let saved = device_state.clone();
            let device_id = device.id;
            self.tolerate_follower(
                retry_locked(|| {
                    let store = store.clone();
                    let saved = saved.clone();
                    async move { store.save(device_id, &saved).await }
                })
                .await,
            )?;
            state.put_device(device.device_type.clone(), device_state);
        }
        {
            let mut slot = self.state.write().map_err(|_| lock_failed())?;
            *slot = state.clone();
        }
        if persist {
            let store = self.stores.farm_state.clone();
            self.tolerate_follower(
                retry_locked(|| {
                    let store = store.clone();
                    let state = state.clone();
                    async move { store.save(&state).await }
                })
                .await,
            )?;
        }
        info!(
            target: "crop.farm",
            farm_id = self.farm_id,
            devices = state.devices.len(),
            persist,
            "farm_state_initialized"
        );
        Ok(())
    }

    fn tolerate_follower(&self, result: Result<(), StorageError>) -> Result<(), FarmError> {
        match result {
            Err(err) if err.is_not_leader() => {
                debug!(target: "crop.farm", farm_id = self.farm_id, "not_leader");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// 启动监视器与轮询定时器。重复调用直接返回；停止后不能再次启动。
    pub fn run(self: &Arc<Self>) -> Result<(), FarmError> {
        let receivers = {
            let mut slot = self.receivers.lock().map_err(|_| lock_failed())?;
            if self.running.load(Ordering::SeqCst) {
                info!(target: "crop.farm", farm_id = self.farm_id, "farm_already_running");
                return Ok(());
            }
            slot.take().ok_or_else(|| {
                FarmError::Conflict(format!("farm {} was stopped and cannot restart", self.farm_id))
            })?
        };
        self.running.store(true, Ordering::SeqCst);

        let WatcherReceivers {
            farm_config_change,
            farm_state_change,
            device_state_change,
        } = receivers;
        let mut workers = Vec::with_capacity(4);
        workers.push(self.spawn_worker("state", |farm, quit| {
            farm.state_watcher(farm_state_change, quit)
        }));
        workers.push(self.spawn_worker("config", |farm, quit| {
            farm.config_watcher(farm_config_change, quit)
        }));
        workers.push(self.spawn_worker("device_state", |farm, quit| {
            farm.device_state_watcher(device_state_change, quit)
        }));
        let interval = self.config()?.interval;
        if interval > 0 {
            let period = Duration::from_secs(interval);
            workers.push(self.spawn_worker("poll", move |farm, quit| farm.poll_loop(period, quit)));
        }
        let mut slot = self.workers.lock().map_err(|_| lock_failed())?;
        *slot = workers;
        info!(
            target: "crop.farm",
            farm_id = self.farm_id,
            interval,
            leader = self.is_leader(),
            "farm_running"
        );
        Ok(())
    }

    /// 集群模式启动：先等待农场配置复制组就绪，再启动任务。
    pub async fn run_cluster(self: &Arc<Self>) -> Result<(), FarmError> {
        let replicator = self
            .cluster
            .clone()
            .ok_or_else(|| FarmError::InvalidInput(format!("farm {} has no cluster", self.farm_id)))?;
        let durable = self.config()?.stores.config == domain::StoreKind::ReplicatedDisk;
        KvClient::new(replicator, groups::farm_config(self.farm_id))
            .ensure_group(durable, DEFAULT_READY_TIMEOUT)
            .await?;
        self.run()
    }

    fn spawn_worker<F, Fut>(self: &Arc<Self>, name: &'static str, task: F) -> Worker
    where
        F: FnOnce(Arc<Self>, oneshot::Receiver<()>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (quit, quit_rx) = oneshot::channel();
        let handle = tokio::spawn(task(self.clone(), quit_rx));
        Worker { name, quit, handle }
    }

    /// 停止农场：按 状态 → 配置 → 设备状态 → 轮询 的顺序退出任务，关闭状态存储，
    /// 停止设备服务并从注册表注销。
    pub async fn stop(&self) -> Result<(), FarmError> {
        let workers = {
            let mut slot = self.workers.lock().map_err(|_| lock_failed())?;
            std::mem::take(&mut *slot)
        };
        {
            // 未启动过的农场同样不能再启动。
            let mut slot = self.receivers.lock().map_err(|_| lock_failed())?;
            slot.take();
        }
        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            let _ = worker.quit.send(());
            handles.push((worker.name, worker.handle));
        }
        for (name, handle) in handles {
            if let Err(err) = handle.await {
                warn!(target: "crop.farm", farm_id = self.farm_id, worker = name, error = %err, "farm_worker_join_failed");
            }
        }
        self.stores.farm_state.close().await;
        self.stores.device_state.close().await;
        for device in self.registry.devices(self.farm_id)? {
            device.stop();
        }
        self.registry.remove_farm_services(self.farm_id)?;
        self.running.store(false, Ordering::SeqCst);
        info!(target: "crop.farm", farm_id = self.farm_id, "farm_stopped");
        Ok(())
    }

    /// 轮询全部设备；单个设备失败已由设备服务上报。
    pub async fn poll(&self) -> Result<(), FarmError> {
        for device in self.registry.devices(self.farm_id)? {
            let _ = device.poll().await;
        }
        Ok(())
    }

    /// 对单个设备执行规则求值。维护模式下跳过。
    pub async fn manage(
        &self,
        device: &DeviceConfig,
        state: &FarmState,
    ) -> Result<ManageReport, FarmError> {
        let config = self.config()?;
        if config.mode == FarmMode::Maintenance {
            debug!(target: "crop.farm", farm_id = self.farm_id, "manage_skipped_maintenance");
            return Ok(ManageReport::default());
        }
        let service = self.device(&device.device_type)?;
        let engine = RuleEngine::new(ScheduleService::new(self.clock.clone(), &config.timezone));
        let mut backoff = self.backoff()?;
        let report = engine
            .manage_device(&config, device, state, &mut backoff, service.as_ref())
            .await;
        {
            let mut slot = self.backoff.lock().map_err(|_| lock_failed())?;
            *slot = backoff;
        }
        for err in &report.errors {
            crop_telemetry::record_rule_error();
            self.channels
                .report(Some(device.id), &FarmError::Rule(err.clone()));
        }
        if !report.updated_schedules.is_empty() {
            self.save_schedules(device.id, &report.updated_schedules).await?;
        }
        Ok(report)
    }

    /// 写回执行计数等排程字段（不重新发布配置）。
    async fn save_schedules(&self, device_id: u64, schedules: &[Schedule]) -> Result<(), FarmError> {
        let (config, device) = {
            let mut config = self.config.write().map_err(|_| lock_failed())?;
            if let Some(device) = config.devices.iter_mut().find(|d| d.id == device_id) {
                for schedule in schedules {
                    if let Some(channel) = device.channel_mut(schedule.channel_id) {
                        if let Some(slot) = channel.schedule_mut(schedule.id) {
                            *slot = schedule.clone();
                        }
                    }
                }
            }
            (config.clone(), config.device_by_id(device_id).cloned())
        };
        if let Some(device) = device {
            if let Ok(service) = self.device(&device.device_type) {
                service.set_config(device)?;
            }
        }
        self.stores.farm_config.save(&config).await?;
        Ok(())
    }

    /// 替换整个农场配置并交给配置监视器。
    pub async fn set_config(&self, config: FarmConfig) -> Result<(), FarmError> {
        if config.id != self.farm_id {
            return Err(FarmError::InvalidInput(format!(
                "config for farm {} sent to farm {}",
                config.id, self.farm_id
            )));
        }
        config.validate()?;
        self.stores.farm_config.save(&config).await?;
        self.apply_config(config)
    }

    /// 持久化单个设备配置，刷新农场配置并交给配置监视器。
    pub async fn set_device_config(&self, mut device: DeviceConfig) -> Result<(), FarmError> {
        if device.farm_id == 0 {
            device.farm_id = self.farm_id;
        }
        if device.farm_id != self.farm_id {
            return Err(FarmError::InvalidInput(format!(
                "device {} belongs to farm {}",
                device.id, device.farm_id
            )));
        }
        let refreshed = self.stores.farm_config.save_device(&device).await?;
        self.apply_config(refreshed)
    }

    /// 更新单条设备设置。只发往 FarmConfigChangeChan，不经 `set_config`。
    pub async fn set_config_value(
        &self,
        device_id: u64,
        key: &str,
        value: &str,
    ) -> Result<(), FarmError> {
        let refreshed = self
            .stores
            .farm_config
            .set_device_setting(self.farm_id, device_id, key, value)
            .await?;
        self.apply_config(refreshed)
    }

    /// 外部来源（变更订阅）的新配置：更新内存快照并交给配置监视器。
    pub fn apply_config(&self, config: FarmConfig) -> Result<(), FarmError> {
        {
            let mut slot = self.config.write().map_err(|_| lock_failed())?;
            *slot = config.clone();
        }
        self.sync_devices(&config)?;
        self.channels.publish_config_change(config)
    }

    /// 读取设备版本信息并写回设备配置。
    pub async fn refresh_system_info(&self, device_type: &str) -> Result<DeviceConfig, FarmError> {
        let device = self.device(device_type)?.refresh_system_info().await?;
        self.set_device_config(device.clone()).await?;
        Ok(device)
    }

    /// 直接修改农场状态中的指标，持久化后发布最小增量。
    pub async fn set_metric_value(
        &self,
        device_type: &str,
        key: &str,
        value: f64,
    ) -> Result<(), FarmError> {
        let device = self
            .config()?
            .device_by_type(device_type)
            .cloned()
            .ok_or_else(|| FarmError::NotFound(format!("device {device_type}")))?;
        if device.metric_by_key(key).is_none() {
            return Err(FarmError::NotFound(format!("metric {key} on device {device_type}")));
        }
        self.mutate_state(&device, |state| state.set_metric(key, value))
            .await?;
        self.channels.publish_delta(DeviceStateDeltaEvent {
            farm_id: self.farm_id,
            device_type: device_type.to_string(),
            delta: DeviceStateDelta::metric(key, value),
        })
    }

    /// 直接修改农场状态中的通道位置，持久化后发布最小增量。
    pub async fn set_switch_value(
        &self,
        device_type: &str,
        channel_id: u64,
        value: i32,
    ) -> Result<(), FarmError> {
        let device = self
            .config()?
            .device_by_type(device_type)
            .cloned()
            .ok_or_else(|| FarmError::NotFound(format!("device {device_type}")))?;
        let board_id = device
            .channel_by_id(channel_id)
            .map(|c| c.board_id)
            .ok_or_else(|| FarmError::NotFound(format!("channel {channel_id} on device {device_type}")))?;
        self.mutate_state(&device, |state| state.set_channel(board_id, value))
            .await?;
        self.channels.publish_delta(DeviceStateDeltaEvent {
            farm_id: self.farm_id,
            device_type: device_type.to_string(),
            delta: DeviceStateDelta::channel(board_id, value),
        })
    }

    async fn mutate_state<F>(&self, device: &DeviceConfig, mutate: F) -> Result<(), FarmError>
    where
        F: FnOnce(&mut DeviceState),
    {
        let (farm_state, device_state) = {
            let mut state = self.state.write().map_err(|_| lock_failed())?;
            let entry = state
                .devices
                .entry(device.device_type.clone())
                .or_insert_with(|| DeviceState::zeroed(device));
            mutate(entry);
            entry.id = device.id;
            let device_state = entry.clone();
            (state.clone(), device_state)
        };
        self.stores.farm_state.save(&farm_state).await?;
        self.stores.device_state.save(device.id, &device_state).await?;
        Ok(())
    }

    /// 将某设备的新状态并入内存快照（`update` 为假时只计算并发布增量）。
    pub fn apply_device_state(
        &self,
        device_type: &str,
        next: DeviceState,
        update: bool,
    ) -> Result<DeviceStateDelta, FarmError> {
        let delta = {
            let prev = self.state.read().map_err(|_| lock_failed())?;
            diff(prev.device(device_type), &next)
        };
        if update {
            let mut state = self.state.write().map_err(|_| lock_failed())?;
            state.put_device(device_type.to_string(), next);
        }
        if !delta.is_empty() {
            let _ = self.channels.publish_delta(DeviceStateDeltaEvent {
                farm_id: self.farm_id,
                device_type: device_type.to_string(),
                delta: delta.clone(),
            });
        }
        Ok(delta)
    }

    /// 后台执行工作流，返回执行任务句柄。
    pub fn run_workflow(
        &self,
        workflow_id: u64,
    ) -> Result<JoinHandle<Result<Workflow, FarmError>>, FarmError> {
        self.registry.get_workflow(self.farm_id)?.run(workflow_id)
    }

    /// 写入或替换工作流（只持久化，不重新发布配置）。
    pub async fn save_workflow(&self, mut workflow: Workflow) -> Result<Workflow, FarmError> {
        workflow.farm_id = self.farm_id;
        for step in &mut workflow.steps {
            step.workflow_id = workflow.id;
        }
        let config = {
            let mut config = self.config.write().map_err(|_| lock_failed())?;
            config.set_workflow(workflow.clone());
            config.clone()
        };
        self.stores.farm_config.save(&config).await?;
        Ok(workflow)
    }

    pub async fn delete_workflow(&self, workflow_id: u64) -> Result<(), FarmError> {
        let config = {
            let mut config = self.config.write().map_err(|_| lock_failed())?;
            let before = config.workflows.len();
            config.workflows.retain(|w| w.id != workflow_id);
            if config.workflows.len() == before {
                return Err(FarmError::NotFound(format!("workflow {workflow_id}")));
            }
            config.clone()
        };
        self.stores.farm_config.save(&config).await?;
        Ok(())
    }

    async fn state_watcher(
        self: Arc<Self>,
        mut changes: tokio::sync::mpsc::Receiver<FarmState>,
        mut quit: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut quit => break,
                next = changes.recv() => {
                    let Some(next) = next else { break };
                    for (device_type, device_state) in next.devices {
                        if let Err(err) = self.apply_device_state(&device_type, device_state, true) {
                            warn!(target: "crop.farm", farm_id = self.farm_id, error = %err, "farm_state_apply_failed");
                            self.channels.report(None, &err);
                        }
                    }
                }
            }
        }
        debug!(target: "crop.farm", farm_id = self.farm_id, "state_watcher_stopped");
    }

    async fn config_watcher(
        self: Arc<Self>,
        mut changes: tokio::sync::mpsc::Receiver<FarmConfig>,
        mut quit: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut quit => break,
                next = changes.recv() => {
                    let Some(config) = next else { break };
                    if let Err(err) = self.on_config_change(&config) {
                        warn!(target: "crop.farm", farm_id = self.farm_id, error = %err, "farm_config_apply_failed");
                        self.channels.report(None, &err);
                    }
                    let _ = self.channels.publish_config(config);
                }
            }
        }
        debug!(target: "crop.farm", farm_id = self.farm_id, "config_watcher_stopped");
    }

    fn on_config_change(&self, config: &FarmConfig) -> Result<(), FarmError> {
        let previous = {
            let mut applied = self.applied_mode.lock().map_err(|_| lock_failed())?;
            std::mem::replace(&mut *applied, config.mode)
        };
        if previous == config.mode {
            return Ok(());
        }
        info!(
            target: "crop.farm",
            farm_id = self.farm_id,
            from = previous.as_str(),
            to = config.mode.as_str(),
            "farm_mode_changed"
        );
        for device in self.registry.devices(self.farm_id)? {
            let device_config = device.config()?;
            let transport = self.transports.build(config.mode, &device_config)?;
            device.set_mode(config.mode, transport)?;
        }
        Ok(())
    }

    async fn device_state_watcher(
        self: Arc<Self>,
        mut changes: tokio::sync::mpsc::Receiver<DeviceStateChange>,
        mut quit: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut quit => break,
                next = changes.recv() => {
                    let Some(change) = next else { break };
                    let device_id = change.device_id;
                    match self.on_device_state_change(change).await {
                        Ok(()) => {}
                        Err(err) if err.is_not_leader() => {
                            debug!(target: "crop.farm", farm_id = self.farm_id, device_id, "not_leader");
                        }
                        Err(err) => {
                            warn!(
                                target: "crop.farm",
                                farm_id = self.farm_id,
                                device_id,
                                error = %err,
                                "device_state_change_failed"
                            );
                            self.channels.report(Some(device_id), &err);
                        }
                    }
                }
            }
        }
        debug!(target: "crop.farm", farm_id = self.farm_id, "device_state_watcher_stopped");
    }

    /// 设备状态变更：发布增量；leader 上更新快照、写时序数据、检查告警，轮询事件再执行规则。
    pub async fn on_device_state_change(&self, change: DeviceStateChange) -> Result<(), FarmError> {
        let leader = self.is_leader();
        if !leader {
            self.apply_device_state(&change.device_type, change.state, false)?;
            debug!(
                target: "crop.farm",
                farm_id = self.farm_id,
                device_id = change.device_id,
                "not_leader"
            );
            return Ok(());
        }
        self.apply_device_state(&change.device_type, change.state.clone(), true)?;
        self.stores
            .device_data
            .save(change.device_id, &change.state)
            .await?;
        let config = self.config()?;
        let Some(device) = config.device_by_id(change.device_id).cloned() else {
            return Err(FarmError::NotFound(format!("device {}", change.device_id)));
        };
        self.check_alarms(&device, &change.state)?;
        if change.is_poll_event {
            let snapshot = self.state()?;
            self.manage(&device, &snapshot).await?;
        }
        Ok(())
    }

    fn check_alarms(&self, device: &DeviceConfig, state: &DeviceState) -> Result<(), FarmError> {
        let mut raised = Vec::new();
        {
            let mut alarms = self.alarms.lock().map_err(|_| lock_failed())?;
            for metric in device.metrics.iter().filter(|m| m.notify) {
                let Some(value) = state.metric(&metric.key) else {
                    continue;
                };
                let key = (device.id, metric.key.clone());
                if metric.is_alarming(value) {
                    if alarms.insert(key) {
                        raised.push(format!(
                            "{} {} = {value} outside [{}, {}]",
                            device.device_type, metric.key, metric.alarm_low, metric.alarm_high
                        ));
                    }
                } else {
                    alarms.remove(&key);
                }
            }
        }
        for message in raised {
            warn!(
                target: "crop.farm",
                farm_id = self.farm_id,
                device_id = device.id,
                message = %message,
                "metric_alarm"
            );
            let _ = self.channels.publish_notification(FarmNotification {
                farm_id: self.farm_id,
                device_id: device.id,
                device_type: device.device_type.clone(),
                event_type: EVENT_ALARM.to_string(),
                message,
                timestamp: self.clock.now(),
            });
        }
        Ok(())
    }

    async fn poll_loop(self: Arc<Self>, period: Duration, mut quit: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval 的首个 tick 立即返回。
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = &mut quit => break,
                _ = ticker.tick() => {
                    if !self.is_leader() {
                        debug!(target: "crop.farm", farm_id = self.farm_id, "poll_skipped_not_leader");
                        continue;
                    }
                    if let Err(err) = self.poll().await {
                        warn!(target: "crop.farm", farm_id = self.farm_id, error = %err, "farm_poll_failed");
                    }
                }
            }
        }
        debug!(target: "crop.farm", farm_id = self.farm_id, "poll_loop_stopped");
    }

    /// 读取持久化的农场配置（按农场一致性级别）。
    pub async fn load_config(&self) -> Result<FarmConfig, FarmError> {
        let consistency = self
            .config
            .read()
            .map(|c| c.consistency)
            .unwrap_or(ConsistencyLevel::Local);
        Ok(self.stores.farm_config.get(self.farm_id, consistency).await?)
    }
}

/// 表锁冲突时线性退避重试。
async fn retry_locked<F, Fut>(mut op: F) -> Result<(), StorageError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), StorageError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_locked() && attempt < INIT_RETRIES => {
                attempt += 1;
                warn!(target: "crop.farm", attempt, error = %err, "store_locked_retry");
                tokio::time::sleep(INIT_RETRY_STEP * attempt).await;
            }
            other => return other,
        }
    }
}
