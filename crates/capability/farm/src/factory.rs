//! 农场构建与启动
//!
//! [`FarmFactory`] 按农场配置中的存储选择构建存储、通道、设备服务与农场服务并注册；
//! `create_and_run` 初始化状态、启动订阅消费任务后运行农场。

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use crop_rules::{Clock, SystemClock};
use crop_storage::{PageQuery, StoreFactory, for_each_page};
use crop_transport::{LogNotifier, Notifier, TransportFactory};
use domain::{ConsistencyLevel, FarmConfig, FarmMode, StoreSelection};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::{DEFAULT_CHANNEL_CAPACITY, FarmChannels, FarmSubscriptions};
use crate::error::FarmError;
use crate::event_log::EventLogService;
use crate::farm::{FarmService, FarmStores};
use crate::registry::ServiceRegistry;
use crate::workflow::WorkflowService;

const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FarmFactory {
    stores: Arc<StoreFactory>,
    registry: Arc<ServiceRegistry>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    default_stores: StoreSelection,
    channel_capacity: usize,
    transport_timeout: Duration,
}

impl FarmFactory {
    pub fn new(stores: Arc<StoreFactory>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            stores,
            registry,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            default_stores: StoreSelection::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            transport_timeout: DEFAULT_TRANSPORT_TIMEOUT,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 枚举农场时使用的配置存储。
    pub fn with_default_stores(mut self, stores: StoreSelection) -> Self {
        self.default_stores = stores;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub fn store_factory(&self) -> Arc<StoreFactory> {
        self.stores.clone()
    }

    /// 构建农场服务并注册（设备服务、事件日志、工作流）。`server` 类型设备不建服务。
    pub fn build_service(
        &self,
        config: FarmConfig,
    ) -> Result<(Arc<FarmService>, FarmSubscriptions), FarmError> {
        let kinds = config.stores;
        let stores = FarmStores {
            farm_config: self.stores.farm_config_store(kinds.config)?,
            farm_state: self.stores.farm_state_store(kinds.state)?,
            device_state: self.stores.device_state_store(kinds.state)?,
            device_data: self.stores.device_data_store(kinds.data)?,
            event_log: self.stores.event_log_store(kinds.config)?,
        };
        let farm_id = config.id;
        let (channels, receivers, subscriptions) =
            FarmChannels::new(farm_id, self.channel_capacity);
        let event_log = Arc::new(EventLogService::new(farm_id, stores.event_log.clone()));
        let transports = TransportFactory::new(self.transport_timeout, stores.device_state.clone());
        let cluster = if config.mode == FarmMode::Cluster {
            Some(self.stores.replicator().ok_or_else(|| {
                FarmError::InvalidInput(format!("farm {farm_id} runs in cluster mode without a replicator"))
            })?)
        } else {
            None
        };

        let mut farm = FarmService::new(
            config.clone(),
            stores,
            channels,
            receivers,
            self.registry.clone(),
            event_log.clone(),
            transports,
            self.clock.clone(),
        );
        if let Some(replicator) = cluster {
            farm = farm.with_cluster(replicator);
        }
        let farm = Arc::new(farm);

        self.registry.add_farm(farm.clone())?;
        let registered = self
            .registry
            .add_event_log(farm_id, event_log)
            .and_then(|()| {
                self.registry.add_workflow(
                    farm_id,
                    Arc::new(WorkflowService::new(farm_id, self.registry.clone())),
                )
            })
            .and_then(|()| farm.sync_devices(&config));
        if let Err(err) = registered {
            let _ = self.registry.remove_farm_services(farm_id);
            return Err(err);
        }
        debug!(
            target: "crop.farm",
            farm_id,
            devices = self.registry.devices(farm_id).map(|d| d.len()).unwrap_or(0),
            "farm_service_built"
        );
        Ok((farm, subscriptions))
    }

    /// 构建、初始化状态并运行农场。
    pub async fn create_and_run(&self, config: FarmConfig) -> Result<Arc<FarmService>, FarmError> {
        let farm_id = config.id;
        let cluster = config.mode == FarmMode::Cluster;
        let (farm, subscriptions) = self.build_service(config)?;
        let started = async {
            farm.initialize_state(true).await?;
            if cluster {
                farm.run_cluster().await
            } else {
                farm.run()
            }
        }
        .await;
        if let Err(err) = started {
            let _ = farm.stop().await;
            error!(target: "crop.farm", farm_id, error = %err, "farm_start_failed");
            return Err(err);
        }
        spawn_subscription_drain(farm_id, subscriptions, self.notifier.clone());
        Ok(farm)
    }

    /// 启动存储中已有的全部农场；单个失败只记录日志。
    pub async fn load_all(&self) -> Result<usize, FarmError> {
        let store = self.stores.farm_config_store(self.default_stores.config)?;
        let mut configs = Vec::new();
        for_each_page(
            PageQuery::default(),
            |query| {
                let store = store.clone();
                async move { store.get_page(query, ConsistencyLevel::Local).await }
            },
            |config| {
                configs.push(config);
                ControlFlow::Continue(())
            },
        )
        .await?;
        let mut started = 0;
        for config in configs {
            let farm_id = config.id;
            match self.create_and_run(config).await {
                Ok(_) => started += 1,
                Err(err) => {
                    warn!(target: "crop.farm", farm_id, error = %err, "farm_load_failed");
                }
            }
        }
        info!(target: "crop.farm", started, "farms_loaded");
        Ok(started)
    }

    /// 消费新建农场通知并启动农场。
    pub fn spawn_provisioning_loop(
        self: &Arc<Self>,
        mut provisioned: Receiver<FarmConfig>,
    ) -> JoinHandle<()> {
        let factory = self.clone();
        tokio::spawn(async move {
            while let Some(config) = provisioned.recv().await {
                let farm_id = config.id;
                match factory.create_and_run(config).await {
                    Ok(_) => info!(target: "crop.farm", farm_id, "provisioned_farm_started"),
                    Err(err) => {
                        warn!(target: "crop.farm", farm_id, error = %err, "provisioned_farm_start_failed")
                    }
                }
            }
            debug!(target: "crop.farm", "provisioning_loop_stopped");
        })
    }

    /// 记录已注销的农场。
    pub fn spawn_deprovisioning_loop(&self, mut deprovisioned: Receiver<u64>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(farm_id) = deprovisioned.recv().await {
                info!(target: "crop.farm", farm_id, "farm_deprovisioned");
            }
        })
    }
}

/// 消费农场对外通道：通知交给 Notifier，错误与增量写日志。所有发送端释放后退出。
pub fn spawn_subscription_drain(
    farm_id: u64,
    subscriptions: FarmSubscriptions,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()> {
    let FarmSubscriptions {
        mut farm_config,
        mut device_state_delta,
        mut farm_error,
        mut farm_notify,
    } = subscriptions;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(config) = farm_config.recv() => {
                    debug!(target: "crop.farm", farm_id, mode = config.mode.as_str(), "farm_config_published");
                }
                Some(event) = device_state_delta.recv() => {
                    debug!(
                        target: "crop.farm",
                        farm_id,
                        device_type = %event.device_type,
                        metrics = event.delta.metrics.len(),
                        channels = event.delta.channels.len(),
                        "device_state_delta"
                    );
                }
                Some(event) = farm_error.recv() => {
                    warn!(
                        target: "crop.farm",
                        farm_id,
                        device_id = ?event.device_id,
                        kind = %event.kind,
                        message = %event.message,
                        "farm_error"
                    );
                }
                Some(notification) = farm_notify.recv() => {
                    if let Err(err) = notifier.notify(&notification).await {
                        warn!(target: "crop.notify", farm_id, error = %err, "notification_failed");
                    }
                }
                else => break,
            }
        }
        debug!(target: "crop.farm", farm_id, "subscription_drain_stopped");
    })
}
