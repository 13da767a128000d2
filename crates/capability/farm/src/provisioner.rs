//! 农场开通与注销

use std::sync::Arc;
use std::time::Duration;

use crop_cluster::{KvClient, groups};
use crop_storage::StoreFactory;
use domain::{
    Channel, ConsistencyLevel, DeviceConfig, FarmConfig, FarmMode, Metric, Organization,
    Permission, SERVER_DEVICE_TYPE, StoreKind, StoreSelection, User, random_id, roles,
};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::info;

use crate::error::FarmError;
use crate::registry::ServiceRegistry;
use crate::session::Session;

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_CHANNEL_COUNT: usize = 4;

/// 开通参数。
#[derive(Debug, Clone)]
pub struct ProvisionParams {
    pub name: String,
    pub organization_name: String,
    pub mode: FarmMode,
    pub interval: u64,
    pub timezone: String,
    pub stores: StoreSelection,
    pub default_devices: bool,
}

impl Default for ProvisionParams {
    fn default() -> Self {
        Self {
            name: "farm".to_string(),
            organization_name: "default".to_string(),
            mode: FarmMode::Virtual,
            interval: DEFAULT_INTERVAL_SECONDS,
            timezone: "UTC".to_string(),
            stores: StoreSelection::default(),
            default_devices: true,
        }
    }
}

pub struct FarmProvisioner {
    stores: Arc<StoreFactory>,
    registry: Arc<ServiceRegistry>,
    provisioned: Sender<FarmConfig>,
    deprovisioned: Sender<u64>,
    ready_timeout: Duration,
}

impl FarmProvisioner {
    /// 返回开通器及 (新建农场, 已注销农场) 两个接收端。
    pub fn new(
        stores: Arc<StoreFactory>,
        registry: Arc<ServiceRegistry>,
        capacity: usize,
    ) -> (Self, Receiver<FarmConfig>, Receiver<u64>) {
        let (provisioned, provisioned_rx) = mpsc::channel(capacity.max(1));
        let (deprovisioned, deprovisioned_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                stores,
                registry,
                provisioned,
                deprovisioned,
                ready_timeout: DEFAULT_READY_TIMEOUT,
            },
            provisioned_rx,
            deprovisioned_rx,
        )
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// 新建农场：默认组织、用户的管理员权限、可选的默认设备；集群模式下先建复制组。
    pub async fn provision(
        &self,
        user: &User,
        params: ProvisionParams,
    ) -> Result<FarmConfig, FarmError> {
        if params.name.trim().is_empty() {
            return Err(FarmError::InvalidInput("farm name is empty".to_string()));
        }
        let farm_id = random_id();
        let organization = Organization {
            id: random_id(),
            name: params.organization_name.clone(),
        };
        let permission = Permission {
            user_id: user.id,
            organization_id: organization.id,
            farm_id,
            role_id: roles::ADMIN,
        };
        let devices = if params.default_devices {
            default_devices(farm_id)
        } else {
            Vec::new()
        };
        let config = FarmConfig {
            id: farm_id,
            organization_id: organization.id,
            name: params.name,
            mode: params.mode,
            interval: params.interval,
            timezone: params.timezone,
            consistency: ConsistencyLevel::Local,
            stores: params.stores,
            devices,
            workflows: Vec::new(),
            permissions: vec![permission.clone()],
        };
        config.validate()?;

        if config.mode == FarmMode::Cluster || config.stores.config.is_replicated() {
            self.create_groups(&config).await?;
        }

        let permissions = self.stores.permission_store(config.stores.config)?;
        permissions.save_user(user).await?;
        permissions.save_organization(&organization).await?;
        permissions.save(&permission).await?;
        self.stores
            .farm_config_store(config.stores.config)?
            .save(&config)
            .await?;

        info!(
            target: "crop.farm",
            farm_id,
            user_id = user.id,
            devices = config.devices.len(),
            mode = config.mode.as_str(),
            "farm_provisioned"
        );
        self.provisioned
            .send(config.clone())
            .await
            .map_err(|_| FarmError::ChannelClosed("farm_provisioner"))?;
        Ok(config)
    }

    async fn create_groups(&self, config: &FarmConfig) -> Result<(), FarmError> {
        let replicator = self.stores.replicator().ok_or_else(|| {
            FarmError::InvalidInput(format!("farm {} requires a replicator", config.id))
        })?;
        let durable = config.stores.config == StoreKind::ReplicatedDisk;
        let mut group_ids = vec![
            groups::farm_config(config.id),
            groups::farm_state(config.id),
            groups::event_log(config.id),
        ];
        for device in config.active_devices() {
            group_ids.push(groups::device_state(device.id));
            group_ids.push(groups::device_data(device.id));
        }
        for group_id in group_ids {
            KvClient::new(replicator.clone(), group_id)
                .ensure_group(durable, self.ready_timeout)
                .await?;
        }
        Ok(())
    }

    /// 注销农场：仅管理员可操作；停止运行中的农场、删除存储记录并发布注销通知。
    pub async fn deprovision(&self, user: &User, farm_id: u64) -> Result<(), FarmError> {
        let farm = self.registry.get_farm(farm_id)?;
        let config = farm.config()?;
        let permissions = self.stores.permission_store(config.stores.config)?;
        Session::new(user.clone(), farm_id)
            .authorize_admin(permissions.as_ref())
            .await?;

        farm.stop().await?;
        let stores = farm.stores().clone();
        for device in &config.devices {
            stores.device_state.delete(device.id).await?;
            stores.device_data.delete(device.id).await?;
        }
        stores.event_log.delete_by_farm(farm_id).await?;
        stores.farm_state.delete(farm_id).await?;
        permissions.delete_by_farm(farm_id).await?;
        stores.farm_config.delete(farm_id).await?;

        info!(target: "crop.farm", farm_id, user_id = user.id, "farm_deprovisioning_done");
        self.deprovisioned
            .send(farm_id)
            .await
            .map_err(|_| FarmError::ChannelClosed("farm_deprovisioner"))?;
        Ok(())
    }
}

/// 默认设备：`server` 元设备，以及营养液（ph/ec/temp）与环境（temp/humidity/co2）两台虚拟设备，各 4 个通道。
pub fn default_devices(farm_id: u64) -> Vec<DeviceConfig> {
    vec![
        DeviceConfig {
            id: random_id(),
            farm_id,
            device_type: SERVER_DEVICE_TYPE.to_string(),
            description: "control server".to_string(),
            enabled: true,
            ..DeviceConfig::default()
        },
        sensor_device(farm_id, "nutrient", "nutrient controller", &[
            ("ph", "pH", ""),
            ("ec", "EC", "mS/cm"),
            ("temp", "Water temperature", "°C"),
        ]),
        sensor_device(farm_id, "climate", "climate controller", &[
            ("temp", "Air temperature", "°C"),
            ("humidity", "Relative humidity", "%"),
            ("co2", "CO2", "ppm"),
        ]),
    ]
}

fn sensor_device(
    farm_id: u64,
    device_type: &str,
    description: &str,
    metrics: &[(&str, &str, &str)],
) -> DeviceConfig {
    let device_id = random_id();
    DeviceConfig {
        id: device_id,
        farm_id,
        device_type: device_type.to_string(),
        description: description.to_string(),
        uri: format!("{}{device_type}", crop_transport::VIRTUAL_URI_SCHEME),
        enabled: true,
        metrics: metrics
            .iter()
            .map(|(key, name, unit)| Metric {
                id: random_id(),
                device_id,
                key: key.to_string(),
                name: name.to_string(),
                unit: unit.to_string(),
                enabled: true,
                ..Metric::default()
            })
            .collect(),
        channels: (0..DEFAULT_CHANNEL_COUNT)
            .map(|board_id| Channel {
                id: random_id(),
                device_id,
                board_id,
                name: format!("{device_type} channel {board_id}"),
                enabled: true,
                ..Channel::default()
            })
            .collect(),
        ..DeviceConfig::default()
    }
}
