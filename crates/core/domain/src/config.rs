//! 农场配置模型
//!
//! 配置以 JSON 持久化，字段名采用 camelCase；通道数组按板位（board slot）定位。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::membership::Permission;

/// 设备类型 `server` 仅承载元配置，不参与轮询与执行。
pub const SERVER_DEVICE_TYPE: &str = "server";

/// pH 加药算法 ID。
pub const ALGORITHM_PH: u64 = 1;

/// 农场运行模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FarmMode {
    #[default]
    Standalone,
    Server,
    Virtual,
    Maintenance,
    Cluster,
}

impl FarmMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FarmMode::Standalone => "standalone",
            FarmMode::Server => "server",
            FarmMode::Virtual => "virtual",
            FarmMode::Maintenance => "maintenance",
            FarmMode::Cluster => "cluster",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standalone" => Some(FarmMode::Standalone),
            "server" => Some(FarmMode::Server),
            "virtual" => Some(FarmMode::Virtual),
            "maintenance" => Some(FarmMode::Maintenance),
            "cluster" => Some(FarmMode::Cluster),
            _ => None,
        }
    }
}

/// 读一致性级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    #[default]
    Local,
    Quorum,
}

/// 存储后端类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    #[default]
    Memory,
    Relational,
    ReplicatedMemory,
    ReplicatedDisk,
    RedisTs,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Relational => "relational",
            StoreKind::ReplicatedMemory => "replicated-memory",
            StoreKind::ReplicatedDisk => "replicated-disk",
            StoreKind::RedisTs => "redis-ts",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(StoreKind::Memory),
            "relational" | "postgres" => Some(StoreKind::Relational),
            "replicated-memory" => Some(StoreKind::ReplicatedMemory),
            "replicated-disk" => Some(StoreKind::ReplicatedDisk),
            "redis-ts" => Some(StoreKind::RedisTs),
            _ => None,
        }
    }

    pub fn is_replicated(self) -> bool {
        matches!(self, StoreKind::ReplicatedMemory | StoreKind::ReplicatedDisk)
    }
}

/// 每个集合选用的存储后端。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSelection {
    #[serde(default)]
    pub config: StoreKind,
    #[serde(default)]
    pub state: StoreKind,
    #[serde(default)]
    pub data: StoreKind,
}

/// 农场配置。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmConfig {
    pub id: u64,
    #[serde(default)]
    pub organization_id: u64,
    pub name: String,
    #[serde(default)]
    pub mode: FarmMode,
    /// 轮询间隔（秒），0 表示不启动定时器。
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub consistency: ConsistencyLevel,
    #[serde(default)]
    pub stores: StoreSelection,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl FarmConfig {
    pub fn device_by_type(&self, device_type: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.device_type == device_type)
    }

    pub fn device_by_id(&self, device_id: u64) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == device_id)
    }

    /// 按 ID 替换设备配置；不存在时追加。
    pub fn set_device(&mut self, device: DeviceConfig) {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(slot) => *slot = device,
            None => self.devices.push(device),
        }
    }

    /// 在整个农场内查找指标（条件可以引用任意设备上的指标）。
    pub fn find_metric(&self, metric_id: u64) -> Option<(&DeviceConfig, &Metric)> {
        self.devices.iter().find_map(|device| {
            device
                .metrics
                .iter()
                .find(|m| m.id == metric_id)
                .map(|metric| (device, metric))
        })
    }

    pub fn find_channel(&self, channel_id: u64) -> Option<(&DeviceConfig, &Channel)> {
        self.devices.iter().find_map(|device| {
            device
                .channels
                .iter()
                .find(|c| c.id == channel_id)
                .map(|channel| (device, channel))
        })
    }

    pub fn workflow(&self, workflow_id: u64) -> Option<&Workflow> {
        self.workflows.iter().find(|w| w.id == workflow_id)
    }

    pub fn set_workflow(&mut self, workflow: Workflow) {
        match self.workflows.iter_mut().find(|w| w.id == workflow.id) {
            Some(slot) => *slot = workflow,
            None => self.workflows.push(workflow),
        }
    }

    /// 参与轮询与执行的设备（启用且非 server 类型）。
    pub fn active_devices(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.devices.iter().filter(|d| d.enabled && !d.is_server())
    }

    /// 校验结构约束：设备 ID 与类型在农场内唯一，条件引用的指标存在。
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut types = std::collections::HashSet::new();
        let mut ids = std::collections::HashSet::new();
        for device in &self.devices {
            if !types.insert(device.device_type.as_str()) {
                return Err(DomainError::invalid(format!(
                    "duplicate device type {}",
                    device.device_type
                )));
            }
            if !ids.insert(device.id) {
                return Err(DomainError::invalid(format!(
                    "duplicate device id {}",
                    device.id
                )));
            }
            for channel in &device.channels {
                if channel.debounce < 0.0 {
                    return Err(DomainError::invalid(format!(
                        "channel {} has negative debounce",
                        channel.id
                    )));
                }
                for condition in &channel.conditions {
                    if self.find_metric(condition.metric_id).is_none() {
                        return Err(DomainError::invalid(format!(
                            "condition {} references unknown metric {}",
                            condition.id, condition.metric_id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// 设备配置。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub id: u64,
    #[serde(default)]
    pub farm_id: u64,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub hardware_version: String,
    #[serde(default)]
    pub firmware_version: String,
    /// 设备级设置（如 `nutrient.gallons`）。
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl DeviceConfig {
    pub fn is_server(&self) -> bool {
        self.device_type == SERVER_DEVICE_TYPE
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// 读取整数设置：先查 `{type}.{key}`，再查 `{key}`。
    pub fn int_setting(&self, key: &str) -> Option<i64> {
        let scoped = format!("{}.{}", self.device_type, key);
        self.setting(&scoped)
            .or_else(|| self.setting(key))
            .and_then(|raw| raw.trim().parse::<i64>().ok())
    }

    pub fn metric_by_key(&self, key: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.key == key)
    }

    pub fn channel_by_id(&self, channel_id: u64) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == channel_id)
    }

    pub fn channel_by_board(&self, board_id: usize) -> Option<&Channel> {
        self.channels.iter().find(|c| c.board_id == board_id)
    }

    pub fn channel_mut(&mut self, channel_id: u64) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.id == channel_id)
    }

    /// 设备状态中通道数组的长度（按最大板位 + 1）。
    pub fn channel_slots(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.board_id + 1)
            .max()
            .unwrap_or(0)
    }
}

/// 指标配置。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub id: u64,
    #[serde(default)]
    pub device_id: u64,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub notify: bool,
    /// 告警下限，0 表示未设置。
    #[serde(default)]
    pub alarm_low: f64,
    /// 告警上限，0 表示未设置。
    #[serde(default)]
    pub alarm_high: f64,
}

impl Metric {
    pub fn is_alarming(&self, value: f64) -> bool {
        (self.alarm_low != 0.0 && value < self.alarm_low)
            || (self.alarm_high != 0.0 && value > self.alarm_high)
    }
}

/// 通道配置。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: u64,
    #[serde(default)]
    pub device_id: u64,
    /// 板位（设备状态通道数组的下标）。
    pub board_id: usize,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub notify: bool,
    /// 开启时长（秒），0 表示不限。
    #[serde(default)]
    pub duration: u64,
    /// 迟滞带（数值单位）。
    #[serde(default)]
    pub debounce: f64,
    /// 冷却时间（分钟）。
    #[serde(default)]
    pub backoff: u64,
    #[serde(default)]
    pub algorithm_id: Option<u64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl Channel {
    pub fn algorithm(&self) -> Option<u64> {
        self.algorithm_id.filter(|id| *id != 0)
    }

    pub fn schedule_mut(&mut self, schedule_id: u64) -> Option<&mut Schedule> {
        self.schedules.iter_mut().find(|s| s.id == schedule_id)
    }
}

/// 比较运算符。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl Comparator {
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
            Comparator::Eq => value == threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Gt => value > threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Eq => "=",
            Comparator::Ge => ">=",
            Comparator::Gt => ">",
        }
    }
}

impl std::str::FromStr for Comparator {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Le),
            "=" | "==" => Ok(Comparator::Eq),
            ">=" => Ok(Comparator::Ge),
            ">" => Ok(Comparator::Gt),
            other => Err(DomainError::invalid(format!("unknown comparator {other}"))),
        }
    }
}

/// 条件：`metric comparator threshold`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub id: u64,
    #[serde(default)]
    pub channel_id: u64,
    pub metric_id: u64,
    pub comparator: Comparator,
    pub threshold: f64,
}

/// 排程频率。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// 排程。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: u64,
    #[serde(default)]
    pub channel_id: u64,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub interval: u32,
    /// 星期掩码（"MO"、"TU" ...），为空表示不限。
    #[serde(default)]
    pub days: Vec<String>,
    /// 最大执行次数，0 表示不限。
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub execution_count: u32,
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn has_remaining_runs(&self) -> bool {
        self.count == 0 || self.execution_count < self.count
    }
}

/// 工作流。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: u64,
    #[serde(default)]
    pub farm_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub last_completed: Option<DateTime<Utc>>,
}

/// 工作流步骤。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: u64,
    #[serde(default)]
    pub workflow_id: u64,
    pub device_id: u64,
    pub channel_id: u64,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub wait: u64,
    #[serde(default)]
    pub state: StepState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    #[default]
    Ready,
    Executing,
    Completed,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: u64, device_type: &str) -> DeviceConfig {
        DeviceConfig {
            id,
            device_type: device_type.to_string(),
            enabled: true,
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn comparator_equality_is_exact() {
        assert!(Comparator::Eq.evaluate(6.0, 6.0));
        assert!(!Comparator::Eq.evaluate(6.000_001, 6.0));
        assert!(Comparator::Le.evaluate(6.0, 6.0));
        assert!(!Comparator::Lt.evaluate(6.0, 6.0));
        assert!(Comparator::Gt.evaluate(6.3, 6.0));
    }

    #[test]
    fn unknown_comparator_is_invalid_input() {
        let err = "!=".parse::<Comparator>().expect_err("reject");
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
    }

    #[test]
    fn duplicate_device_type_fails_validation() {
        let farm = FarmConfig {
            id: 1,
            devices: vec![device(1, "nutrient"), device(2, "nutrient")],
            ..FarmConfig::default()
        };
        assert!(farm.validate().is_err());
    }

    #[test]
    fn int_setting_prefers_scoped_key() {
        let mut nutrient = device(1, "nutrient");
        nutrient.settings.insert("gallons".into(), "4".into());
        assert_eq!(nutrient.int_setting("gallons"), Some(4));
        nutrient.settings.insert("nutrient.gallons".into(), "10".into());
        assert_eq!(nutrient.int_setting("gallons"), Some(10));
    }

    #[test]
    fn device_type_serializes_as_type() {
        let json = serde_json::to_value(device(3, "climate")).expect("json");
        assert_eq!(json["type"], "climate");
    }

    #[test]
    fn store_kind_uses_kebab_case() {
        let json = serde_json::to_string(&StoreKind::ReplicatedDisk).expect("json");
        assert_eq!(json, "\"replicated-disk\"");
        assert_eq!(StoreKind::parse("redis-ts"), Some(StoreKind::RedisTs));
    }
}
