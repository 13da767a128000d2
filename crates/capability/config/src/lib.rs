//! 应用运行配置加载。
//!
//! 所有变量以 `CROP_` 为前缀；未设置时取默认值，格式非法时返回 [`ConfigError::Invalid`]。

use std::env;
use std::path::PathBuf;

use domain::{FarmMode, StoreKind, StoreSelection};

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: FarmMode,
    pub http_addr: String,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub default_stores: StoreSelection,
    pub state_ttl_seconds: u64,
    pub state_tick_seconds: u64,
    pub channel_capacity: usize,
    pub transport_timeout_ms: u64,
    pub node_id: u64,
    pub peers: Vec<u64>,
    pub changefeed_enabled: bool,
    pub changefeed_retry_seconds: u64,
    pub mqtt_host: Option<String>,
    pub mqtt_port: u16,
    pub mqtt_notify_topic: String,
    pub default_devices: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: FarmMode::Standalone,
            http_addr: "127.0.0.1:8091".to_string(),
            data_dir: PathBuf::from("./data"),
            database_url: None,
            redis_url: None,
            default_stores: StoreSelection::default(),
            state_ttl_seconds: 0,
            state_tick_seconds: 60,
            channel_capacity: 32,
            transport_timeout_ms: 5000,
            node_id: 1,
            peers: Vec::new(),
            changefeed_enabled: false,
            changefeed_retry_seconds: 30,
            mqtt_host: None,
            mqtt_port: 1883,
            mqtt_notify_topic: "crop/notify".to_string(),
            default_devices: true,
        }
    }
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置（测试可传入闭包）。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mode = match read_optional(&lookup, "CROP_MODE") {
            Some(value) => FarmMode::parse(&value)
                .ok_or_else(|| ConfigError::Invalid("CROP_MODE".to_string(), value))?,
            None => defaults.mode,
        };
        let http_addr = read_optional(&lookup, "CROP_HTTP_ADDR").unwrap_or(defaults.http_addr);
        let data_dir = read_optional(&lookup, "CROP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let database_url = read_optional(&lookup, "CROP_DATABASE_URL");
        let redis_url = read_optional(&lookup, "CROP_REDIS_URL");
        let default_stores = StoreSelection {
            config: read_store_kind(&lookup, "CROP_CONFIG_STORE")?,
            state: read_store_kind(&lookup, "CROP_STATE_STORE")?,
            data: read_store_kind(&lookup, "CROP_DATA_STORE")?,
        };
        let state_ttl_seconds =
            read_u64_with_default(&lookup, "CROP_STATE_TTL_SECONDS", defaults.state_ttl_seconds)?;
        let state_tick_seconds = read_u64_with_default(
            &lookup,
            "CROP_STATE_TICK_SECONDS",
            defaults.state_tick_seconds,
        )?;
        let channel_capacity = read_u64_with_default(
            &lookup,
            "CROP_CHANNEL_CAPACITY",
            defaults.channel_capacity as u64,
        )? as usize;
        if channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "CROP_CHANNEL_CAPACITY".to_string(),
                "0".to_string(),
            ));
        }
        let transport_timeout_ms = read_u64_with_default(
            &lookup,
            "CROP_TRANSPORT_TIMEOUT_MS",
            defaults.transport_timeout_ms,
        )?;
        let node_id = read_u64_with_default(&lookup, "CROP_NODE_ID", defaults.node_id)?;
        let peers = read_id_list(&lookup, "CROP_PEERS")?;
        let changefeed_enabled =
            read_bool_with_default(&lookup, "CROP_CHANGEFEED", defaults.changefeed_enabled);
        let changefeed_retry_seconds = read_u64_with_default(
            &lookup,
            "CROP_CHANGEFEED_RETRY_SECONDS",
            defaults.changefeed_retry_seconds,
        )?;
        let mqtt_host = read_optional(&lookup, "CROP_MQTT_HOST");
        let mqtt_port = read_u16_with_default(&lookup, "CROP_MQTT_PORT", defaults.mqtt_port)?;
        let mqtt_notify_topic =
            read_optional(&lookup, "CROP_MQTT_NOTIFY_TOPIC").unwrap_or(defaults.mqtt_notify_topic);
        let default_devices =
            read_bool_with_default(&lookup, "CROP_DEFAULT_DEVICES", defaults.default_devices);

        Ok(Self {
            mode,
            http_addr,
            data_dir,
            database_url,
            redis_url,
            default_stores,
            state_ttl_seconds,
            state_tick_seconds,
            channel_capacity,
            transport_timeout_ms,
            node_id,
            peers,
            changefeed_enabled,
            changefeed_retry_seconds,
            mqtt_host,
            mqtt_port,
            mqtt_notify_topic,
            default_devices,
        })
    }

    pub fn is_cluster(&self) -> bool {
        self.mode == FarmMode::Cluster
    }
}

fn read_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn read_u64_with_default<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = match read_optional(lookup, key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u16_with_default<F>(lookup: &F, key: &str, default: u16) -> Result<u16, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = match read_optional(lookup, key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_bool_with_default<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match read_optional(lookup, key) {
        Some(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        None => default,
    }
}

fn read_store_kind<F>(lookup: &F, key: &str) -> Result<StoreKind, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match read_optional(lookup, key) {
        Some(value) => {
            StoreKind::parse(&value).ok_or_else(|| ConfigError::Invalid(key.to_string(), value))
        }
        None => Ok(StoreKind::Memory),
    }
}

fn read_id_list<F>(lookup: &F, key: &str) -> Result<Vec<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = read_optional(lookup, key) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| ConfigError::Invalid(key.to_string(), raw.clone()))
        })
        .collect()
}
