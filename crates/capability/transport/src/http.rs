//! HTTP 智能开关

use std::time::Duration;

use async_trait::async_trait;
use domain::DeviceState;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::TransportError;
use crate::switch::{SmartSwitch, Switch, SystemInfo, TimerEvent};

pub struct HttpSmartSwitch {
    http: reqwest::Client,
    base_url: String,
    device_type: String,
}

impl HttpSmartSwitch {
    /// 每次调用都带 `timeout` 截止时间。
    pub fn new(
        base_url: impl Into<String>,
        device_type: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Request(err.to_string()))?;
        Ok(Self::with_client(http, base_url, device_type))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_type: device_type.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let url = self.url(path);
        debug!(target: "crop.device", device_type = %self.device_type, url = %url, "device_get");
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let url = self.url(path);
        debug!(target: "crop.device", device_type = %self.device_type, url = %url, "device_post");
        let response = self.http.post(&url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SmartSwitch for HttpSmartSwitch {
    fn device_type(&self) -> &str {
        &self.device_type
    }

    async fn state(&self) -> Result<DeviceState, TransportError> {
        self.get_json("state").await
    }

    async fn switch(&self, board_id: usize, position: i32) -> Result<Switch, TransportError> {
        self.post_json(&format!("switch/{board_id}/{position}")).await
    }

    async fn timer_switch(
        &self,
        board_id: usize,
        seconds: u64,
    ) -> Result<TimerEvent, TransportError> {
        self.post_json(&format!("timer/{board_id}/{seconds}")).await
    }

    async fn refresh_system_info(&self) -> Result<SystemInfo, TransportError> {
        self.get_json("system").await
    }
}
