use std::sync::Arc;
use std::time::Duration;

use crop_storage::DeviceStateStore;
use domain::{DeviceConfig, FarmMode};

use crate::error::TransportError;
use crate::http::HttpSmartSwitch;
use crate::switch::SmartSwitch;
use crate::virtual_switch::VirtualSmartSwitch;

/// 以该前缀开头的 URI 总是使用虚拟设备。
pub const VIRTUAL_URI_SCHEME: &str = "virtual://";

/// 按农场模式与设备 URI 构建设备通信实现。
#[derive(Clone)]
pub struct TransportFactory {
    timeout: Duration,
    device_states: Arc<dyn DeviceStateStore>,
}

impl TransportFactory {
    pub fn new(timeout: Duration, device_states: Arc<dyn DeviceStateStore>) -> Self {
        Self {
            timeout,
            device_states,
        }
    }

    pub fn build(
        &self,
        mode: FarmMode,
        device: &DeviceConfig,
    ) -> Result<Arc<dyn SmartSwitch>, TransportError> {
        let is_virtual = mode == FarmMode::Virtual
            || device.uri.is_empty()
            || device.uri.starts_with(VIRTUAL_URI_SCHEME);
        if is_virtual {
            return Ok(Arc::new(VirtualSmartSwitch::new(
                device,
                self.device_states.clone(),
            )));
        }
        if !device.uri.starts_with("http://") && !device.uri.starts_with("https://") {
            return Err(TransportError::InvalidUri(device.uri.clone()));
        }
        Ok(Arc::new(HttpSmartSwitch::new(
            device.uri.clone(),
            device.device_type.clone(),
            self.timeout,
        )?))
    }
}
