//! 设备通信能力
//!
//! - [`SmartSwitch`]：智能开关的统一接口（读状态、切换、定时切换、系统信息）
//! - [`HttpSmartSwitch`]：真实设备，HTTP 调用 `{uri}/state`、`/switch`、`/timer`、`/system`
//! - [`VirtualSmartSwitch`]：虚拟设备，读写设备状态存储并用定时任务自动回落
//! - [`TransportFactory`]：按农场模式与设备 URI 选择实现
//! - [`Notifier`]：农场通知出口（日志 / MQTT）

mod error;
mod factory;
mod http;
mod notify;
mod switch;
mod virtual_switch;

pub use error::TransportError;
pub use factory::{TransportFactory, VIRTUAL_URI_SCHEME};
pub use http::HttpSmartSwitch;
pub use notify::{LogNotifier, MqttNotifier, MqttNotifierConfig, Notifier};
pub use switch::{SmartSwitch, Switch, SystemInfo, TimerEvent};
pub use virtual_switch::VirtualSmartSwitch;
