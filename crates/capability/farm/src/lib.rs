//! 农场控制环
//!
//! - [`DeviceService`]：单设备轮询与开关，实现规则执行端
//! - [`FarmService`]：农场编排（三个监视器 + 轮询定时器、规则求值、增量发布）
//! - [`FarmFactory`] / [`FarmProvisioner`]：构建、启动、开通与注销
//! - [`ServiceRegistry`]：按农场 / 设备类型索引的服务目录
//! - [`EventLogService`] / [`WorkflowService`]：事件日志与工作流
//! - [`Session`]：请求会话与角色校验

mod channels;
mod device;
mod error;
mod event_log;
mod factory;
mod farm;
mod provisioner;
mod registry;
mod session;
mod workflow;

pub use channels::{
    DEFAULT_CHANNEL_CAPACITY, DEVICE_STATE_CHANGE, DEVICE_STATE_DELTA, FARM_CONFIG,
    FARM_CONFIG_CHANGE, FARM_ERROR, FARM_NOTIFY, FARM_STATE_CHANGE, FarmChannels,
    FarmSubscriptions, WatcherReceivers,
};
pub use device::{DeviceService, EVENT_SWITCH, EVENT_TIMER_SWITCH};
pub use error::FarmError;
pub use event_log::EventLogService;
pub use factory::{FarmFactory, spawn_subscription_drain};
pub use farm::{EVENT_ALARM, FarmService, FarmStores};
pub use provisioner::{FarmProvisioner, ProvisionParams, default_devices};
pub use registry::ServiceRegistry;
pub use session::Session;
pub use workflow::WorkflowService;
