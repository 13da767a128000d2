//! 内存存储实现模块
//!
//! 单进程运行与测试使用。状态类存储基于 [`TtlMap`](crate::ttl::TtlMap)，
//! 可选 TTL 淘汰；配置、事件日志与权限使用普通 `RwLock` 集合。

pub mod device_data;
pub mod device_state;
pub mod event_log;
pub mod farm_config;
pub mod farm_state;
pub mod permission;

pub use device_data::*;
pub use device_state::*;
pub use event_log::*;
pub use farm_config::*;
pub use farm_state::*;
pub use permission::*;
