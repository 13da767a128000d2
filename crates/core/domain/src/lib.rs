//! 农场控制面的领域模型。
//!
//! - [`config`]：农场 / 设备 / 指标 / 通道 / 条件 / 排程 / 工作流配置
//! - [`state`]：FarmState、DeviceState 与增量（Delta）计算
//! - [`event`]：控制环内部流转的事件
//! - [`membership`]：用户、组织、角色与权限
//! - [`error`]：跨模块共享的错误种类
//! - [`ids`]：稳定 64 位 ID

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod membership;
pub mod state;

pub use config::{
    ALGORITHM_PH, Channel, Comparator, Condition, ConsistencyLevel, DeviceConfig, FarmConfig,
    FarmMode, Frequency, Metric, SERVER_DEVICE_TYPE, Schedule, StepState, StoreKind,
    StoreSelection, Workflow, WorkflowStep,
};
pub use error::{DomainError, ErrorKind};
pub use event::{DeviceStateChange, DeviceStateDeltaEvent, EventLogEntry, FarmErrorEvent, FarmNotification};
pub use ids::{random_id, stable_id};
pub use membership::{Organization, Permission, Role, User, roles};
pub use state::{DeviceState, DeviceStateDelta, FarmState, diff};
