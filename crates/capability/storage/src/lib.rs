//! # Crop Storage 模块
//!
//! 农场控制环的持久化抽象层：农场配置、农场状态、设备状态、设备时序、
//! 事件日志与权限，每类数据一个异步 Trait，多种后端可互换。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层** (`traits.rs`)：存储 Trait，读操作显式携带 [`ConsistencyLevel`](domain::ConsistencyLevel)
//! 2. **错误处理层** (`error.rs`)：统一的 [`StorageError`]，按 [`ErrorKind`](domain::ErrorKind) 分类
//! 3. **分页** (`pager.rs`)：`get_page` 与 `for_each_page`
//! 4. **实现层**：
//!    - `in_memory/`：内存存储，状态类支持 TTL 淘汰（`ttl.rs`）
//!    - `postgres/`：PostgreSQL 存储（JSONB 文档）
//!    - `redis`：RedisTimeSeries 设备时序数据
//!    - `replicated/`：复制状态机存储（集群模式）
//! 5. **工厂** (`factory.rs`)：按 `StoreKind` 构建具体存储
//!
//! ## 约定
//!
//! - `save` 为 upsert，`delete` 幂等
//! - 找不到记录返回 `NotFound`，调用方据此区分“首次观测”
//! - 存储从不 panic，锁中毒转换为 `lock failed` 错误
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use crop_storage::{StoreFactory, FarmConfigStore};
//! use domain::{ConsistencyLevel, StoreKind};
//!
//! let factory = StoreFactory::new();
//! let configs = factory.farm_config_store(StoreKind::Memory)?;
//! let farm = configs.get(farm_id, ConsistencyLevel::Local).await?;
//! ```

pub mod error;
pub mod factory;
pub mod in_memory;
pub mod pager;
pub mod postgres;
pub mod redis;
pub mod replicated;
pub mod traits;
pub mod ttl;

pub use error::*;
pub use factory::StoreFactory;
pub use pager::{Page, PageQuery, for_each_page, paginate};
pub use self::redis::RedisTsDeviceDataStore;
pub use traits::*;
pub use ttl::TtlMap;

pub use in_memory::{
    InMemoryDeviceDataStore, InMemoryDeviceStateStore, InMemoryEventLogStore,
    InMemoryFarmConfigStore, InMemoryFarmStateStore, InMemoryPermissionStore,
};

pub use postgres::{
    PgDeviceDataStore, PgDeviceStateStore, PgEventLogStore, PgFarmConfigStore, PgFarmStateStore,
    PgPermissionStore, connect_pool,
};

pub use replicated::{
    ReplicatedBackend, ReplicatedDeviceDataStore, ReplicatedDeviceStateStore,
    ReplicatedEventLogStore, ReplicatedFarmConfigStore, ReplicatedFarmStateStore,
    ReplicatedPermissionStore,
};
