//! 存储接口 Trait 定义
//!
//! - FarmConfigStore：农场配置（含设备、工作流）
//! - FarmStateStore：农场状态快照
//! - DeviceStateStore：单设备状态（按设备 ID）
//! - DeviceDataStore：设备时序数据
//! - EventLogStore：事件日志
//! - PermissionStore：用户、组织与权限
//!
//! 约定：
//! - `save` 按实体 ID upsert，`delete` 幂等
//! - `get` 找不到时返回 `ErrorKind::NotFound` 的 [`StorageError`]
//! - 读操作显式携带一致性级别，写操作在各自后端内总是强一致

use async_trait::async_trait;
use domain::{
    ConsistencyLevel, DeviceConfig, DeviceState, EventLogEntry, FarmConfig, FarmState,
    Organization, Permission, User,
};

use crate::error::StorageError;
use crate::pager::{Page, PageQuery};

#[async_trait]
pub trait FarmConfigStore: Send + Sync {
    async fn get(
        &self,
        farm_id: u64,
        consistency: ConsistencyLevel,
    ) -> Result<FarmConfig, StorageError>;

    /// 按农场 ID 升序分页。
    async fn get_page(
        &self,
        query: PageQuery,
        consistency: ConsistencyLevel,
    ) -> Result<Page<FarmConfig>, StorageError>;

    async fn save(&self, farm: &FarmConfig) -> Result<(), StorageError>;

    async fn delete(&self, farm_id: u64) -> Result<(), StorageError>;

    /// 写入单个设备配置并改写所属农场配置，返回刷新后的农场配置。
    async fn save_device(&self, device: &DeviceConfig) -> Result<FarmConfig, StorageError>;

    /// 更新单条设备设置，返回刷新后的农场配置。
    async fn set_device_setting(
        &self,
        farm_id: u64,
        device_id: u64,
        key: &str,
        value: &str,
    ) -> Result<FarmConfig, StorageError>;
}

#[async_trait]
pub trait FarmStateStore: Send + Sync {
    async fn get(
        &self,
        farm_id: u64,
        consistency: ConsistencyLevel,
    ) -> Result<FarmState, StorageError>;

    async fn save(&self, state: &FarmState) -> Result<(), StorageError>;

    async fn delete(&self, farm_id: u64) -> Result<(), StorageError>;

    /// 释放后台资源（如 TTL 清理任务）。
    async fn close(&self) {}
}

#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    async fn get(
        &self,
        device_id: u64,
        consistency: ConsistencyLevel,
    ) -> Result<DeviceState, StorageError>;

    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError>;

    async fn delete(&self, device_id: u64) -> Result<(), StorageError>;

    async fn close(&self) {}
}

#[async_trait]
pub trait DeviceDataStore: Send + Sync {
    async fn save(&self, device_id: u64, state: &DeviceState) -> Result<(), StorageError>;

    /// 最近 30 天某指标的取值（时间升序）。
    async fn get_last_30_days(
        &self,
        device_id: u64,
        metric_key: &str,
    ) -> Result<Vec<f64>, StorageError>;

    async fn delete(&self, device_id: u64) -> Result<(), StorageError>;
}

#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// 写入日志，返回分配了 ID 的条目。
    async fn create(&self, entry: EventLogEntry) -> Result<EventLogEntry, StorageError>;

    /// 按时间倒序分页。
    async fn get_page(
        &self,
        farm_id: u64,
        query: PageQuery,
        consistency: ConsistencyLevel,
    ) -> Result<Page<EventLogEntry>, StorageError>;

    async fn delete_by_farm(&self, farm_id: u64) -> Result<(), StorageError>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn save_user(&self, user: &User) -> Result<(), StorageError>;

    async fn get_user(&self, user_id: u64) -> Result<User, StorageError>;

    async fn save_organization(&self, organization: &Organization) -> Result<(), StorageError>;

    async fn save(&self, permission: &Permission) -> Result<(), StorageError>;

    async fn list_by_farm(&self, farm_id: u64) -> Result<Vec<Permission>, StorageError>;

    async fn list_by_user(&self, user_id: u64) -> Result<Vec<Permission>, StorageError>;

    async fn delete_by_farm(&self, farm_id: u64) -> Result<(), StorageError>;
}
