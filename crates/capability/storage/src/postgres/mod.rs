//! # PostgreSQL 存储实现模块
//!
//! 配置与状态以 JSONB 文档保存，按实体 ID upsert；`devices`、`device_states`
//! 两张表同时作为变更订阅（LISTEN/NOTIFY 触发器）的数据来源。
//!
//! ## 数据库模式要求
//!
//! - `farms`：(id bigint pk, organization_id bigint, name text, config jsonb, updated_at timestamptz)
//! - `devices`：(id bigint pk, farm_id bigint, type text, config jsonb)
//! - `farm_states`：(farm_id bigint pk, state jsonb, updated_at timestamptz)
//! - `device_states`：(device_id bigint pk, state jsonb, updated_at timestamptz)
//! - `device_data`：(device_id bigint, ts timestamptz, metrics jsonb)，索引 (device_id, ts)
//! - `event_logs`：(id bigserial pk, farm_id, device_id, device_name, event_type, message, ts)
//! - `users` / `organizations`：(id bigint pk, email|name text)
//! - `permissions`：(user_id, organization_id, farm_id, role_id)，主键 (user_id, farm_id)
//!
//! 表结构由部署侧维护，本模块不做迁移。
//!
//! ## 错误处理
//!
//! `sqlx::Error` 自动转换为 `StorageError`；数据库错误码保留在错误中，
//! 以便 [`StorageError::is_locked`](crate::StorageError::is_locked) 识别表锁冲突。

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

use crate::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// 建立 Postgres 连接池（最大连接数 8）。
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// u64 ID 与 bigint 列互转。
pub(crate) fn to_db_id(id: u64) -> i64 {
    id as i64
}

pub(crate) fn from_db_id(id: i64) -> u64 {
    id as u64
}
