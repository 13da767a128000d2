//! 存储层错误类型
//!
//! 统一封装底层错误（SQL、Redis、复制层、序列化），并保留错误种类：
//! `NotFound` 独立成类，规则与状态初始化据此把"无先前状态"视为首次观测。

use domain::ErrorKind;

/// Postgres 锁相关错误码：lock_not_available / deadlock_detected。
const LOCKED_CODES: [&str; 2] = ["55P03", "40P01"];

#[derive(Debug, Clone)]
pub struct StorageError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::BackendFailure, message)
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::NotFound, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::InvalidInput, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_not_leader(&self) -> bool {
        self.kind == ErrorKind::NotLeader
    }

    /// 表锁 / 死锁导致的失败（可重试）。
    pub fn is_locked(&self) -> bool {
        self.code
            .as_deref()
            .map(|code| LOCKED_CODES.contains(&code))
            .unwrap_or(false)
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::not_found(err.to_string()),
            sqlx::Error::Database(db) => Self {
                kind: ErrorKind::BackendFailure,
                message: db.message().to_string(),
                code: db.code().map(|code| code.to_string()),
            },
            _ => Self::new(err.to_string()),
        }
    }
}

impl From<crop_cluster::ClusterError> for StorageError {
    fn from(err: crop_cluster::ClusterError) -> Self {
        Self::with_kind(err.kind(), err.to_string())
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        Self::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_not_leader_keeps_kind() {
        let err: StorageError = crop_cluster::ClusterError::NotLeader {
            group_id: 7,
            node_id: 2,
        }
        .into();
        assert!(err.is_not_leader());
        assert!(!err.is_locked());
    }
}
