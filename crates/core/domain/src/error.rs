//! 错误种类
//!
//! 各能力模块拥有自己的错误类型，但都能归约到同一组 [`ErrorKind`]，
//! 上层据此决定重试、忽略或映射为 HTTP 状态码。

use std::fmt;

/// 跨模块共享的错误种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NotLeader,
    BufferFull,
    PermissionDenied,
    InvalidInput,
    BackendFailure,
    Conflict,
}

impl ErrorKind {
    /// 映射为 HTTP 状态码：NotFound→404，InvalidInput→400，PermissionDenied→403，Conflict→409，其余→500。
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidInput => 400,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::Conflict => 409,
            _ => 500,
        }
    }

    /// 稳定的错误码（用于 ApiResponse）。
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "RESOURCE.NOT_FOUND",
            ErrorKind::AlreadyExists => "RESOURCE.ALREADY_EXISTS",
            ErrorKind::NotLeader => "CLUSTER.NOT_LEADER",
            ErrorKind::BufferFull => "CHANNEL.BUFFER_FULL",
            ErrorKind::PermissionDenied => "AUTH.FORBIDDEN",
            ErrorKind::InvalidInput => "INVALID.REQUEST",
            ErrorKind::BackendFailure => "INTERNAL.ERROR",
            ErrorKind::Conflict => "RESOURCE.CONFLICT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NotLeader => "not leader",
            ErrorKind::BufferFull => "buffer full",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::BackendFailure => "backend failure",
            ErrorKind::Conflict => "conflict",
        };
        f.write_str(text)
    }
}

/// 领域层校验错误（配置非法、引用缺失）。
#[derive(Debug, Clone, PartialEq)]
pub struct DomainError {
    kind: ErrorKind,
    message: String,
}

impl DomainError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DomainError {}
