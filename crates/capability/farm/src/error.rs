use crop_cluster::ClusterError;
use crop_rules::RuleError;
use crop_storage::StorageError;
use crop_transport::TransportError;
use domain::ErrorKind;

/// 农场控制环错误。
#[derive(Debug, thiserror::Error)]
pub enum FarmError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not leader for farm {0}")]
    NotLeader(u64),
    #[error("channel {0} is full")]
    BufferFull(&'static str),
    #[error("channel {0} is closed")]
    ChannelClosed(&'static str),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl FarmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FarmError::NotFound(_) => ErrorKind::NotFound,
            FarmError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            FarmError::NotLeader(_) => ErrorKind::NotLeader,
            FarmError::BufferFull(_) => ErrorKind::BufferFull,
            FarmError::ChannelClosed(_) => ErrorKind::BackendFailure,
            FarmError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            FarmError::InvalidInput(_) => ErrorKind::InvalidInput,
            FarmError::Conflict(_) => ErrorKind::Conflict,
            FarmError::Storage(err) => err.kind(),
            FarmError::Transport(err) => err.kind(),
            FarmError::Rule(err) => err.kind(),
            FarmError::Cluster(err) => err.kind(),
        }
    }

    pub fn is_not_leader(&self) -> bool {
        self.kind() == ErrorKind::NotLeader
    }
}

impl From<domain::DomainError> for FarmError {
    fn from(err: domain::DomainError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => FarmError::NotFound(err.message().to_string()),
            _ => FarmError::InvalidInput(err.message().to_string()),
        }
    }
}
