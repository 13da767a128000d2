//! 复制层错误

use domain::ErrorKind;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    #[error("node {node_id} is not leader of group {group_id}")]
    NotLeader { group_id: u64, node_id: u64 },
    #[error("unknown group {0}")]
    UnknownGroup(u64),
    #[error("group {0} already exists on this node")]
    GroupExists(u64),
    #[error("group {0} not ready")]
    NotReady(u64),
    #[error("state machine rejected command: {0}")]
    StateMachine(String),
    #[error("log io failed: {0}")]
    Io(String),
    #[error("lock failed")]
    Lock,
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::NotLeader { .. } => ErrorKind::NotLeader,
            ClusterError::UnknownGroup(_) => ErrorKind::NotFound,
            ClusterError::GroupExists(_) => ErrorKind::AlreadyExists,
            ClusterError::StateMachine(_) => ErrorKind::InvalidInput,
            ClusterError::NotReady(_) | ClusterError::Io(_) | ClusterError::Lock => {
                ErrorKind::BackendFailure
            }
        }
    }

    pub fn is_not_leader(&self) -> bool {
        matches!(self, ClusterError::NotLeader { .. })
    }
}
