//! 复制门面接口

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::ConsistencyLevel;

use crate::error::ClusterError;

/// 节点参数。
#[derive(Debug, Clone, Default)]
pub struct ClusterParams {
    pub node_id: u64,
    /// 集群全部成员（含本节点）。
    pub peers: Vec<u64>,
    pub data_dir: Option<PathBuf>,
}

impl ClusterParams {
    pub fn new(node_id: u64, peers: Vec<u64>, data_dir: Option<PathBuf>) -> Self {
        let mut members = peers;
        if !members.contains(&node_id) {
            members.push(node_id);
        }
        members.sort_unstable();
        members.dedup();
        Self {
            node_id,
            peers: members,
            data_dir,
        }
    }

    /// 多数派大小。
    pub fn quorum(&self) -> usize {
        self.peers.len().max(1) / 2 + 1
    }
}

/// 复制组内的确定性状态机。
pub trait StateMachine: Send + Sync {
    /// 应用一条已提交的命令。
    fn apply(&mut self, command: &[u8]) -> Result<(), ClusterError>;

    /// 只读查询。
    fn lookup(&self, query: &[u8]) -> Result<Vec<u8>, ClusterError>;
}

/// 按 (group_id, node_id) 构建状态机。
pub type StateMachineFactory = Arc<dyn Fn(u64, u64) -> Box<dyn StateMachine> + Send + Sync>;

#[async_trait]
pub trait Replicator: Send + Sync {
    fn params(&self) -> ClusterParams;

    /// 本节点加入复制组。`durable` 为真时日志落盘并在加入时回放。
    async fn add_group(
        &self,
        group_id: u64,
        factory: StateMachineFactory,
        durable: bool,
    ) -> Result<(), ClusterError>;

    async fn remove_group(&self, group_id: u64) -> Result<(), ClusterError>;

    fn has_group(&self, group_id: u64) -> bool;

    fn is_leader(&self, group_id: u64) -> bool;

    /// 等待复制组选出 leader 且本节点已加入。
    async fn wait_for_ready(&self, group_id: u64, timeout: Duration) -> Result<(), ClusterError>;

    /// 提交一条命令（仅 leader 接受）。
    async fn propose(&self, group_id: u64, command: Vec<u8>) -> Result<u64, ClusterError>;

    /// 线性一致读屏障：返回 leader 的提交位置，并保证本地已应用到该位置。
    async fn read_index(&self, group_id: u64) -> Result<u64, ClusterError>;

    async fn lookup(
        &self,
        group_id: u64,
        query: Vec<u8>,
        consistency: ConsistencyLevel,
    ) -> Result<Vec<u8>, ClusterError>;
}
