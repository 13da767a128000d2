//! 复制门面
//!
//! 对上层隐藏复制库细节，只暴露：
//! - [`Replicator`]：启动节点、添加复制组、leader 判定、就绪等待、提案、read-index
//! - [`StateMachine`]：复制组内确定性应用命令的状态机
//! - [`KvStateMachine`] / [`KvClient`]：以 JSON 键值为载体的通用状态机及其客户端
//! - [`LocalReplicator`] / [`ReplicationHub`]：进程内实现（多个节点共享同一个 hub）
//!
//! 对 follower 发起的写入返回 [`ClusterError::NotLeader`]，调用方应视为"换节点重试"。

pub mod error;
pub mod groups;
pub mod kv;
pub mod local;
pub mod replicator;

pub use error::ClusterError;
pub use kv::{KvClient, KvCommand, KvQuery, KvStateMachine, kv_factory};
pub use local::{LocalReplicator, ReplicationHub};
pub use replicator::{ClusterParams, Replicator, StateMachine, StateMachineFactory};
