//! 进程内复制实现
//!
//! [`ReplicationHub`] 保存每个复制组的已提交日志与 leader；同一进程内的多个
//! [`LocalReplicator`] 共享一个 hub，各自维护本地状态机副本与已应用位置。
//! leader 在加入成员达到多数派时按 `group_id % 成员数` 选出，之后保持稳定，
//! 直到 leader 离开或被显式转移。follower 的本地读可能落后，quorum 读先走 read-index 追平。

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::ConsistencyLevel;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::ClusterError;
use crate::replicator::{ClusterParams, Replicator, StateMachine, StateMachineFactory};

const READY_POLL: Duration = Duration::from_millis(20);

#[derive(Serialize, Deserialize)]
struct LogRecord {
    index: u64,
    command: Vec<u8>,
}

struct GroupLog {
    group_id: u64,
    quorum: usize,
    entries: RwLock<Vec<Vec<u8>>>,
    members: RwLock<BTreeSet<u64>>,
    leader: RwLock<Option<u64>>,
    writer: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl GroupLog {
    fn leader(&self) -> Result<Option<u64>, ClusterError> {
        self.leader.read().map(|l| *l).map_err(|_| ClusterError::Lock)
    }

    fn commit_index(&self) -> Result<usize, ClusterError> {
        self.entries
            .read()
            .map(|e| e.len())
            .map_err(|_| ClusterError::Lock)
    }

    fn elect(&self) -> Result<(), ClusterError> {
        let members = self.members.read().map_err(|_| ClusterError::Lock)?;
        let mut leader = self.leader.write().map_err(|_| ClusterError::Lock)?;
        if let Some(current) = *leader {
            if members.contains(&current) {
                return Ok(());
            }
        }
        if members.len() < self.quorum {
            *leader = None;
            return Ok(());
        }
        let slot = (self.group_id % members.len() as u64) as usize;
        *leader = members.iter().nth(slot).copied();
        if let Some(node_id) = *leader {
            info!(
                target: "crop.cluster",
                group_id = self.group_id,
                leader = node_id,
                "group_leader_elected"
            );
        }
        Ok(())
    }

    /// 追加一条命令并返回其提交位置（从 1 开始）。
    async fn append(&self, command: Vec<u8>) -> Result<u64, ClusterError> {
        let mut writer = self.writer.lock().await;
        let index = {
            let mut entries = self.entries.write().map_err(|_| ClusterError::Lock)?;
            entries.push(command.clone());
            entries.len() as u64
        };
        if let Some(file) = writer.as_mut() {
            let mut line = serde_json::to_vec(&LogRecord { index, command })
                .map_err(|err| ClusterError::Io(err.to_string()))?;
            line.push(b'\n');
            file.write_all(&line)
                .await
                .map_err(|err| ClusterError::Io(err.to_string()))?;
            file.flush()
                .await
                .map_err(|err| ClusterError::Io(err.to_string()))?;
        }
        Ok(index)
    }
}

/// 复制组注册中心（同一进程内所有节点共享）。
#[derive(Default)]
pub struct ReplicationHub {
    groups: RwLock<HashMap<u64, Arc<GroupLog>>>,
}

impl ReplicationHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn group(&self, group_id: u64) -> Result<Option<Arc<GroupLog>>, ClusterError> {
        let groups = self.groups.read().map_err(|_| ClusterError::Lock)?;
        Ok(groups.get(&group_id).cloned())
    }

    async fn join(
        &self,
        group_id: u64,
        node_id: u64,
        quorum: usize,
        log_path: Option<PathBuf>,
    ) -> Result<Arc<GroupLog>, ClusterError> {
        let group = match self.group(group_id)? {
            Some(group) => group,
            None => {
                let (entries, writer) = match log_path {
                    Some(path) => open_log(&path).await?,
                    None => (Vec::new(), None),
                };
                let created = Arc::new(GroupLog {
                    group_id,
                    quorum,
                    entries: RwLock::new(entries),
                    members: RwLock::new(BTreeSet::new()),
                    leader: RwLock::new(None),
                    writer: tokio::sync::Mutex::new(writer),
                });
                let mut groups = self.groups.write().map_err(|_| ClusterError::Lock)?;
                groups.entry(group_id).or_insert(created).clone()
            }
        };
        {
            let mut members = group.members.write().map_err(|_| ClusterError::Lock)?;
            members.insert(node_id);
        }
        group.elect()?;
        Ok(group)
    }

    fn leave(&self, group_id: u64, node_id: u64) -> Result<(), ClusterError> {
        let Some(group) = self.group(group_id)? else {
            return Ok(());
        };
        {
            let mut members = group.members.write().map_err(|_| ClusterError::Lock)?;
            members.remove(&node_id);
        }
        group.elect()
    }

    /// 将复制组 leader 转移到指定成员。
    pub fn transfer_leader(&self, group_id: u64, node_id: u64) -> Result<(), ClusterError> {
        let group = self
            .group(group_id)?
            .ok_or(ClusterError::UnknownGroup(group_id))?;
        let members = group.members.read().map_err(|_| ClusterError::Lock)?;
        if !members.contains(&node_id) {
            return Err(ClusterError::NotReady(group_id));
        }
        let mut leader = group.leader.write().map_err(|_| ClusterError::Lock)?;
        *leader = Some(node_id);
        info!(
            target: "crop.cluster",
            group_id,
            leader = node_id,
            "group_leader_transferred"
        );
        Ok(())
    }

    pub fn leader_of(&self, group_id: u64) -> Option<u64> {
        self.group(group_id)
            .ok()
            .flatten()
            .and_then(|group| group.leader().ok().flatten())
    }
}

async fn open_log(
    path: &PathBuf,
) -> Result<(Vec<Vec<u8>>, Option<tokio::fs::File>), ClusterError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| ClusterError::Io(err.to_string()))?;
    }
    let mut entries = Vec::new();
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<LogRecord>(line) {
                    Ok(record) => entries.push(record.command),
                    Err(err) => {
                        // 截断的尾部记录（写入中途崩溃）之后不再回放。
                        warn!(
                            target: "crop.cluster",
                            path = %path.display(),
                            error = %err,
                            "log_record_skipped"
                        );
                        break;
                    }
                }
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ClusterError::Io(err.to_string())),
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|err| ClusterError::Io(err.to_string()))?;
    Ok((entries, Some(file)))
}

struct ReplicaState {
    machine: Box<dyn StateMachine>,
    applied: usize,
}

struct Replica {
    log: Arc<GroupLog>,
    state: Mutex<ReplicaState>,
}

impl Replica {
    /// 应用到 `upto`；返回 `upto` 位置那条命令的应用结果。
    fn catch_up(&self, upto: usize) -> Result<(), ClusterError> {
        let mut state = self.state.lock().map_err(|_| ClusterError::Lock)?;
        if state.applied >= upto {
            return Ok(());
        }
        let entries = self.log.entries.read().map_err(|_| ClusterError::Lock)?;
        let end = upto.min(entries.len());
        let mut last = Ok(());
        for index in state.applied..end {
            let result = state.machine.apply(&entries[index]);
            if let Err(err) = &result {
                debug!(
                    target: "crop.cluster",
                    group_id = self.log.group_id,
                    index,
                    error = %err,
                    "entry_apply_failed"
                );
            }
            last = result;
        }
        state.applied = end;
        last
    }
}

/// 进程内复制节点。
pub struct LocalReplicator {
    params: ClusterParams,
    hub: Arc<ReplicationHub>,
    replicas: RwLock<HashMap<u64, Arc<Replica>>>,
}

impl LocalReplicator {
    /// 启动节点。
    pub fn start_node(params: ClusterParams, hub: Arc<ReplicationHub>) -> Arc<Self> {
        info!(
            target: "crop.cluster",
            node_id = params.node_id,
            peers = ?params.peers,
            "node_started"
        );
        Arc::new(Self {
            params,
            hub,
            replicas: RwLock::new(HashMap::new()),
        })
    }

    /// 单节点集群（本地开发 / 测试）。
    pub fn single_node(node_id: u64, data_dir: Option<PathBuf>) -> Arc<Self> {
        Self::start_node(
            ClusterParams::new(node_id, Vec::new(), data_dir),
            ReplicationHub::new(),
        )
    }

    pub fn hub(&self) -> Arc<ReplicationHub> {
        self.hub.clone()
    }

    fn replica(&self, group_id: u64) -> Result<Arc<Replica>, ClusterError> {
        let replicas = self.replicas.read().map_err(|_| ClusterError::Lock)?;
        replicas
            .get(&group_id)
            .cloned()
            .ok_or(ClusterError::UnknownGroup(group_id))
    }

    fn log_path(&self, group_id: u64) -> Option<PathBuf> {
        self.params
            .data_dir
            .as_ref()
            .map(|dir| dir.join(format!("group-{group_id}.log")))
    }
}

#[async_trait]
impl Replicator for LocalReplicator {
    fn params(&self) -> ClusterParams {
        self.params.clone()
    }

    async fn add_group(
        &self,
        group_id: u64,
        factory: StateMachineFactory,
        durable: bool,
    ) -> Result<(), ClusterError> {
        if self.has_group(group_id) {
            return Err(ClusterError::GroupExists(group_id));
        }
        let path = if durable {
            self.log_path(group_id)
        } else {
            None
        };
        let log = self
            .hub
            .join(group_id, self.params.node_id, self.params.quorum(), path)
            .await?;
        let replica = Arc::new(Replica {
            log,
            state: Mutex::new(ReplicaState {
                machine: factory(group_id, self.params.node_id),
                applied: 0,
            }),
        });
        // 回放已提交日志（磁盘日志或其他节点先前的提交）。
        let committed = replica.log.commit_index()?;
        if let Err(err) = replica.catch_up(committed) {
            warn!(
                target: "crop.cluster",
                group_id,
                error = %err,
                "group_replay_failed"
            );
        }
        let mut replicas = self.replicas.write().map_err(|_| ClusterError::Lock)?;
        if replicas.contains_key(&group_id) {
            return Err(ClusterError::GroupExists(group_id));
        }
        replicas.insert(group_id, replica);
        debug!(
            target: "crop.cluster",
            group_id,
            node_id = self.params.node_id,
            replayed = committed,
            "group_added"
        );
        Ok(())
    }

    async fn remove_group(&self, group_id: u64) -> Result<(), ClusterError> {
        let removed = {
            let mut replicas = self.replicas.write().map_err(|_| ClusterError::Lock)?;
            replicas.remove(&group_id)
        };
        if removed.is_some() {
            self.hub.leave(group_id, self.params.node_id)?;
        }
        Ok(())
    }

    fn has_group(&self, group_id: u64) -> bool {
        self.replicas
            .read()
            .map(|r| r.contains_key(&group_id))
            .unwrap_or(false)
    }

    fn is_leader(&self, group_id: u64) -> bool {
        match self.replica(group_id) {
            Ok(replica) => matches!(replica.log.leader(), Ok(Some(id)) if id == self.params.node_id),
            Err(_) => false,
        }
    }

    async fn wait_for_ready(&self, group_id: u64, timeout: Duration) -> Result<(), ClusterError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(replica) = self.replica(group_id) {
                if replica.log.leader()?.is_some() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClusterError::NotReady(group_id));
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn propose(&self, group_id: u64, command: Vec<u8>) -> Result<u64, ClusterError> {
        let replica = self.replica(group_id)?;
        if replica.log.leader()? != Some(self.params.node_id) {
            return Err(ClusterError::NotLeader {
                group_id,
                node_id: self.params.node_id,
            });
        }
        let index = replica.log.append(command).await?;
        replica.catch_up(index as usize)?;
        Ok(index)
    }

    async fn read_index(&self, group_id: u64) -> Result<u64, ClusterError> {
        let replica = self.replica(group_id)?;
        if replica.log.leader()?.is_none() {
            return Err(ClusterError::NotReady(group_id));
        }
        let commit = replica.log.commit_index()?;
        if let Err(err) = replica.catch_up(commit) {
            debug!(
                target: "crop.cluster",
                group_id,
                error = %err,
                "read_index_apply_failed"
            );
        }
        Ok(commit as u64)
    }

    async fn lookup(
        &self,
        group_id: u64,
        query: Vec<u8>,
        consistency: ConsistencyLevel,
    ) -> Result<Vec<u8>, ClusterError> {
        if consistency == ConsistencyLevel::Quorum {
            self.read_index(group_id).await?;
        }
        let replica = self.replica(group_id)?;
        let state = replica.state.lock().map_err(|_| ClusterError::Lock)?;
        state.machine.lookup(&query)
    }
}
