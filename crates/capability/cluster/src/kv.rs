//! JSON 键值状态机与类型化客户端。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use domain::ConsistencyLevel;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClusterError;
use crate::replicator::{Replicator, StateMachine, StateMachineFactory};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KvCommand {
    Put { key: String, value: Value },
    Delete { key: String },
    DeletePrefix { prefix: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KvQuery {
    Get { key: String },
    Scan { prefix: String },
}

/// 有序键值状态机。
#[derive(Default)]
pub struct KvStateMachine {
    data: BTreeMap<String, Value>,
}

impl StateMachine for KvStateMachine {
    fn apply(&mut self, command: &[u8]) -> Result<(), ClusterError> {
        let command: KvCommand = serde_json::from_slice(command)
            .map_err(|err| ClusterError::StateMachine(err.to_string()))?;
        match command {
            KvCommand::Put { key, value } => {
                self.data.insert(key, value);
            }
            KvCommand::Delete { key } => {
                self.data.remove(&key);
            }
            KvCommand::DeletePrefix { prefix } => {
                self.data.retain(|key, _| !key.starts_with(&prefix));
            }
        }
        Ok(())
    }

    fn lookup(&self, query: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let query: KvQuery = serde_json::from_slice(query)
            .map_err(|err| ClusterError::StateMachine(err.to_string()))?;
        let result = match query {
            KvQuery::Get { key } => serde_json::to_vec(&self.data.get(&key)),
            KvQuery::Scan { prefix } => {
                let items: Vec<(&String, &Value)> = self
                    .data
                    .range(prefix.clone()..)
                    .take_while(|(key, _)| key.starts_with(&prefix))
                    .collect();
                serde_json::to_vec(&items)
            }
        };
        result.map_err(|err| ClusterError::StateMachine(err.to_string()))
    }
}

/// 键值状态机工厂。
pub fn kv_factory() -> StateMachineFactory {
    Arc::new(|_, _| Box::new(KvStateMachine::default()))
}

/// 面向某个复制组的类型化键值客户端。
#[derive(Clone)]
pub struct KvClient {
    replicator: Arc<dyn Replicator>,
    group_id: u64,
}

impl KvClient {
    pub fn new(replicator: Arc<dyn Replicator>, group_id: u64) -> Self {
        Self {
            replicator,
            group_id,
        }
    }

    pub fn group_id(&self) -> u64 {
        self.group_id
    }

    /// 本节点未加入该组时加入并等待就绪。
    pub async fn ensure_group(&self, durable: bool, timeout: Duration) -> Result<(), ClusterError> {
        if !self.replicator.has_group(self.group_id) {
            match self
                .replicator
                .add_group(self.group_id, kv_factory(), durable)
                .await
            {
                Ok(()) | Err(ClusterError::GroupExists(_)) => {}
                Err(err) => return Err(err),
            }
        }
        self.replicator.wait_for_ready(self.group_id, timeout).await
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ClusterError> {
        let value =
            serde_json::to_value(value).map_err(|err| ClusterError::StateMachine(err.to_string()))?;
        self.submit(&KvCommand::Put {
            key: key.to_string(),
            value,
        })
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), ClusterError> {
        self.submit(&KvCommand::Delete {
            key: key.to_string(),
        })
        .await
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), ClusterError> {
        self.submit(&KvCommand::DeletePrefix {
            prefix: prefix.to_string(),
        })
        .await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        consistency: ConsistencyLevel,
    ) -> Result<Option<T>, ClusterError> {
        let raw = self
            .query(
                &KvQuery::Get {
                    key: key.to_string(),
                },
                consistency,
            )
            .await?;
        let value: Option<Value> = serde_json::from_slice(&raw)
            .map_err(|err| ClusterError::StateMachine(err.to_string()))?;
        value
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|err| ClusterError::StateMachine(err.to_string()))
            })
            .transpose()
    }

    pub async fn scan<T: DeserializeOwned>(
        &self,
        prefix: &str,
        consistency: ConsistencyLevel,
    ) -> Result<Vec<(String, T)>, ClusterError> {
        let raw = self
            .query(
                &KvQuery::Scan {
                    prefix: prefix.to_string(),
                },
                consistency,
            )
            .await?;
        let items: Vec<(String, Value)> = serde_json::from_slice(&raw)
            .map_err(|err| ClusterError::StateMachine(err.to_string()))?;
        items
            .into_iter()
            .map(|(key, value)| {
                serde_json::from_value(value)
                    .map(|decoded| (key, decoded))
                    .map_err(|err| ClusterError::StateMachine(err.to_string()))
            })
            .collect()
    }

    async fn submit(&self, command: &KvCommand) -> Result<(), ClusterError> {
        let bytes = serde_json::to_vec(command)
            .map_err(|err| ClusterError::StateMachine(err.to_string()))?;
        self.replicator.propose(self.group_id, bytes).await?;
        Ok(())
    }

    async fn query(
        &self,
        query: &KvQuery,
        consistency: ConsistencyLevel,
    ) -> Result<Vec<u8>, ClusterError> {
        let bytes =
            serde_json::to_vec(query).map_err(|err| ClusterError::StateMachine(err.to_string()))?;
        self.replicator
            .lookup(self.group_id, bytes, consistency)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_stops_at_prefix_boundary() {
        let mut machine = KvStateMachine::default();
        for key in ["a:1", "a:2", "b:1"] {
            let command = serde_json::to_vec(&KvCommand::Put {
                key: key.to_string(),
                value: Value::from(key),
            })
            .expect("encode");
            machine.apply(&command).expect("apply");
        }
        let query = serde_json::to_vec(&KvQuery::Scan {
            prefix: "a:".to_string(),
        })
        .expect("encode");
        let raw = machine.lookup(&query).expect("lookup");
        let items: Vec<(String, Value)> = serde_json::from_slice(&raw).expect("decode");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn malformed_command_is_rejected() {
        let mut machine = KvStateMachine::default();
        let err = machine.apply(b"not json").expect_err("reject");
        assert!(matches!(err, ClusterError::StateMachine(_)));
    }
}
