//! 变更来源
//!
//! [`ChangeSource`] 每次 `connect` 产生一个订阅；订阅返回 `Ok(None)` 或错误即视为断开，
//! 由 [`ChangeFeed`](crate::ChangeFeed) 退避后重新连接。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use domain::{DeviceConfig, DeviceState, FarmConfig};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::error::ChangeFeedError;

/// 一行配置或状态变更，已解码为内存结构。
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Farm(FarmConfig),
    Device { farm_id: u64, device: DeviceConfig },
    DeviceState { device_id: u64, state: DeviceState },
}

#[async_trait]
pub trait ChangeSubscription: Send {
    async fn recv(&mut self) -> Result<Option<ChangeEvent>, ChangeFeedError>;
}

#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ChangeSubscription>, ChangeFeedError>;
}

/// 进程内来源：每次 `connect` 取出一条预先创建的通道。
#[derive(Default)]
pub struct ChannelSource {
    pending: Mutex<VecDeque<Receiver<ChangeEvent>>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一次订阅，返回其发送端；发送端释放即断开。
    pub fn open(&self, capacity: usize) -> Result<Sender<ChangeEvent>, ChangeFeedError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.pending
            .lock()
            .map_err(|_| ChangeFeedError::Disconnected("lock failed".to_string()))?
            .push_back(rx);
        Ok(tx)
    }
}

#[async_trait]
impl ChangeSource for ChannelSource {
    async fn connect(&self) -> Result<Box<dyn ChangeSubscription>, ChangeFeedError> {
        let next = self
            .pending
            .lock()
            .map_err(|_| ChangeFeedError::Disconnected("lock failed".to_string()))?
            .pop_front();
        match next {
            Some(rx) => Ok(Box::new(ChannelSubscription { rx })),
            None => Err(ChangeFeedError::Disconnected(
                "no pending subscription".to_string(),
            )),
        }
    }
}

struct ChannelSubscription {
    rx: Receiver<ChangeEvent>,
}

#[async_trait]
impl ChangeSubscription for ChannelSubscription {
    async fn recv(&mut self) -> Result<Option<ChangeEvent>, ChangeFeedError> {
        Ok(self.rx.recv().await)
    }
}
