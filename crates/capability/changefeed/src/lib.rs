//! # 配置变更订阅
//!
//! 配置存储可以被外部直接修改（运维脚本、其他实例）。本 crate 订阅行级变更，
//! 把它们翻译成运行中农场的内存更新并重新发布。
//!
//! - [`ChangeSource`]：变更来源抽象；[`PgNotifySource`] 基于 Postgres LISTEN/NOTIFY，
//!   [`ChannelSource`] 供进程内嵌入与测试。
//! - [`ChangeFeed`]：适配器任务，断开后按固定间隔重连，错误从不致命。

mod error;
mod feed;
mod postgres;
mod source;

pub use error::ChangeFeedError;
pub use feed::{ChangeFeed, ChangeFeedHandle, DEFAULT_RETRY};
pub use postgres::{DEVICE_STATES_CHANNEL, DEVICES_CHANNEL, FARMS_CHANNEL, PgNotifySource};
pub use source::{ChangeEvent, ChangeSource, ChangeSubscription, ChannelSource};
