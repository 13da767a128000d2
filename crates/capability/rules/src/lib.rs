//! 规则能力
//!
//! 每个通道按 条件 → 算法 → 排程 的顺序求值：
//!
//! - [`ConditionHandler`]：阈值条件，首个成立的条件胜出；支持退避与去抖
//! - [`AlgorithmHandler`]：算法通道（pH 加药），结果短路条件与排程
//! - [`ScheduleHandler`]：条件未命中时按排程开关
//! - [`is_scheduled`]：排程窗口判定（农场时区）
//!
//! 处理器不持有状态，退避表由调用方传入；执行动作通过 [`SwitchActuator`] 回调设备服务。

mod actuator;
mod algorithm;
mod backoff;
mod clock;
mod condition;
mod context;
mod engine;
mod error;
mod schedule;
mod scheduled;

pub use actuator::SwitchActuator;
pub use algorithm::{AlgorithmHandler, AlgorithmOutcome};
pub use backoff::BackoffTable;
pub use clock::{Clock, FixedClock, ScheduleService, SystemClock, parse_timezone};
pub use condition::{ConditionHandler, ConditionOutcome};
pub use context::RuleContext;
pub use engine::{ChannelOutcome, ManageReport, RuleEngine};
pub use error::RuleError;
pub use schedule::{ScheduleHandler, ScheduleOutcome};
pub use scheduled::is_scheduled;

