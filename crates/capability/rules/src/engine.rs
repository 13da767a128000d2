//! 设备级规则求值入口

use domain::{DeviceConfig, FarmConfig, FarmState, Schedule};
use tracing::{debug, warn};

use crate::actuator::SwitchActuator;
use crate::backoff::BackoffTable;
use crate::clock::ScheduleService;
use crate::condition::{ConditionHandler, ConditionOutcome};
use crate::context::RuleContext;
use crate::error::RuleError;
use crate::schedule::{ScheduleHandler, ScheduleOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutcome {
    Condition(ConditionOutcome),
    Schedule(ScheduleOutcome),
}

/// 一次设备求值的汇总。
#[derive(Debug, Clone, Default)]
pub struct ManageReport {
    pub outcomes: Vec<(u64, ChannelOutcome)>,
    /// 需要持久化的排程（执行计数已递增）。
    pub updated_schedules: Vec<Schedule>,
    pub errors: Vec<RuleError>,
}

impl ManageReport {
    pub fn outcome(&self, channel_id: u64) -> Option<&ChannelOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == channel_id)
            .map(|(_, outcome)| outcome)
    }
}

#[derive(Clone)]
pub struct RuleEngine {
    schedules: ScheduleService,
    conditions: ConditionHandler,
    scheduler: ScheduleHandler,
}

impl RuleEngine {
    pub fn new(schedules: ScheduleService) -> Self {
        Self {
            schedules,
            conditions: ConditionHandler::default(),
            scheduler: ScheduleHandler,
        }
    }

    pub fn schedule_service(&self) -> &ScheduleService {
        &self.schedules
    }

    /// 对设备的每个启用通道依次执行 条件 → 算法 → 排程。
    ///
    /// 单个通道出错只记录到报告中，不影响其它通道。
    pub async fn manage_device(
        &self,
        farm: &FarmConfig,
        device: &DeviceConfig,
        state: &FarmState,
        backoff: &mut BackoffTable,
        actuator: &dyn SwitchActuator,
    ) -> ManageReport {
        let ctx = RuleContext::new(farm, device, state, self.schedules.now_utc());
        let mut report = ManageReport::default();
        for channel in device.channels.iter().filter(|c| c.enabled) {
            let outcome = match self.conditions.handle(&ctx, channel, backoff, actuator).await {
                Ok(outcome) if outcome.is_handled() => Ok(ChannelOutcome::Condition(outcome)),
                Ok(_) => self
                    .scheduler
                    .handle(&ctx, channel, &self.schedules, actuator)
                    .await
                    .map(ChannelOutcome::Schedule),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(outcome) => {
                    debug!(
                        target: "crop.rules",
                        farm_id = farm.id,
                        device_type = %device.device_type,
                        channel_id = channel.id,
                        outcome = ?outcome,
                        "channel_evaluated"
                    );
                    if let ChannelOutcome::Schedule(ScheduleOutcome::SwitchedOn(schedule)) =
                        &outcome
                    {
                        report.updated_schedules.push(schedule.clone());
                    }
                    report.outcomes.push((channel.id, outcome));
                }
                Err(err) => {
                    warn!(
                        target: "crop.rules",
                        farm_id = farm.id,
                        device_type = %device.device_type,
                        channel_id = channel.id,
                        error = %err,
                        "channel_rule_failed"
                    );
                    report.errors.push(err);
                }
            }
        }
        report
    }
}
