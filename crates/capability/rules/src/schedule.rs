use domain::{Channel, Schedule};

use crate::actuator::SwitchActuator;
use crate::clock::ScheduleService;
use crate::context::RuleContext;
use crate::error::RuleError;

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// 已开启；携带更新了执行计数与时间的排程，由调用方持久化。
    SwitchedOn(Schedule),
    SwitchedOff,
    Unchanged,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScheduleHandler;

impl ScheduleHandler {
    pub async fn handle(
        &self,
        ctx: &RuleContext<'_>,
        channel: &Channel,
        schedules: &ScheduleService,
        actuator: &dyn SwitchActuator,
    ) -> Result<ScheduleOutcome, RuleError> {
        if channel.schedules.is_empty() {
            return Ok(ScheduleOutcome::Unchanged);
        }
        let position = ctx.position(channel.board_id);
        let active = channel.schedules.iter().find(|schedule| {
            schedule.has_remaining_runs() && schedules.is_scheduled(schedule, channel.duration)
        });

        match (active, position) {
            (Some(schedule), 0) => {
                let message = format!("schedule {} started {}", schedule.id, channel.name);
                actuator.switch(channel.board_id, 1, &message).await?;
                let mut updated = schedule.clone();
                updated.execution_count += 1;
                updated.last_executed = Some(ctx.now);
                Ok(ScheduleOutcome::SwitchedOn(updated))
            }
            (None, 1) => {
                let message = format!("schedule ended {}", channel.name);
                actuator.switch(channel.board_id, 0, &message).await?;
                Ok(ScheduleOutcome::SwitchedOff)
            }
            _ => Ok(ScheduleOutcome::Unchanged),
        }
    }
}
