//! 条件通道
//!
//! 条件按声明顺序求值，首个成立的条件胜出。引用的指标可以属于农场内任意设备。

use domain::Channel;
use tracing::debug;

use crate::actuator::SwitchActuator;
use crate::algorithm::{AlgorithmHandler, AlgorithmOutcome};
use crate::backoff::BackoffTable;
use crate::context::RuleContext;
use crate::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConditionOutcome {
    /// 退避期内，未求值。
    BackedOff,
    /// 算法通道，结果短路条件与排程。
    Algorithm(AlgorithmOutcome),
    SwitchedOn,
    SwitchedOff,
    /// 落在去抖区间内，保持开启。
    Debounced,
    /// 未执行动作；`matched` 表示是否有条件成立。
    Unchanged { matched: bool },
}

impl ConditionOutcome {
    /// 是否已处理（未处理时才轮到排程）。
    pub fn is_handled(&self) -> bool {
        !matches!(self, ConditionOutcome::Unchanged { matched: false })
    }
}

#[derive(Debug, Clone, Copy)]
struct Evaluation {
    value: f64,
    threshold: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionHandler {
    algorithms: AlgorithmHandler,
}

impl ConditionHandler {
    pub async fn handle(
        &self,
        ctx: &RuleContext<'_>,
        channel: &Channel,
        backoff: &mut BackoffTable,
        actuator: &dyn SwitchActuator,
    ) -> Result<ConditionOutcome, RuleError> {
        if backoff.blocks(channel.id, channel.backoff, ctx.now) {
            debug!(target: "crop.rules", channel_id = channel.id, "condition_backed_off");
            return Ok(ConditionOutcome::BackedOff);
        }
        if channel.conditions.is_empty() {
            return Ok(ConditionOutcome::Unchanged { matched: false });
        }

        let mut winner: Option<Evaluation> = None;
        let mut last: Option<Evaluation> = None;
        for condition in &channel.conditions {
            let (metric_device, metric) =
                ctx.farm
                    .find_metric(condition.metric_id)
                    .ok_or(RuleError::UnknownMetric {
                        channel_id: channel.id,
                        metric_id: condition.metric_id,
                    })?;
            let Some(value) = ctx
                .state
                .metric_value(&metric_device.device_type, &metric.key)
            else {
                continue;
            };
            let evaluation = Evaluation {
                value,
                threshold: condition.threshold,
            };
            last = Some(evaluation);
            if condition.comparator.evaluate(value, condition.threshold) {
                winner = Some(evaluation);
                break;
            }
        }

        if let Some(algorithm_id) = channel.algorithm() {
            let Some(evaluation) = winner.or(last) else {
                return Ok(ConditionOutcome::Algorithm(AlgorithmOutcome::NoOp));
            };
            let outcome = self
                .algorithms
                .handle(
                    ctx,
                    channel,
                    algorithm_id,
                    evaluation.value,
                    evaluation.threshold,
                    backoff,
                    actuator,
                )
                .await?;
            return Ok(ConditionOutcome::Algorithm(outcome));
        }

        let Some(evaluation) = winner.or(last) else {
            return Ok(ConditionOutcome::Unchanged { matched: false });
        };
        let position = ctx.position(channel.board_id);
        let matched = winner.is_some();

        if matched && position == 0 {
            let message = format!(
                "condition matched on {} (value {:.2}, threshold {:.2})",
                channel.name, evaluation.value, evaluation.threshold
            );
            if channel.duration > 0 {
                actuator
                    .timer_switch(channel.board_id, channel.duration, &message)
                    .await?;
            } else {
                actuator.switch(channel.board_id, 1, &message).await?;
            }
            if channel.backoff > 0 {
                backoff.record(channel.id, ctx.now);
            }
            return Ok(ConditionOutcome::SwitchedOn);
        }

        if !matched && position == 1 {
            if channel.debounce > 0.0
                && evaluation.value >= evaluation.threshold - channel.debounce
            {
                debug!(
                    target: "crop.rules",
                    channel_id = channel.id,
                    value = evaluation.value,
                    threshold = evaluation.threshold,
                    debounce = channel.debounce,
                    "condition_debounced"
                );
                return Ok(ConditionOutcome::Debounced);
            }
            let message = format!(
                "condition cleared on {} (value {:.2}, threshold {:.2})",
                channel.name, evaluation.value, evaluation.threshold
            );
            actuator.switch(channel.board_id, 0, &message).await?;
            return Ok(ConditionOutcome::SwitchedOff);
        }

        Ok(ConditionOutcome::Unchanged { matched })
    }
}
