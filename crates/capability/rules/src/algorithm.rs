//! 算法通道

use domain::{ALGORITHM_PH, Channel};
use tracing::debug;

use crate::actuator::SwitchActuator;
use crate::backoff::BackoffTable;
use crate::context::RuleContext;
use crate::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmOutcome {
    /// 已定时开启 `seconds` 秒。
    Dosed { seconds: u64 },
    NoOp,
}

/// pH 加药：`dose = round((value - threshold) × gallons / 2)` 秒。
#[derive(Debug, Default, Clone, Copy)]
pub struct AlgorithmHandler;

impl AlgorithmHandler {
    #[allow(clippy::too_many_arguments)]
    pub async fn handle(
        &self,
        ctx: &RuleContext<'_>,
        channel: &Channel,
        algorithm_id: u64,
        value: f64,
        threshold: f64,
        backoff: &mut BackoffTable,
        actuator: &dyn SwitchActuator,
    ) -> Result<AlgorithmOutcome, RuleError> {
        if algorithm_id != ALGORITHM_PH {
            return Err(RuleError::UnknownAlgorithm {
                channel_id: channel.id,
                algorithm_id,
            });
        }
        let gallons = ctx
            .device
            .int_setting("gallons")
            .filter(|gallons| *gallons > 0)
            .ok_or_else(|| RuleError::MissingGallons {
                device_type: ctx.device.device_type.clone(),
            })?;

        let dose = ph_dose(value, threshold, gallons);
        if dose <= 0 {
            debug!(
                target: "crop.rules",
                channel_id = channel.id,
                value,
                threshold,
                "algorithm_no_dose"
            );
            return Ok(AlgorithmOutcome::NoOp);
        }
        let seconds = dose as u64;
        let message = format!(
            "pH dosing {} for {seconds}s (value {value:.2}, threshold {threshold:.2})",
            channel.name
        );
        actuator
            .timer_switch(channel.board_id, seconds, &message)
            .await?;
        if channel.backoff > 0 {
            backoff.record(channel.id, ctx.now);
        }
        Ok(AlgorithmOutcome::Dosed { seconds })
    }
}

fn ph_dose(value: f64, threshold: f64, gallons: i64) -> i64 {
    ((value - threshold) * gallons as f64 / 2.0).round() as i64
}
