use domain::ErrorKind;

/// 规则求值错误（按通道累积，不中断同设备其它通道）。
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleError {
    #[error("channel {channel_id}: condition references unknown metric {metric_id}")]
    UnknownMetric { channel_id: u64, metric_id: u64 },
    #[error("channel {channel_id}: unknown algorithm {algorithm_id}")]
    UnknownAlgorithm { channel_id: u64, algorithm_id: u64 },
    #[error("device {device_type}: gallons setting missing or not positive")]
    MissingGallons { device_type: String },
    #[error("channel {channel_id}: actuation failed: {message}")]
    Actuation {
        channel_id: u64,
        kind: ErrorKind,
        message: String,
    },
}

impl RuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuleError::Actuation { kind, .. } => *kind,
            _ => ErrorKind::InvalidInput,
        }
    }

    pub fn actuation(channel_id: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        RuleError::Actuation {
            channel_id,
            kind,
            message: message.into(),
        }
    }
}
