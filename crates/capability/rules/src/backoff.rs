use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// 单个农场的退避表：通道 ID → 最近一次触发时间。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackoffTable {
    fired: HashMap<u64, DateTime<Utc>>,
}

impl BackoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `now < 触发时间 + backoff 分钟` 时阻止再次触发；恰好到期时放行。
    pub fn blocks(&self, channel_id: u64, backoff_minutes: u64, now: DateTime<Utc>) -> bool {
        if backoff_minutes == 0 {
            return false;
        }
        match self.fired.get(&channel_id) {
            Some(fired) => now < *fired + Duration::minutes(backoff_minutes as i64),
            None => false,
        }
    }

    pub fn record(&mut self, channel_id: u64, now: DateTime<Utc>) {
        self.fired.insert(channel_id, now);
    }

    pub fn last_fired(&self, channel_id: u64) -> Option<DateTime<Utc>> {
        self.fired.get(&channel_id).copied()
    }

    pub fn clear(&mut self, channel_id: u64) {
        self.fired.remove(&channel_id);
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backoff_expires_exactly_at_boundary() {
        let fired = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let mut table = BackoffTable::new();
        table.record(1, fired);

        assert!(table.blocks(1, 10, fired + Duration::minutes(5)));
        assert!(table.blocks(1, 10, fired + Duration::minutes(10) - Duration::seconds(1)));
        assert!(!table.blocks(1, 10, fired + Duration::minutes(10)));
        assert!(!table.blocks(2, 10, fired));
        assert!(!table.blocks(1, 0, fired));
    }
}
