//! 时钟与排程服务

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use domain::Schedule;

use crate::scheduled::is_scheduled;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 可注入的固定时钟。
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut slot) => *slot = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(slot) => *slot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// 解析 IANA 时区名；空值或无效值回落到 UTC。
pub fn parse_timezone(name: &str) -> Tz {
    name.trim().parse::<Tz>().unwrap_or(Tz::UTC)
}

/// 排程服务：农场时区下的“当前时间”与排程判定。
#[derive(Clone)]
pub struct ScheduleService {
    clock: Arc<dyn Clock>,
    timezone: Tz,
}

impl ScheduleService {
    pub fn new(clock: Arc<dyn Clock>, timezone: &str) -> Self {
        Self {
            clock,
            timezone: parse_timezone(timezone),
        }
    }

    pub fn system(timezone: &str) -> Self {
        Self::new(Arc::new(SystemClock), timezone)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn now(&self) -> DateTime<Tz> {
        self.clock.now().with_timezone(&self.timezone)
    }

    pub fn is_scheduled(&self, schedule: &Schedule, duration: u64) -> bool {
        is_scheduled(schedule, duration, self.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn invalid_timezone_falls_back_to_utc() {
        assert_eq!(parse_timezone(""), Tz::UTC);
        assert_eq!(parse_timezone("Mars/Olympus"), Tz::UTC);
        assert_eq!(parse_timezone("America/New_York"), Tz::America__New_York);
    }

    #[test]
    fn fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }
}
