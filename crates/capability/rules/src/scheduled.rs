//! 排程窗口判定
//!
//! 判定分两步：先看周期（频率、间隔、星期掩码），再看时间窗口。
//! 日期比较使用农场时区下的日历日期。

use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};
use domain::{Frequency, Schedule};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// `duration` 为通道时长（秒）。结果只取决于参数，可重复求值。
pub fn is_scheduled<Tz: TimeZone>(schedule: &Schedule, duration: u64, now: DateTime<Tz>) -> bool {
    let tz = now.timezone();
    let start = schedule.start_date.with_timezone(&tz);

    if schedule.frequency != Frequency::None {
        if !day_allowed(&schedule.days, now.weekday()) {
            return false;
        }
        if !cadence_matches(schedule, &start, &now) {
            return false;
        }
    }

    if duration > 0 {
        return within_daily_window(&start, duration, &now);
    }
    if let Some(end) = schedule.end_date {
        let end = end.with_timezone(&tz);
        return start <= now && now <= end;
    }
    true
}

fn day_allowed(days: &[String], weekday: Weekday) -> bool {
    if days.is_empty() {
        return true;
    }
    let today = day_code(weekday);
    days.iter().any(|day| day.trim().eq_ignore_ascii_case(today))
}

fn day_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

/// 间隔 N 表示“每 N 个周期”，且首次触发不早于开始后第 N 个周期。
fn cadence_matches<Tz: TimeZone>(schedule: &Schedule, start: &DateTime<Tz>, now: &DateTime<Tz>) -> bool {
    let interval = i64::from(schedule.interval);
    let step = interval.max(1);
    match schedule.frequency {
        Frequency::None => true,
        // 每 N 个周期执行一次：既要达到间隔，又要落在周期点上
        Frequency::Daily => {
            let days = elapsed_days(start, now);
            days >= interval && days % step == 0
        }
        Frequency::Weekly => {
            let days = elapsed_days(start, now);
            days >= 7 * interval && days % (7 * step) == 0
        }
        Frequency::Monthly => {
            let months = elapsed_months(start, now);
            months >= interval && months % step == 0 && now.day() == start.day()
        }
        Frequency::Yearly => {
            let years = i64::from(now.year() - start.year());
            years >= interval
                && years % step == 0
                && now.month() == start.month()
                && now.day() == start.day()
        }
    }
}

fn elapsed_days<Tz: TimeZone>(start: &DateTime<Tz>, now: &DateTime<Tz>) -> i64 {
    (now.date_naive() - start.date_naive()).num_days()
}

fn elapsed_months<Tz: TimeZone>(start: &DateTime<Tz>, now: &DateTime<Tz>) -> i64 {
    i64::from(now.year() - start.year()) * 12 + i64::from(now.month()) - i64::from(start.month())
}

/// 只比较时:分；窗口跨过午夜时回绕。
fn within_daily_window<Tz: TimeZone>(start: &DateTime<Tz>, duration: u64, now: &DateTime<Tz>) -> bool {
    let span = duration / 60;
    if span >= u64::from(MINUTES_PER_DAY) {
        return true;
    }
    let begin = start.hour() * 60 + start.minute();
    let current = now.hour() * 60 + now.minute();
    let end = begin + span as u32;
    if end < MINUTES_PER_DAY {
        begin <= current && current <= end
    } else {
        current >= begin || current <= end - MINUTES_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn schedule(frequency: Frequency, interval: u32) -> Schedule {
        Schedule {
            id: 1,
            channel_id: 1,
            start_date: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            end_date: None,
            frequency,
            interval,
            days: Vec::new(),
            count: 0,
            execution_count: 0,
            last_executed: None,
        }
    }

    #[test]
    fn end_bounded_window() {
        let mut s = schedule(Frequency::None, 0);
        s.end_date = Some(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        assert!(is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap()));
        assert!(is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
        assert!(!is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 1, 9, 1, 0).unwrap()));
        assert!(!is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 1, 7, 59, 0).unwrap()));
    }

    #[test]
    fn open_window_runs_forever() {
        let s = schedule(Frequency::None, 0);
        assert!(is_scheduled(&s, 0, Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn duration_window_compares_time_of_day() {
        let s = schedule(Frequency::None, 0);
        // 08:00 起 30 分钟，任意日期生效
        assert!(is_scheduled(&s, 1800, Utc.with_ymd_and_hms(2024, 7, 9, 8, 15, 0).unwrap()));
        assert!(is_scheduled(&s, 1800, Utc.with_ymd_and_hms(2024, 7, 9, 8, 30, 0).unwrap()));
        assert!(!is_scheduled(&s, 1800, Utc.with_ymd_and_hms(2024, 7, 9, 8, 31, 0).unwrap()));
    }

    #[test]
    fn duration_window_wraps_past_midnight() {
        let mut s = schedule(Frequency::None, 0);
        s.start_date = Utc.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap();
        assert!(is_scheduled(&s, 7200, Utc.with_ymd_and_hms(2024, 6, 2, 0, 30, 0).unwrap()));
        assert!(is_scheduled(&s, 7200, Utc.with_ymd_and_hms(2024, 6, 2, 23, 10, 0).unwrap()));
        assert!(!is_scheduled(&s, 7200, Utc.with_ymd_and_hms(2024, 6, 2, 1, 1, 0).unwrap()));
        assert!(is_scheduled(&s, 86_400, Utc.with_ymd_and_hms(2024, 6, 2, 12, 0, 0).unwrap()));
    }

    #[test]
    fn daily_cadence_crosses_month_boundary() {
        let s = schedule(Frequency::Daily, 2);
        assert!(!is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap()));
        assert!(is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()));
        // 间隔按周期点计：第 3 天已超过间隔但不是 2 的倍数，不执行（不是“超过间隔即执行”）
        assert!(!is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 4, 8, 0, 0).unwrap()));
        // 6/1 → 7/1 共 30 天
        assert!(is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap()));
    }

    #[test]
    fn weekly_cadence_and_day_mask() {
        let mut s = schedule(Frequency::Weekly, 1);
        assert!(!is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()));
        assert!(is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 8, 8, 0, 0).unwrap()));
        assert!(!is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 9, 8, 0, 0).unwrap()));

        // 2024-06-08 是周六
        s.days = vec!["MO".to_string(), "WE".to_string()];
        assert!(!is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 8, 8, 0, 0).unwrap()));
        s.days.push("sa".to_string());
        assert!(is_scheduled(&s, 0, Utc.with_ymd_and_hms(2024, 6, 8, 8, 0, 0).unwrap()));
    }

    #[test]
    fn monthly_and_yearly_require_same_day() {
        let monthly = schedule(Frequency::Monthly, 1);
        assert!(is_scheduled(&monthly, 0, Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()));
        assert!(!is_scheduled(&monthly, 0, Utc.with_ymd_and_hms(2024, 7, 2, 9, 0, 0).unwrap()));
        assert!(!is_scheduled(&monthly, 0, Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));

        let yearly = schedule(Frequency::Yearly, 1);
        assert!(is_scheduled(&yearly, 0, Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()));
        assert!(!is_scheduled(&yearly, 0, Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()));
    }

    #[test]
    fn cadence_uses_farm_timezone() {
        let s = schedule(Frequency::Daily, 1);
        let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
        // 6/2 02:00 UTC 在纽约仍是 6/1
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 2, 0, 0).unwrap().with_timezone(&tz);
        assert!(!is_scheduled(&s, 0, now));
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 14, 0, 0).unwrap().with_timezone(&tz);
        assert!(is_scheduled(&s, 0, now));
    }
}
