//! 追踪初始化、请求 ID 与进程级计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub poll_failures: u64,
    pub poll_latency_ms_total: u64,
    pub poll_latency_ms_count: u64,
    pub switches: u64,
    pub timer_switches: u64,
    pub deltas_published: u64,
    pub deltas_dropped: u64,
    pub rule_errors: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub notifications: u64,
    pub changefeed_events: u64,
}

/// 控制环计数器。
pub struct TelemetryMetrics {
    polls: AtomicU64,
    poll_failures: AtomicU64,
    poll_latency_ms_total: AtomicU64,
    poll_latency_ms_count: AtomicU64,
    switches: AtomicU64,
    timer_switches: AtomicU64,
    deltas_published: AtomicU64,
    deltas_dropped: AtomicU64,
    rule_errors: AtomicU64,
    workflows_completed: AtomicU64,
    workflows_failed: AtomicU64,
    notifications: AtomicU64,
    changefeed_events: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            poll_failures: AtomicU64::new(0),
            poll_latency_ms_total: AtomicU64::new(0),
            poll_latency_ms_count: AtomicU64::new(0),
            switches: AtomicU64::new(0),
            timer_switches: AtomicU64::new(0),
            deltas_published: AtomicU64::new(0),
            deltas_dropped: AtomicU64::new(0),
            rule_errors: AtomicU64::new(0),
            workflows_completed: AtomicU64::new(0),
            workflows_failed: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            changefeed_events: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            poll_latency_ms_total: self.poll_latency_ms_total.load(Ordering::Relaxed),
            poll_latency_ms_count: self.poll_latency_ms_count.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            timer_switches: self.timer_switches.load(Ordering::Relaxed),
            deltas_published: self.deltas_published.load(Ordering::Relaxed),
            deltas_dropped: self.deltas_dropped.load(Ordering::Relaxed),
            rule_errors: self.rule_errors.load(Ordering::Relaxed),
            workflows_completed: self.workflows_completed.load(Ordering::Relaxed),
            workflows_failed: self.workflows_failed.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            changefeed_events: self.changefeed_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录设备轮询次数。
pub fn record_poll() {
    metrics().polls.fetch_add(1, Ordering::Relaxed);
}

/// 记录轮询失败次数。
pub fn record_poll_failure() {
    metrics().poll_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录轮询耗时（毫秒，含设备 HTTP 往返与状态写入）。
pub fn record_poll_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .poll_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .poll_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_switch() {
    metrics().switches.fetch_add(1, Ordering::Relaxed);
}

pub fn record_timer_switch() {
    metrics().timer_switches.fetch_add(1, Ordering::Relaxed);
}

/// 记录增量发布次数。
pub fn record_delta_published() {
    metrics().deltas_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录增量因通道满被丢弃的次数。
pub fn record_delta_dropped() {
    metrics().deltas_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录规则处理错误次数。
pub fn record_rule_error() {
    metrics().rule_errors.fetch_add(1, Ordering::Relaxed);
}

pub fn record_workflow_completed() {
    metrics()
        .workflows_completed
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_workflow_failed() {
    metrics().workflows_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录通知发送次数。
pub fn record_notification() {
    metrics().notifications.fetch_add(1, Ordering::Relaxed);
}

/// 记录变更订阅处理的行事件数。
pub fn record_changefeed_event() {
    metrics()
        .changefeed_events
        .fetch_add(1, Ordering::Relaxed);
}
