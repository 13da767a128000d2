use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use crop_rules::{
    AlgorithmOutcome, BackoffTable, ChannelOutcome, ConditionOutcome, FixedClock, RuleEngine,
    RuleError, ScheduleOutcome, ScheduleService, SwitchActuator,
};
use domain::{
    ALGORITHM_PH, Channel, Comparator, Condition, DeviceConfig, ErrorKind, FarmConfig, FarmState,
    Frequency, Metric, Schedule,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Switch(usize, i32),
    Timer(usize, u64),
}

#[derive(Default)]
struct RecordingActuator {
    calls: Mutex<Vec<Call>>,
    fail: bool,
}

impl RecordingActuator {
    fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SwitchActuator for RecordingActuator {
    async fn switch(&self, board_id: usize, position: i32, _message: &str) -> Result<(), RuleError> {
        if self.fail {
            return Err(RuleError::actuation(0, ErrorKind::BackendFailure, "device offline"));
        }
        self.calls.lock().unwrap().push(Call::Switch(board_id, position));
        Ok(())
    }

    async fn timer_switch(
        &self,
        board_id: usize,
        seconds: u64,
        _message: &str,
    ) -> Result<(), RuleError> {
        if self.fail {
            return Err(RuleError::actuation(0, ErrorKind::BackendFailure, "device offline"));
        }
        self.calls.lock().unwrap().push(Call::Timer(board_id, seconds));
        Ok(())
    }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
}

fn metric(id: u64, device_id: u64, key: &str) -> Metric {
    Metric {
        id,
        device_id,
        key: key.to_string(),
        enabled: true,
        ..Metric::default()
    }
}

fn condition(metric_id: u64, comparator: Comparator, threshold: f64) -> Condition {
    Condition {
        id: metric_id + 1000,
        channel_id: 301,
        metric_id,
        comparator,
        threshold,
    }
}

fn channel(conditions: Vec<Condition>) -> Channel {
    Channel {
        id: 301,
        device_id: 20,
        board_id: 2,
        name: "pump".to_string(),
        enabled: true,
        conditions,
        ..Channel::default()
    }
}

fn farm_with(channel: Channel) -> FarmConfig {
    let nutrient = DeviceConfig {
        id: 20,
        farm_id: 7,
        device_type: "nutrient".to_string(),
        enabled: true,
        metrics: vec![metric(201, 20, "ph"), metric(202, 20, "temp")],
        channels: vec![channel],
        ..DeviceConfig::default()
    };
    let climate = DeviceConfig {
        id: 30,
        farm_id: 7,
        device_type: "climate".to_string(),
        enabled: true,
        metrics: vec![metric(301, 30, "humidity")],
        ..DeviceConfig::default()
    };
    FarmConfig {
        id: 7,
        name: "greenhouse".to_string(),
        timezone: "UTC".to_string(),
        devices: vec![nutrient, climate],
        ..FarmConfig::default()
    }
}

fn state(metrics: &[(&str, &str, f64)], position: i32) -> FarmState {
    let mut state = FarmState::new(7);
    for (device_type, key, value) in metrics {
        state.set_metric_value(device_type, key, *value);
    }
    state.set_channel_value("nutrient", 2, position);
    state
}

fn engine(now: DateTime<Utc>) -> (RuleEngine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(now));
    let engine = RuleEngine::new(ScheduleService::new(clock.clone(), "UTC"));
    (engine, clock)
}

async fn run(
    engine: &RuleEngine,
    farm: &FarmConfig,
    state: &FarmState,
    backoff: &mut BackoffTable,
    actuator: &RecordingActuator,
) -> crop_rules::ManageReport {
    let device = farm.device_by_type("nutrient").unwrap();
    engine
        .manage_device(farm, device, state, backoff, actuator)
        .await
}

#[tokio::test]
async fn schedule_window_switches_on_and_counts_execution() {
    let mut ch = channel(Vec::new());
    ch.schedules = vec![Schedule {
        id: 501,
        channel_id: 301,
        start_date: at(8, 0),
        end_date: Some(at(9, 0)),
        frequency: Frequency::None,
        interval: 0,
        days: Vec::new(),
        count: 0,
        execution_count: 0,
        last_executed: None,
    }];
    let farm = farm_with(ch);
    let (engine, _) = engine(at(8, 30));
    let actuator = RecordingActuator::default();
    let mut backoff = BackoffTable::new();

    let report = run(&engine, &farm, &state(&[], 0), &mut backoff, &actuator).await;
    assert_eq!(actuator.calls(), vec![Call::Switch(2, 1)]);
    assert_eq!(report.updated_schedules.len(), 1);
    assert_eq!(report.updated_schedules[0].execution_count, 1);
    assert_eq!(report.updated_schedules[0].last_executed, Some(at(8, 30)));
}

#[tokio::test]
async fn schedule_outside_window_switches_off() {
    let mut ch = channel(Vec::new());
    ch.schedules = vec![Schedule {
        id: 501,
        channel_id: 301,
        start_date: at(8, 0),
        end_date: Some(at(9, 0)),
        frequency: Frequency::None,
        interval: 0,
        days: Vec::new(),
        count: 1,
        execution_count: 0,
        last_executed: None,
    }];
    let farm = farm_with(ch);
    let (engine, _) = engine(at(9, 30));
    let actuator = RecordingActuator::default();
    let report = run(&engine, &farm, &state(&[], 1), &mut BackoffTable::new(), &actuator).await;
    assert_eq!(actuator.calls(), vec![Call::Switch(2, 0)]);
    assert_eq!(
        report.outcome(301),
        Some(&ChannelOutcome::Schedule(ScheduleOutcome::SwitchedOff))
    );
}

#[tokio::test]
async fn exhausted_schedule_is_not_active() {
    let mut ch = channel(Vec::new());
    ch.schedules = vec![Schedule {
        id: 501,
        channel_id: 301,
        start_date: at(8, 0),
        end_date: Some(at(9, 0)),
        frequency: Frequency::None,
        interval: 0,
        days: Vec::new(),
        count: 1,
        execution_count: 1,
        last_executed: Some(at(8, 0)),
    }];
    let farm = farm_with(ch);
    let (engine, _) = engine(at(8, 30));
    let actuator = RecordingActuator::default();
    run(&engine, &farm, &state(&[], 0), &mut BackoffTable::new(), &actuator).await;
    assert!(actuator.calls().is_empty());
}

#[tokio::test]
async fn condition_fires_timer_then_backs_off() {
    let mut ch = channel(vec![condition(201, Comparator::Gt, 6.0)]);
    ch.duration = 30;
    ch.backoff = 10;
    let farm = farm_with(ch);
    let (engine, clock) = engine(at(10, 0));
    let actuator = RecordingActuator::default();
    let mut backoff = BackoffTable::new();

    let report = run(
        &engine,
        &farm,
        &state(&[("nutrient", "ph", 6.3)], 0),
        &mut backoff,
        &actuator,
    )
    .await;
    assert_eq!(actuator.calls(), vec![Call::Timer(2, 30)]);
    assert_eq!(
        report.outcome(301),
        Some(&ChannelOutcome::Condition(ConditionOutcome::SwitchedOn))
    );
    assert_eq!(backoff.last_fired(301), Some(at(10, 0)));

    clock.advance(Duration::minutes(5));
    let report = run(
        &engine,
        &farm,
        &state(&[("nutrient", "ph", 6.4)], 0),
        &mut backoff,
        &actuator,
    )
    .await;
    assert_eq!(
        report.outcome(301),
        Some(&ChannelOutcome::Condition(ConditionOutcome::BackedOff))
    );
    assert_eq!(actuator.calls().len(), 1);

    clock.advance(Duration::minutes(5));
    run(
        &engine,
        &farm,
        &state(&[("nutrient", "ph", 6.4)], 0),
        &mut backoff,
        &actuator,
    )
    .await;
    assert_eq!(actuator.calls().len(), 2);
}

#[tokio::test]
async fn zero_duration_switches_instead_of_timer() {
    let farm = farm_with(channel(vec![condition(201, Comparator::Eq, 6.0)]));
    let (engine, _) = engine(at(10, 0));
    let actuator = RecordingActuator::default();
    run(
        &engine,
        &farm,
        &state(&[("nutrient", "ph", 6.0)], 0),
        &mut BackoffTable::new(),
        &actuator,
    )
    .await;
    assert_eq!(actuator.calls(), vec![Call::Switch(2, 1)]);
}

#[tokio::test]
async fn debounce_holds_then_releases() {
    let mut ch = channel(vec![condition(202, Comparator::Gt, 75.0)]);
    ch.debounce = 2.0;
    let farm = farm_with(ch);
    let (engine, _) = engine(at(10, 0));
    let actuator = RecordingActuator::default();
    let mut backoff = BackoffTable::new();

    let report = run(
        &engine,
        &farm,
        &state(&[("nutrient", "temp", 74.0)], 1),
        &mut backoff,
        &actuator,
    )
    .await;
    assert_eq!(
        report.outcome(301),
        Some(&ChannelOutcome::Condition(ConditionOutcome::Debounced))
    );
    assert!(actuator.calls().is_empty());

    run(
        &engine,
        &farm,
        &state(&[("nutrient", "temp", 72.0)], 1),
        &mut backoff,
        &actuator,
    )
    .await;
    assert_eq!(actuator.calls(), vec![Call::Switch(2, 0)]);
}

#[tokio::test]
async fn first_true_condition_wins_across_devices() {
    let farm = farm_with(channel(vec![
        condition(201, Comparator::Lt, 5.0),
        condition(301, Comparator::Ge, 80.0),
    ]));
    let (engine, _) = engine(at(10, 0));
    let actuator = RecordingActuator::default();
    run(
        &engine,
        &farm,
        &state(&[("nutrient", "ph", 6.0), ("climate", "humidity", 85.0)], 0),
        &mut BackoffTable::new(),
        &actuator,
    )
    .await;
    assert_eq!(actuator.calls(), vec![Call::Switch(2, 1)]);
}

#[tokio::test]
async fn ph_algorithm_doses_and_short_circuits() {
    let mut ch = channel(vec![condition(201, Comparator::Gt, 6.0)]);
    ch.algorithm_id = Some(ALGORITHM_PH);
    ch.duration = 120;
    ch.schedules = vec![Schedule {
        id: 501,
        channel_id: 301,
        start_date: at(0, 0),
        end_date: None,
        frequency: Frequency::None,
        interval: 0,
        days: Vec::new(),
        count: 0,
        execution_count: 0,
        last_executed: None,
    }];
    let mut farm = farm_with(ch);
    farm.devices[0]
        .settings
        .insert("nutrient.gallons".to_string(), "10".to_string());
    let (engine, _) = engine(at(10, 0));
    let actuator = RecordingActuator::default();

    let report = run(
        &engine,
        &farm,
        &state(&[("nutrient", "ph", 6.4)], 0),
        &mut BackoffTable::new(),
        &actuator,
    )
    .await;
    assert_eq!(actuator.calls(), vec![Call::Timer(2, 2)]);
    assert_eq!(
        report.outcome(301),
        Some(&ChannelOutcome::Condition(ConditionOutcome::Algorithm(
            AlgorithmOutcome::Dosed { seconds: 2 }
        )))
    );
    assert!(report.updated_schedules.is_empty());
}

#[tokio::test]
async fn ph_algorithm_without_gallons_is_invalid_input() {
    let mut ch = channel(vec![condition(201, Comparator::Gt, 6.0)]);
    ch.algorithm_id = Some(ALGORITHM_PH);
    let farm = farm_with(ch);
    let (engine, _) = engine(at(10, 0));
    let actuator = RecordingActuator::default();

    let report = run(
        &engine,
        &farm,
        &state(&[("nutrient", "ph", 6.4)], 0),
        &mut BackoffTable::new(),
        &actuator,
    )
    .await;
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind(), ErrorKind::InvalidInput);
    assert!(actuator.calls().is_empty());
}

#[tokio::test]
async fn actuation_errors_are_collected_per_channel() {
    let farm = farm_with(channel(vec![condition(201, Comparator::Gt, 6.0)]));
    let (engine, _) = engine(at(10, 0));
    let actuator = RecordingActuator::failing();
    let report = run(
        &engine,
        &farm,
        &state(&[("nutrient", "ph", 6.4)], 0),
        &mut BackoffTable::new(),
        &actuator,
    )
    .await;
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind(), ErrorKind::BackendFailure);
    assert!(report.outcomes.is_empty());
}
