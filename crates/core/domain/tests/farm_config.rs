use chrono::{TimeZone, Utc};
use domain::{
    Channel, Comparator, Condition, DeviceConfig, DeviceState, FarmConfig, FarmState, Frequency,
    Metric, Schedule, diff,
};

fn sample_farm() -> FarmConfig {
    let nutrient = DeviceConfig {
        id: 20,
        farm_id: 7,
        device_type: "nutrient".to_string(),
        uri: "http://nutrient.local".to_string(),
        enabled: true,
        metrics: vec![Metric {
            id: 201,
            device_id: 20,
            key: "ph".to_string(),
            enabled: true,
            ..Metric::default()
        }],
        channels: vec![Channel {
            id: 301,
            device_id: 20,
            board_id: 2,
            enabled: true,
            duration: 30,
            backoff: 10,
            conditions: vec![Condition {
                id: 401,
                channel_id: 301,
                metric_id: 201,
                comparator: Comparator::Gt,
                threshold: 6.0,
            }],
            schedules: vec![Schedule {
                id: 501,
                channel_id: 301,
                start_date: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
                end_date: Some(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()),
                frequency: Frequency::None,
                interval: 0,
                days: Vec::new(),
                count: 0,
                execution_count: 0,
                last_executed: None,
            }],
            ..Channel::default()
        }],
        ..DeviceConfig::default()
    };
    FarmConfig {
        id: 7,
        name: "greenhouse".to_string(),
        interval: 60,
        timezone: "America/New_York".to_string(),
        devices: vec![nutrient],
        ..FarmConfig::default()
    }
}

#[test]
fn farm_config_json_uses_data_model_names() {
    let farm = sample_farm();
    let json = serde_json::to_value(&farm).expect("serialize");
    assert_eq!(json["devices"][0]["type"], "nutrient");
    assert_eq!(json["devices"][0]["channels"][0]["boardId"], 2);
    assert_eq!(
        json["devices"][0]["channels"][0]["conditions"][0]["comparator"],
        ">"
    );
    assert_eq!(json["mode"], "standalone");

    let decoded: FarmConfig = serde_json::from_value(json).expect("deserialize");
    assert_eq!(decoded, farm);
}

#[test]
fn zeroed_state_declares_every_metric_and_slot() {
    let farm = sample_farm();
    let device = farm.device_by_type("nutrient").expect("device");
    let state = DeviceState::zeroed(device);
    assert_eq!(state.metric("ph"), Some(0.0));
    assert_eq!(state.channels, vec![0, 0, 0]);
}

#[test]
fn metric_lookup_spans_devices() {
    let farm = sample_farm();
    let (device, metric) = farm.find_metric(201).expect("metric");
    assert_eq!(device.device_type, "nutrient");
    assert_eq!(metric.key, "ph");
    assert!(farm.validate().is_ok());
}

#[test]
fn farm_state_delta_suppressed_when_unchanged() {
    let mut farm_state = FarmState::new(7);
    let mut state = DeviceState {
        id: 20,
        channels: vec![0, 1],
        ..DeviceState::default()
    };
    state.set_metric("ph", 6.2);
    farm_state.put_device("nutrient", state.clone());

    let prior = farm_state.device("nutrient");
    assert!(diff(prior, &state).is_empty());
}
