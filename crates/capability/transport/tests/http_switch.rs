use std::time::Duration;

use crop_transport::{HttpSmartSwitch, SmartSwitch, Switch, TimerEvent, TransportError};
use domain::ErrorKind;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> (MockServer, HttpSmartSwitch) {
    let server = MockServer::start().await;
    let device =
        HttpSmartSwitch::new(server.uri(), "nutrient", Duration::from_millis(500)).expect("client");
    (server, device)
}

#[tokio::test]
async fn state_decodes_metrics_and_channels() {
    let (server, device) = setup().await;
    Mock::given(method("GET"))
        .and(path("/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "metrics": { "ph": 6.3, "ec": 1.2 },
            "channels": [0, 1, 0]
        })))
        .mount(&server)
        .await;

    let state = device.state().await.expect("state");
    assert_eq!(state.metric("ph"), Some(6.3));
    assert_eq!(state.channels, vec![0, 1, 0]);
    assert_eq!(device.device_type(), "nutrient");
    assert!(!device.is_virtual());
}

#[tokio::test]
async fn switch_and_timer_post_to_slot_paths() {
    let (server, device) = setup().await;
    Mock::given(method("POST"))
        .and(path("/switch/2/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "channelId": 2, "position": 1 })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/timer/2/30"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "channelId": 2, "duration": 30 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(
        device.switch(2, 1).await.expect("switch"),
        Switch {
            channel_id: 2,
            position: 1
        }
    );
    assert_eq!(
        device.timer_switch(2, 30).await.expect("timer"),
        TimerEvent {
            channel_id: 2,
            duration: 30
        }
    );
}

#[tokio::test]
async fn system_info_reads_versions() {
    let (server, device) = setup().await;
    Mock::given(method("GET"))
        .and(path("/system"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hardwareVersion": "rev-b",
            "firmwareVersion": "2.4.1"
        })))
        .mount(&server)
        .await;

    let info = device.refresh_system_info().await.expect("system");
    assert_eq!(info.hardware_version, "rev-b");
    assert_eq!(info.firmware_version, "2.4.1");
}

#[tokio::test]
async fn error_status_is_backend_failure() {
    let (server, device) = setup().await;
    Mock::given(method("GET"))
        .and(path("/state"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = device.state().await.expect_err("unavailable");
    assert!(matches!(err, TransportError::Status { status: 503, .. }));
    assert_eq!(err.kind(), ErrorKind::BackendFailure);
}

#[tokio::test]
async fn slow_device_times_out() {
    let (server, device) = setup().await;
    Mock::given(method("GET"))
        .and(path("/state"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "metrics": {}, "channels": [] }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = device.state().await.expect_err("deadline");
    assert!(matches!(err, TransportError::Timeout(_)));
}
