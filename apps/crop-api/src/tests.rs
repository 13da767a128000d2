use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use crop_config::AppConfig;
use crop_farm::FarmService;
use crop_storage::StoreFactory;
use crop_transport::LogNotifier;
use domain::{
    Channel, DeviceConfig, FarmConfig, FarmMode, Metric, Permission, StoreKind, roles,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::bootstrap::{self, Runtime};
use crate::routes::create_router;

const FARM_ID: u64 = 70;
const ADMIN: u64 = 501;
const ANALYST: u64 = 502;
const STRANGER: u64 = 503;

fn farm_config() -> FarmConfig {
    FarmConfig {
        id: FARM_ID,
        organization_id: 7,
        name: "api".to_string(),
        mode: FarmMode::Virtual,
        timezone: "UTC".to_string(),
        devices: vec![DeviceConfig {
            id: 71,
            farm_id: FARM_ID,
            device_type: "nutrient".to_string(),
            uri: "virtual://nutrient".to_string(),
            enabled: true,
            metrics: vec![Metric {
                id: 700,
                device_id: 71,
                key: "ph".to_string(),
                enabled: true,
                ..Metric::default()
            }],
            channels: (0..2)
                .map(|board_id| Channel {
                    id: 710 + board_id as u64,
                    device_id: 71,
                    board_id,
                    enabled: true,
                    ..Channel::default()
                })
                .collect(),
            ..DeviceConfig::default()
        }],
        ..FarmConfig::default()
    }
}

async fn app() -> (Router, Runtime, Arc<FarmService>) {
    let config = AppConfig {
        default_devices: false,
        ..AppConfig::default()
    };
    let runtime = bootstrap::assemble(StoreFactory::new(), Arc::new(LogNotifier), &config);
    let stores = runtime.state.stores.clone();
    let permissions = stores.permission_store(StoreKind::Memory).expect("permissions");
    for (user_id, role_id) in [(ADMIN, roles::ADMIN), (ANALYST, roles::ANALYST)] {
        permissions
            .save(&Permission {
                user_id,
                organization_id: 7,
                farm_id: FARM_ID,
                role_id,
            })
            .await
            .expect("permission");
    }
    stores
        .farm_config_store(StoreKind::Memory)
        .expect("config store")
        .save(&farm_config())
        .await
        .expect("save config");
    let farm = runtime
        .factory
        .create_and_run(farm_config())
        .await
        .expect("farm");
    (create_router(runtime.state.clone()), runtime, farm)
}

async fn call(app: &Router, method: Method, uri: &str, user: Option<u64>) -> (StatusCode, Value) {
    call_with_body(app, method, uri, user, Body::empty()).await
}

async fn call_with_body(
    app: &Router,
    method: Method,
    uri: &str,
    user: Option<u64>,
    body: Body,
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        request = request.header("x-user-id", user.to_string());
    }
    let response = app
        .clone()
        .oneshot(request.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn health_reports_running_farms() {
    let (app, _runtime, farm) = app().await;
    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["farms"], 1);
    assert_eq!(body["data"]["status"], "ok");
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn callers_need_identity_and_role() {
    let (app, _runtime, farm) = app().await;
    let uri = format!("/farms/{FARM_ID}/config");

    let (status, body) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH.UNAUTHORIZED");

    let (status, body) = call(&app, Method::GET, &uri, Some(STRANGER)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "AUTH.FORBIDDEN");

    let (status, body) = call(&app, Method::GET, &uri, Some(ANALYST)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], FARM_ID);
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn analyst_reads_state_but_cannot_switch() {
    let (app, _runtime, farm) = app().await;
    let (status, body) = call(&app, Method::GET, &format!("/farms/{FARM_ID}/state"), Some(ANALYST)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["devices"]["nutrient"].is_object());

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/farms/{FARM_ID}/devices/nutrient/switch/1/1"),
        Some(ANALYST),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn switch_turns_channel_on() {
    let (app, _runtime, farm) = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/farms/{FARM_ID}/devices/nutrient/switch/1/1"),
        Some(ADMIN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["channelId"], 1);
    assert_eq!(body["data"]["state"], 1);

    eventually(|| {
        farm.state()
            .map(|s| s.channel_value("nutrient", 1) == Some(1))
            .unwrap_or(false)
    })
    .await;
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn timer_switch_reports_duration() {
    let (app, _runtime, farm) = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/farms/{FARM_ID}/devices/nutrient/timerSwitch/0/30"),
        Some(ADMIN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["duration"], 30);
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn invalid_requests_map_to_client_errors() {
    let (app, _runtime, farm) = app().await;
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/farms/{FARM_ID}/devices/nutrient/switch/1/7"),
        Some(ADMIN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/farms/{FARM_ID}/devices/climate/switch/1/1"),
        Some(ADMIN),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RESOURCE.NOT_FOUND");

    let (status, _) = call(&app, Method::GET, "/farms/9999/state", Some(ADMIN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn metric_value_lands_in_history() {
    let (app, _runtime, farm) = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/farms/{FARM_ID}/devices/nutrient/metrics/ph/6.5"),
        Some(ADMIN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], 6.5);

    let history_uri = format!("/farms/{FARM_ID}/devices/nutrient/history/ph");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (status, body) = call(&app, Method::GET, &history_uri, Some(ANALYST)).await;
        assert_eq!(status, StatusCode::OK);
        let values = body["data"]["values"].as_array().cloned().unwrap_or_default();
        if values.iter().any(|v| v.as_f64() == Some(6.5)) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "history never recorded");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    farm.stop().await.expect("stop");
}

#[tokio::test]
async fn provision_and_deprovision_through_api() {
    let (app, runtime, farm) = app().await;
    let (status, body) = call_with_body(
        &app,
        Method::POST,
        "/farms",
        Some(ADMIN),
        Body::from(r#"{"name":"east","interval":0}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let farm_id = body["data"]["farmId"].as_u64().expect("farm id");

    let registry = runtime.state.registry.clone();
    eventually(|| registry.get_farm(farm_id).is_ok()).await;

    let (status, _) = call(&app, Method::DELETE, &format!("/farms/{farm_id}"), Some(ANALYST)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::DELETE, &format!("/farms/{farm_id}"), Some(ADMIN)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(registry.get_farm(farm_id).is_err());

    let (status, _) = call_with_body(
        &app,
        Method::POST,
        "/farms",
        Some(ADMIN),
        Body::from(r#"{"name":"west","mode":"orbital"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    farm.stop().await.expect("stop");
}
