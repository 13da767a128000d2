//! 设备便捷接口
//!
//! - POST /farms/{id}/devices/{type}/switch/{ch}/{pos}
//! - POST /farms/{id}/devices/{type}/timerSwitch/{ch}/{secs}
//! - POST /farms/{id}/devices/{type}/metrics/{key}/{value}
//! - GET /farms/{id}/devices/{type}/history/{metric}
//!
//! `ch` 为板卡槽位。写操作需要可写角色，历史查询需要可读角色。

use api_contract::{MetricHistoryDto, MetricValueDto, SwitchDto, TimerEventDto};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};
use crop_farm::{DeviceService, Session};
use std::sync::Arc;

use crate::AppState;
use crate::middleware::{require_read, require_write};
use crate::utils::response::{bad_request_error, farm_error, ok};

#[derive(serde::Deserialize)]
pub struct SwitchPath {
    farm_id: u64,
    device_type: String,
    channel: usize,
    position: i32,
}

#[derive(serde::Deserialize)]
pub struct TimerPath {
    farm_id: u64,
    device_type: String,
    channel: usize,
    seconds: u64,
}

#[derive(serde::Deserialize)]
pub struct MetricPath {
    farm_id: u64,
    device_type: String,
    key: String,
    value: f64,
}

#[derive(serde::Deserialize)]
pub struct HistoryPath {
    farm_id: u64,
    device_type: String,
    metric: String,
}

fn device(session: &Session, device_type: &str) -> Result<Arc<DeviceService>, Response> {
    session
        .farm()
        .and_then(|farm| farm.device(device_type))
        .map_err(farm_error)
}

pub async fn switch(
    State(state): State<AppState>,
    Path(path): Path<SwitchPath>,
    headers: HeaderMap,
) -> Response {
    if !(0..=1).contains(&path.position) {
        return bad_request_error("position must be 0 or 1");
    }
    let session = match require_write(&state, &headers, path.farm_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let device = match device(&session, &path.device_type) {
        Ok(device) => device,
        Err(response) => return response,
    };
    let message = format!("switched by user {}", session.user.id);
    match device.switch(path.channel, path.position, &message).await {
        Ok(()) => ok(SwitchDto {
            channel_id: path.channel,
            state: path.position,
        }),
        Err(err) => farm_error(err),
    }
}

pub async fn timer_switch(
    State(state): State<AppState>,
    Path(path): Path<TimerPath>,
    headers: HeaderMap,
) -> Response {
    let session = match require_write(&state, &headers, path.farm_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let device = match device(&session, &path.device_type) {
        Ok(device) => device,
        Err(response) => return response,
    };
    let message = format!("timer switch for {}s by user {}", path.seconds, session.user.id);
    match device.timer_switch(path.channel, path.seconds, &message).await {
        Ok(()) => ok(TimerEventDto {
            channel_id: path.channel,
            duration: path.seconds,
        }),
        Err(err) => farm_error(err),
    }
}

pub async fn set_metric_value(
    State(state): State<AppState>,
    Path(path): Path<MetricPath>,
    headers: HeaderMap,
) -> Response {
    if !path.value.is_finite() {
        return bad_request_error("metric value must be finite");
    }
    let session = match require_write(&state, &headers, path.farm_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let device = match device(&session, &path.device_type) {
        Ok(device) => device,
        Err(response) => return response,
    };
    match device.set_metric_value(&path.key, path.value).await {
        Ok(()) => ok(MetricValueDto {
            device_type: path.device_type,
            key: path.key,
            value: path.value,
        }),
        Err(err) => farm_error(err),
    }
}

pub async fn metric_history(
    State(state): State<AppState>,
    Path(path): Path<HistoryPath>,
    headers: HeaderMap,
) -> Response {
    let session = match require_read(&state, &headers, path.farm_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let device = match device(&session, &path.device_type) {
        Ok(device) => device,
        Err(response) => return response,
    };
    match device.get_history(&path.metric).await {
        Ok(values) => ok(MetricHistoryDto {
            device_type: path.device_type,
            metric: path.metric,
            values,
        }),
        Err(err) => farm_error(err),
    }
}
