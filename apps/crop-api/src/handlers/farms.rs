//! 农场级接口
//!
//! - GET /farms/{id}/config：农场配置（`x-consistency: quorum` 时回读存储）
//! - GET /farms/{id}/state：农场状态快照（同上）
//! - POST /farms：为调用者开通新农场
//! - DELETE /farms/{id}：注销农场（仅管理员）

use api_contract::{ProvisionFarmRequest, ProvisionedFarmDto};
use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};
use crop_farm::{FarmError, ProvisionParams};
use domain::{ConsistencyLevel, FarmMode};
use tracing::info;

use crate::AppState;
use crate::middleware::{caller, require_read};
use crate::utils::response::{bad_request_error, farm_error, ok};

#[derive(serde::Deserialize)]
pub struct FarmPath {
    farm_id: u64,
}

pub async fn get_farm_config(
    State(state): State<AppState>,
    Path(path): Path<FarmPath>,
    headers: HeaderMap,
) -> Response {
    let session = match require_read(&state, &headers, path.farm_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let farm = match session.farm() {
        Ok(farm) => farm,
        Err(err) => return farm_error(err),
    };
    let config = match session.consistency {
        ConsistencyLevel::Local => farm.config(),
        ConsistencyLevel::Quorum => farm
            .stores()
            .farm_config
            .get(path.farm_id, ConsistencyLevel::Quorum)
            .await
            .map_err(FarmError::from),
    };
    match config {
        Ok(config) => ok(config),
        Err(err) => farm_error(err),
    }
}

pub async fn get_farm_state(
    State(state): State<AppState>,
    Path(path): Path<FarmPath>,
    headers: HeaderMap,
) -> Response {
    let session = match require_read(&state, &headers, path.farm_id).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let farm = match session.farm() {
        Ok(farm) => farm,
        Err(err) => return farm_error(err),
    };
    let farm_state = match session.consistency {
        ConsistencyLevel::Local => farm.state(),
        ConsistencyLevel::Quorum => farm
            .stores()
            .farm_state
            .get(path.farm_id, ConsistencyLevel::Quorum)
            .await
            .map_err(FarmError::from),
    };
    match farm_state {
        Ok(farm_state) => ok(farm_state),
        Err(err) => farm_error(err),
    }
}

/// 开通农场
///
/// 调用者成为新农场的管理员；农场由开通循环异步启动。
pub async fn provision_farm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProvisionFarmRequest>,
) -> Response {
    let user = match caller(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let mut params = ProvisionParams {
        name: req.name.trim().to_string(),
        default_devices: state.default_devices,
        ..ProvisionParams::default()
    };
    if let Some(organization_name) = req.organization_name {
        params.organization_name = organization_name;
    }
    if let Some(mode) = req.mode {
        match FarmMode::parse(&mode) {
            Some(mode) => params.mode = mode,
            None => return bad_request_error(format!("unknown farm mode {mode}")),
        }
    }
    if let Some(interval) = req.interval {
        params.interval = interval;
    }
    if let Some(timezone) = req.timezone {
        params.timezone = timezone;
    }
    match state.provisioner.provision(&user, params).await {
        Ok(config) => {
            info!(target: "crop.api", farm_id = config.id, user_id = user.id, "farm_provision_requested");
            ok(ProvisionedFarmDto {
                farm_id: config.id,
                organization_id: config.organization_id,
                devices: config.devices.into_iter().map(|d| d.device_type).collect(),
            })
        }
        Err(err) => farm_error(err),
    }
}

pub async fn deprovision_farm(
    State(state): State<AppState>,
    Path(path): Path<FarmPath>,
    headers: HeaderMap,
) -> Response {
    let user = match caller(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match state.provisioner.deprovision(&user, path.farm_id).await {
        Ok(()) => ok(path.farm_id),
        Err(err) => farm_error(err),
    }
}
