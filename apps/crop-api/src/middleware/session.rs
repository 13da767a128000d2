//! 请求上下文与会话中间件
//!
//! - request_context：为每个请求注入 request_id/trace_id
//! - caller：从 `x-user-id` 头读取调用者（认证由外层负责）
//! - require_read / require_write：构造 [`Session`] 并按农场角色校验
//!
//! 可选的 `x-consistency: quorum` 头决定读一致性。

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use crop_farm::{FarmError, Session};
use crop_telemetry::new_request_ids;
use domain::{ConsistencyLevel, User};
use tracing::{Instrument, info_span};

use crate::AppState;
use crate::utils::response::{auth_error, farm_error};

pub const USER_HEADER: &str = "x-user-id";
pub const CONSISTENCY_HEADER: &str = "x-consistency";

/// 请求上下文中间件：注入 request_id/trace_id
pub async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}

/// 调用者身份
pub fn caller(headers: &HeaderMap) -> Result<User, Response> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|id| *id != 0)
        .map(|id| User {
            id,
            email: String::new(),
        })
        .ok_or_else(auth_error)
}

pub fn consistency(headers: &HeaderMap) -> ConsistencyLevel {
    match headers
        .get(CONSISTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) if value.eq_ignore_ascii_case("quorum") => ConsistencyLevel::Quorum,
        _ => ConsistencyLevel::Local,
    }
}

fn session(state: &AppState, headers: &HeaderMap, farm_id: u64) -> Result<Session, Response> {
    let user = caller(headers)?;
    let farm = state.registry.get_farm(farm_id).map_err(farm_error)?;
    let session = Session::new(user, farm_id)
        .with_farm(farm)
        .with_consistency(consistency(headers));
    Ok(session)
}

/// 读权限会话
pub async fn require_read(
    state: &AppState,
    headers: &HeaderMap,
    farm_id: u64,
) -> Result<Session, Response> {
    let mut session = session(state, headers, farm_id)?;
    let permissions = state
        .stores
        .permission_store(state.permission_store)
        .map_err(|err| farm_error(FarmError::from(err)))?;
    let permission = session
        .authorize_read(permissions.as_ref())
        .await
        .map_err(farm_error)?;
    session.organization_id = permission.organization_id;
    Ok(session)
}

/// 写权限会话
pub async fn require_write(
    state: &AppState,
    headers: &HeaderMap,
    farm_id: u64,
) -> Result<Session, Response> {
    let mut session = session(state, headers, farm_id)?;
    let permissions = state
        .stores
        .permission_store(state.permission_store)
        .map_err(|err| farm_error(FarmError::from(err)))?;
    let permission = session
        .authorize_write(permissions.as_ref())
        .await
        .map_err(farm_error)?;
    session.organization_id = permission.organization_id;
    Ok(session)
}
