//! HTTP 响应辅助函数
//!
//! 所有响应使用统一的 [`ApiResponse`] 封装；领域错误按 [`ErrorKind`] 映射状态码与错误码。

use api_contract::ApiResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crop_farm::FarmError;
use domain::ErrorKind;
use serde::Serialize;
use tracing::warn;

pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 缺少或无法识别调用者身份
pub fn auth_error() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error("AUTH.UNAUTHORIZED", "unauthorized")),
    )
        .into_response()
}

pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 领域错误响应
pub fn farm_error(err: FarmError) -> Response {
    let kind = err.kind();
    let status =
        StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if kind == ErrorKind::BackendFailure {
        warn!(target: "crop.api", error = %err, "request_failed");
    }
    (
        status,
        Json(ApiResponse::<()>::error(kind.code(), err.to_string())),
    )
        .into_response()
}
