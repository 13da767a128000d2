//! 路由定义
//!
//! - 健康检查：/health
//! - 农场：/farms, /farms/{id}, /farms/{id}/config, /farms/{id}/state
//! - 设备：/farms/{id}/devices/{type}/switch|timerSwitch|metrics|history

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers::*;
use crate::middleware::request_context;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/farms", post(provision_farm))
        .route("/farms/:farm_id", delete(deprovision_farm))
        .route("/farms/:farm_id/config", get(get_farm_config))
        .route("/farms/:farm_id/state", get(get_farm_state))
        .route(
            "/farms/:farm_id/devices/:device_type/switch/:channel/:position",
            post(switch),
        )
        .route(
            "/farms/:farm_id/devices/:device_type/timerSwitch/:channel/:seconds",
            post(timer_switch),
        )
        .route(
            "/farms/:farm_id/devices/:device_type/metrics/:key/:value",
            post(set_metric_value),
        )
        .route(
            "/farms/:farm_id/devices/:device_type/history/:metric",
            get(metric_history),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_context))
}
