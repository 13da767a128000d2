use api_contract::HealthDto;
use axum::{extract::State, response::Response};

use crate::AppState;
use crate::utils::response::ok;

pub async fn health(State(state): State<AppState>) -> Response {
    ok(HealthDto {
        status: "ok".to_string(),
        farms: state.registry.farms().map(|farms| farms.len()).unwrap_or(0),
        node_id: state.node_id,
    })
}
