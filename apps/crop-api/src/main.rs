//! 农场控制面进程：加载配置、装配存储与农场服务、提供便捷 HTTP 接口。

mod bootstrap;
mod handlers;
mod middleware;
mod routes;
mod utils;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crop_config::AppConfig;
use crop_farm::{FarmProvisioner, ServiceRegistry};
use crop_storage::StoreFactory;
use crop_telemetry::init_tracing;
use domain::StoreKind;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub stores: Arc<StoreFactory>,
    pub provisioner: Arc<FarmProvisioner>,
    /// 权限表所在的存储。
    pub permission_store: StoreKind,
    pub default_devices: bool,
    pub node_id: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let runtime = bootstrap::start(&config).await?;
    let app = routes::create_router(runtime.state.clone());

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(
        target: "crop.api",
        addr = %config.http_addr,
        mode = config.mode.as_str(),
        node_id = config.node_id,
        "http_listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
