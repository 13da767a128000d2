//! 进程装配
//!
//! 按 [`AppConfig`] 连接后端、构建 [`StoreFactory`]、启动已有农场，
//! 并挂上开通循环、可选的 MQTT 通知器与变更订阅。

use std::sync::Arc;
use std::time::Duration;

use crop_changefeed::{ChangeFeed, ChangeFeedHandle, PgNotifySource};
use crop_cluster::{ClusterParams, LocalReplicator, ReplicationHub};
use crop_config::AppConfig;
use crop_farm::{FarmFactory, FarmProvisioner, ServiceRegistry};
use crop_storage::StoreFactory;
use crop_storage::postgres::connect_pool;
use crop_transport::{LogNotifier, MqttNotifier, MqttNotifierConfig, Notifier};
use domain::FarmMode;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::AppState;

/// 运行中的后台部件；随进程存活。
pub struct Runtime {
    pub state: AppState,
    pub factory: Arc<FarmFactory>,
    pub tasks: Vec<JoinHandle<()>>,
    pub changefeed: Option<ChangeFeedHandle>,
}

pub async fn start(config: &AppConfig) -> Result<Runtime, Box<dyn std::error::Error>> {
    let mut stores = StoreFactory::new().with_state_ttl(
        Duration::from_secs(config.state_ttl_seconds),
        Duration::from_secs(config.state_tick_seconds.max(1)),
    );

    let pool = match &config.database_url {
        Some(url) => {
            let pool = connect_pool(url).await?;
            stores = stores.with_postgres(pool.clone());
            Some(pool)
        }
        None => None,
    };
    if let Some(url) = &config.redis_url {
        stores = stores.with_redis(redis::Client::open(url.as_str())?);
    }
    if needs_replicator(config) {
        let params = ClusterParams::new(
            config.node_id,
            config.peers.clone(),
            Some(config.data_dir.clone()),
        );
        stores = stores.with_replicator(LocalReplicator::start_node(params, ReplicationHub::new()));
    }

    let mut tasks = Vec::new();
    let notifier: Arc<dyn Notifier> = match &config.mqtt_host {
        Some(host) => {
            let (notifier, eventloop) = MqttNotifier::connect(MqttNotifierConfig {
                host: host.clone(),
                port: config.mqtt_port,
                username: None,
                password: None,
                topic: config.mqtt_notify_topic.clone(),
                qos: 1,
            });
            tasks.push(eventloop);
            Arc::new(notifier)
        }
        None => Arc::new(LogNotifier),
    };

    let mut runtime = assemble(stores, notifier, config);
    runtime.tasks.extend(tasks);
    runtime.factory.load_all().await?;

    if config.changefeed_enabled {
        match pool {
            Some(pool) => {
                let feed = ChangeFeed::new(
                    Arc::new(PgNotifySource::new(pool)),
                    runtime.state.registry.clone(),
                )
                .with_retry(Duration::from_secs(config.changefeed_retry_seconds));
                runtime.changefeed = Some(feed.spawn());
            }
            None => warn!(target: "crop.api", "changefeed_requires_database_url"),
        }
    }
    info!(
        target: "crop.api",
        farms = runtime.state.registry.farms().map(|f| f.len()).unwrap_or(0),
        changefeed = runtime.changefeed.is_some(),
        "bootstrap_done"
    );
    Ok(runtime)
}

/// 不连接任何外部服务的装配部分（测试也走这里）。
pub fn assemble(stores: StoreFactory, notifier: Arc<dyn Notifier>, config: &AppConfig) -> Runtime {
    let stores = Arc::new(stores);
    let registry = ServiceRegistry::new();
    let factory = Arc::new(
        FarmFactory::new(stores.clone(), registry.clone())
            .with_notifier(notifier)
            .with_default_stores(config.default_stores)
            .with_channel_capacity(config.channel_capacity)
            .with_transport_timeout(Duration::from_millis(config.transport_timeout_ms)),
    );
    let (provisioner, provisioned, deprovisioned) =
        FarmProvisioner::new(stores.clone(), registry.clone(), config.channel_capacity);
    let tasks = vec![
        factory.spawn_provisioning_loop(provisioned),
        factory.spawn_deprovisioning_loop(deprovisioned),
    ];
    Runtime {
        state: AppState {
            registry,
            stores,
            provisioner: Arc::new(provisioner),
            permission_store: config.default_stores.config,
            default_devices: config.default_devices,
            node_id: config.node_id,
        },
        factory,
        tasks,
        changefeed: None,
    }
}

fn needs_replicator(config: &AppConfig) -> bool {
    let kinds = config.default_stores;
    config.mode == FarmMode::Cluster
        || kinds.config.is_replicated()
        || kinds.state.is_replicated()
        || kinds.data.is_replicated()
}
