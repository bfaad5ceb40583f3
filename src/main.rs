use std::sync::Arc;

use rosbridge_broker::{
    host::{self, AppState},
    BridgeCall, BridgeConfig, BrokerDeps, IdentifierCache, MasterChannel, RosbridgeClient,
    ServiceRegistry, UploadStaging,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    if let Err(error) = std::fs::create_dir_all(&config.services_cache_dir) {
        eprintln!(
            "failed to create services cache {}: {error}",
            config.services_cache_dir.display()
        );
        std::process::exit(1);
    }

    let (master, _coordinator) = MasterChannel::spawn();
    let bridge: Arc<dyn BridgeCall> =
        RosbridgeClient::start(config.rosbridge_url.clone(), config.reconnect_delay);
    let ids = Arc::new(IdentifierCache::new(config.id_length, config.id_max_attempts));
    let staging = Arc::new(UploadStaging::new(
        &config.server_cache_dir,
        &config.services_cache_dir,
    ));

    let deps = BrokerDeps {
        ids: Arc::clone(&ids),
        staging,
        bridge,
        master,
    };
    let registry = ServiceRegistry::new(&config.services, &deps);
    tracing::info!(
        services = ?registry.names().collect::<Vec<_>>(),
        rosbridge = %config.rosbridge_url,
        "service brokers ready"
    );

    let app = host::router(Arc::new(AppState::new(registry, ids)));

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            eprintln!("failed to bind {bind_addr}: {error}");
            std::process::exit(1);
        }
    };

    tracing::info!("rosbridge-broker listening on {bind_addr}");

    if let Err(error) = axum::serve(listener, app).await {
        eprintln!("server error: {error}");
        std::process::exit(1);
    }
}
