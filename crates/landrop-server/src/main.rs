mod api;
mod config;
mod error;
mod hub;
mod presence;
mod rate_limit;
mod relay;
mod transfers;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::presence::PresenceRegistry;
use crate::rate_limit::IpThrottle;
use crate::relay::RelayBuffer;
use crate::transfers::TransferStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,landrop_server=debug")),
        )
        .init();

    info!("Starting landrop hub v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let registry = Arc::new(PresenceRegistry::new(config.liveness_window));
    let store = Arc::new(TransferStore::new());
    let relay = Arc::new(RelayBuffer::new());
    let hub = Arc::new(Hub::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        Arc::clone(&relay),
    ));

    let throttle = IpThrottle::default();

    // Liveness sweep: devices unseen past the window flip to offline and
    // the change is broadcast.
    let sweep_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            if sweep_hub.registry.sweep_stale().await {
                sweep_hub.broadcast_device_list().await;
            }
        }
    });

    // Throttle cleanup every 5 min, evict buckets idle >10 min.
    let sweeper = throttle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            sweeper.sweep(600.0).await;
        }
    });

    let app_state = AppState {
        hub,
        throttle,
        config: Arc::new(config.clone()),
    };

    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
