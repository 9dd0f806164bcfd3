// tileworld_server/server/src/main.rs
use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info, warn};

use tileworld_server_core::core::config::ServerConfig;
use tileworld_server_core::operational::monitoring::metrics::{init_logging, MetricsSystem};
use tileworld_server_core::world::storage::WorldStorage;
use tileworld_server_core::WorldServer;

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn config_path() -> Option<PathBuf> {
    env::args().nth(1).or_else(|| env::var("TILEWORLD_CONFIG").ok()).map(PathBuf::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {:?}", e);
        return Err(e);
    }

    info!("Tileworld server starting up...");

    let config = match config_path() {
        Some(path) => ServerConfig::load(&path).with_context(|| format!("loading config {}", path.display()))?,
        None => {
            warn!("No configuration given, using defaults");
            ServerConfig::default()
        }
    };
    info!("Server configuration loaded. Tick rate: {}", config.tick_rate);

    let _metrics = match config.metrics_listen_addr {
        Some(addr) => Some(MetricsSystem::install(addr)?),
        None => None,
    };

    let storage = match &config.world_data_path {
        Some(path) => WorldStorage::load(path).with_context(|| format!("loading world data {}", path.display()))?,
        None => {
            warn!("No world_data_path configured, starting with an empty world");
            WorldStorage::default()
        }
    };

    let mut world = WorldServer::new(config, storage).context("creating world server")?;
    info!("World server instance created. Transports feed sessions through the shared registry.");

    tokio::select! {
        _ = world.run_game_loop() => {
            error!("Game loop stopped unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for shutdown signal")?;
            info!("Shutdown requested");
        }
    }

    info!("Tileworld server shut down. {} frames processed.", world.frame());
    Ok(())
}
