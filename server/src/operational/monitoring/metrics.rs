// tileworld_server/server/src/operational/monitoring/metrics.rs
use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub struct MetricsSystem {
    listen_addr: SocketAddr,
}

impl MetricsSystem {
    /// Installs the Prometheus exporter and registers metric descriptions.
    pub fn install(listen_addr: SocketAddr) -> Result<Self> {
        PrometheusBuilder::new()
            .with_http_listener(listen_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;

        describe_histogram!("world_tick_duration_seconds", Unit::Seconds, "Simulation tick processing time");
        describe_gauge!("world_players_in_world", "Players currently placed on a map");
        describe_gauge!("world_objects_total", "Objects registered in the identity arena");
        describe_counter!("world_commands_rejected_total", "Client commands rejected by the simulation");
        describe_counter!("world_packets_delivered_total", "Packets routed to player sessions");
        describe_counter!("pathfind_searches_total", "A* searches started");
        describe_counter!("pathfind_failed_total", "A* searches that found no movement");
        describe_counter!("pathfind_incomplete_total", "A* searches that stopped short of the goal");
        describe_counter!("motion_generator_swaps_total", "Motion generator replacements");

        info!("Prometheus exporter listening on {}", listen_addr);
        Ok(MetricsSystem { listen_addr })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

// Logging setup
pub fn init_logging() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tileworld_server_core=info,tileworld_server=info,warn".into()),
        )
        .with(fmt::layer())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
