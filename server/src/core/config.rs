// tileworld_server/server/src/core/config.rs
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use super::constants::{MAX_CHARACTER_ID, MAX_COMMANDS_PER_SESSION_TICK, SERVER_TICK_RATE};
use super::error::{ServerError, ServerResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tick_rate: u64,
    /// YAML or JSON file with map records, templates, spawns and waypoint paths.
    pub world_data_path: Option<PathBuf>,
    /// Maps created at startup instead of on first entry.
    pub preload_maps: Vec<u32>,
    /// Seed for random movement. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    pub max_commands_per_session_tick: usize,
    /// Highest character id a client may enter the world with.
    pub max_character_id: u32,
    pub metrics_listen_addr: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            tick_rate: SERVER_TICK_RATE,
            world_data_path: None,
            preload_maps: Vec::new(),
            rng_seed: None,
            max_commands_per_session_tick: MAX_COMMANDS_PER_SESSION_TICK,
            max_character_id: MAX_CHARACTER_ID,
            metrics_listen_addr: None,
        }
    }
}

impl ServerConfig {
    pub fn from_yaml_str(source: &str) -> ServerResult<Self> {
        let config: ServerConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&source)?;
        info!("Loaded server configuration from {}", path.display());
        Ok(config)
    }

    pub fn tick_duration_ms(&self) -> u64 {
        1000 / self.tick_rate
    }

    fn validate(&self) -> ServerResult<()> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ServerError::ConfigError(format!(
                "tick_rate must be within 1..=1000, got {}",
                self.tick_rate
            )));
        }
        if self.max_commands_per_session_tick == 0 {
            return Err(ServerError::ConfigError(
                "max_commands_per_session_tick must be positive".to_string(),
            ));
        }
        if self.max_character_id == 0 {
            return Err(ServerError::ConfigError("max_character_id must be positive".to_string()));
        }
        Ok(())
    }
}
