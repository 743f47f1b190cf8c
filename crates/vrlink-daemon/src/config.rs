//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Destination path to alias source, installed at manual priority
    #[serde(default)]
    pub aliases: toml::Table,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteConfig>,
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Milliseconds between server updates
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Interface address to listen on (all interfaces when unset)
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            interface: None,
            port: default_port(),
        }
    }
}

fn default_tick_interval() -> u64 {
    1
}

fn default_port() -> u16 {
    vrlink_connection::DEFAULT_PORT
}

/// Legacy routing directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub destination: String,
    /// Source path, or a transform table wrapping one
    pub source: toml::Value,
}

impl RouteConfig {
    /// The directive as the JSON string the server accepts
    pub fn to_directive(&self) -> Result<String> {
        let source = serde_json::to_value(&self.source)
            .with_context(|| format!("Invalid source for route {}", self.destination))?;
        Ok(serde_json::json!({
            "destination": self.destination,
            "source": source,
        })
        .to_string())
    }
}

/// A device registered at start-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// JSON device descriptor
    #[serde(default = "default_descriptor")]
    pub descriptor: String,
}

fn default_descriptor() -> String {
    "{}".to_string()
}

impl Config {
    /// The `[aliases]` table as a JSON object
    pub fn aliases_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.aliases).context("Invalid [aliases] table")
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(
            path = %path.display(),
            aliases = config.aliases.len(),
            routes = config.routes.len(),
            devices = config.devices.len(),
            "Loaded configuration"
        );
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
