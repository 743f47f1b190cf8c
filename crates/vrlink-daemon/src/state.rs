//! Daemon state: the server built from configuration

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};
use vrlink_connection::{Connection, LoopbackHub};
use vrlink_core::AliasPriority;
use vrlink_server::Server;

use crate::config::Config;

pub struct AppState {
    pub server: Server,
    /// Bus that in-process clients attach to
    pub hub: LoopbackHub,
    pub tick_interval: Duration,
}

impl AppState {
    /// Open the server connection and apply the configured aliases, routes
    /// and devices
    pub fn new(config: &Config) -> Result<Self> {
        let hub = LoopbackHub::new();
        let connection = Connection::create_shared(
            config.server.interface.as_deref(),
            Some(config.server.port),
            &hub,
        )
        .context("Failed to open server connection")?;
        let mut server = Server::new(connection);

        if !config.aliases.is_empty() {
            server
                .add_aliases(&config.aliases_json()?, AliasPriority::Manual)
                .context("Failed to install configured aliases")?;
        }

        for route in &config.routes {
            let directive = route.to_directive()?;
            if let Err(e) = server.add_route(&directive) {
                warn!(destination = %route.destination, error = %e, "Skipping route");
            }
        }

        for device in &config.devices {
            server
                .register_device(&device.name, &device.descriptor)
                .with_context(|| format!("Failed to register device {}", device.name))?;
        }

        info!(
            nodes = server.tree().len(),
            routes = server.routes().len(),
            "Server ready"
        );

        Ok(Self {
            server,
            hub,
            tick_interval: Duration::from_millis(config.server.tick_interval_ms.max(1)),
        })
    }
}
