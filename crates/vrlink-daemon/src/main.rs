//! VRLink Daemon - Main entry point
//!
//! Hosts the path tree server and updates it until interrupted.

mod config;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "vrlink")]
#[command(about = "VRLink path tree and device routing server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "vrlink.toml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Build the server once, print the path tree and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("VRLink v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(port) = args.port {
        config.server.port = port;
    }

    let state = state::AppState::new(&config)?;

    if args.check {
        let tree = state.server.tree_json(false);
        println!("{}", serde_json::to_string_pretty(&tree)?);
        for route in state.server.routes().iter() {
            println!("route: {}", route);
        }
    } else {
        server::run(state).await?;
    }

    Ok(())
}
