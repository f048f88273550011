mod config;
mod constants;
mod core_cli;
mod core_network;
mod core_session;
mod core_storage;
mod core_tftp;
mod helpers;
mod server;

use crate::config::Config;
use crate::constants::DEFAULT_CONFIG_PATH;
use crate::core_cli::Cli;
use crate::helpers::log_config;
use anyhow::Result;
use chrono::Local;
use clap::Parser;
use env_logger::{Builder, Env};
use log::{info, warn};
use std::io::Write;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Initialize the logger with a custom format
    let default_level = if args.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let mut config = load_config(&args.config)?;

    // Override settings from CLI if provided
    if let Some(port) = args.port {
        config.server.listen_port = port;
    }
    if let Some(root) = args.root {
        config.server.root_dir = root;
    }
    config.validate()?;

    info!("Starting rouilletftpd with configuration:");
    log_config(&config);

    server::run(config).await
}

/// An explicit path must exist; a missing default file means built-in defaults.
fn load_config(path: &str) -> Result<Config> {
    if !path.is_empty() {
        return Config::load_from_file(path);
    }
    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        Config::load_from_file(DEFAULT_CONFIG_PATH)
    } else {
        warn!(
            "No configuration file at {}, using defaults",
            DEFAULT_CONFIG_PATH
        );
        Ok(Config::default())
    }
}
