use crate::config::Config;
use crate::core_network::Listener;
use crate::core_session::SessionRegistry;
use crate::core_storage::{FsStorage, Storage};
use anyhow::Result;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Runs the TFTP server with the provided configuration until Ctrl+C.
///
/// # Arguments
///
/// * `config` - The validated server configuration.
///
/// # Returns
///
/// Result<(), anyhow::Error> indicating the success or failure of the operation.
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let server = &config.server;

    let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(&server.root_dir));
    let registry = Arc::new(SessionRegistry::new(
        server.port_range_start..=server.port_range_end,
        server.max_port_probes,
        server.max_sessions,
    ));
    let (shutdown, _) = broadcast::channel(1);

    let listener = Listener::bind(
        Arc::clone(&config),
        registry,
        storage,
        shutdown.clone(),
    )
    .await?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down.");
                let _ = signal.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    match listener.run().await {
        Ok(()) => {
            info!("Server stopped.");
            Ok(())
        }
        Err(e) => {
            error!("Server failed: {}", e);
            Err(e)
        }
    }
}
