use crate::config::Config;
use log::info;
use std::path::{Component, Path, PathBuf};

/// Turns a requested file name into a path relative to the served root.
///
/// Leading slashes are dropped so "/boot/pxelinux.0" maps inside the root.
/// Returns None for names that would escape the root ("..", drive prefixes)
/// or that name the root itself.
pub fn sanitize_file_name(name: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

// Helper function to log configuration options
pub fn log_config(config: &Config) {
    info!("  Listen Address: {}", config.server.listen_address);
    info!("  Listen Port: {}", config.server.listen_port);
    info!("  Root Directory: {}", config.server.root_dir);
    info!("  Writes Allowed: {}", config.server.allow_write);
    info!(
        "  Timeout: {}s, Max Retries: {}",
        config.server.timeout_secs, config.server.max_retries
    );
    info!(
        "  Session Ports: {}-{} ({} probes)",
        config.server.port_range_start, config.server.port_range_end, config.server.max_port_probes
    );
    match config.server.max_sessions {
        Some(max) => info!("  Max Sessions: {}", max),
        None => info!("  Max Sessions: unlimited"),
    }
}
