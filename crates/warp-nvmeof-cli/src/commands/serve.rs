//! serve command - run the NVMe/TCP target from a TOML configuration

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use warp_nvmeof::{NvmeOfConfig, Registry, Server, TargetFactory};

use crate::api::{self, volumes::VolumeStore, ApiState};

/// Execute the serve command
///
/// Builds every configured target, binds the listener and serves until
/// Ctrl+C, then closes all sessions and subsystems. With `api` set, the
/// management API runs alongside and volumes in `data_dir` are exported.
pub async fn execute(
    config_path: &Path,
    port: Option<u16>,
    api: Option<SocketAddr>,
    data_dir: &Path,
) -> Result<()> {
    let mut config = NvmeOfConfig::from_file(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(port) = port {
        config.port = port;
    }

    let factory = TargetFactory::with_defaults();
    let registry = Registry::new();
    for target in &config.targets {
        let subsystem = target
            .build(&factory)
            .await
            .with_context(|| format!("Failed to create target {}", target.nqn))?;
        tracing::info!("Exporting {} ({})", target.nqn, target.target_type);
        registry
            .add_subsystem(Arc::new(subsystem))
            .with_context(|| format!("Failed to export {}", target.nqn))?;
    }

    let (stop, stopped) = watch::channel(false);
    let api_task = match api {
        Some(addr) => {
            let volumes = VolumeStore::open(data_dir, Arc::clone(&registry))
                .with_context(|| format!("Failed to open {}", data_dir.display()))?;
            tracing::info!("Volumes in {}", volumes.data_dir().display());
            let state = ApiState::new(Arc::clone(&registry), volumes);
            let mut stopped = stopped;
            let shutdown = async move {
                let _ = stopped.wait_for(|&done| done).await;
            };
            Some(tokio::spawn(api::run(addr, state, shutdown)))
        }
        None => None,
    };

    let server = Server::bind(config, registry)
        .await
        .context("Failed to bind listener")?;
    server.serve().context("Failed to start accept loop")?;

    println!("Listening on {}", server.local_addr());
    for nqn in server.list_subsystems() {
        println!("  {}", nqn);
    }
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("Received shutdown signal");
    println!("\nShutting down...");

    stop.send_replace(true);
    if let Some(task) = api_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!("Management API failed: {:#}", e),
            Err(e) => tracing::warn!("Management API task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }
    server.close().await;
    Ok(())
}
