//! CLI command implementations

pub mod discover;
pub mod probe;
pub mod serve;
pub mod volume;

use anyhow::{Context, Result};
use std::net::SocketAddr;

/// Resolve `host:port`, taking the first address
pub(crate) async fn resolve(server: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(server)
        .await
        .with_context(|| format!("Failed to resolve {}", server))?
        .next()
        .with_context(|| format!("No address found for {}. Expected host:port", server))
}
