//! NVMe over Fabrics (TCP transport) for WARP
//!
//! This crate provides an NVMe/TCP target that exposes block devices as
//! NVMe namespaces, and an initiator that talks to any NVMe/TCP target.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! │   accept loop ──► one Controller per TCP connection         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Controller                                                 │
//! │  ┌──────────────┐  slots   ┌───────────────┐                │
//! │  │ receive loop │ ───────► │  Subsystem    │                │
//! │  └──────────────┘          │  (Discovery,  │                │
//! │         ▲                  │   Target)     │                │
//! │         │ PDUs             └───────┬───────┘                │
//! │  ┌──────┴───────┐  completions     │                        │
//! │  │ completion   │ ◄────────────────┘                        │
//! │  │ task         │                                           │
//! │  └──────────────┘                                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Target backends: null, mem, file, sleepy, testable         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The wire format lives in [`codec`] (declarative fixed-layout records),
//! [`pdu`] (framing) and [`protocol`] (capsules, Connect, Identify, log
//! pages).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warp_nvmeof::{NvmeOfConfig, Registry, Server, TargetSubsystem};
//! use warp_nvmeof::target::MemoryTarget;
//!
//! # async fn example() -> warp_nvmeof::NvmeOfResult<()> {
//! let registry = Registry::new();
//! let target = Arc::new(MemoryTarget::new(64 << 20));
//! registry.add_subsystem(Arc::new(TargetSubsystem::new("nqn.2024-01.io.warp:mem", target)?))?;
//!
//! let server = Server::bind(NvmeOfConfig::default(), registry).await?;
//! server.serve()?;
//! # server.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Client Access
//!
//! Besides [`client::Client`], standard `nvme-cli` can connect:
//!
//! ```bash
//! nvme discover -t tcp -a 192.168.1.100 -s 4420
//! nvme connect -t tcp -a 192.168.1.100 -s 4420 -n nqn.2024-01.io.warp:mem
//! ```

pub mod buffers;
pub mod client;
pub mod codec;
pub mod config;
mod controller;
pub mod error;
pub mod pdu;
pub mod protocol;
pub mod server;
pub mod subsystem;
pub mod target;

// Re-exports
pub use client::{AdminQueue, Client, IoQueue};
pub use config::{ClientConfig, ConfigError, NvmeOfConfig, TargetConfig, TcpConfig};
pub use controller::ControllerConfig;
pub use error::{NvmeOfError, NvmeOfResult, NvmeStatus};
pub use protocol::DISCOVERY_NQN;
pub use server::{Registry, Server, SessionInfo};
pub use subsystem::{DiscoverySubsystem, Subsystem, TargetSubsystem};
pub use target::{Target, TargetError, TargetFactory};

/// NVMe Qualified Name (NQN) prefix for WARP
pub const WARP_NQN_PREFIX: &str = "nqn.2024-01.io.warp:";

/// Longest NQN allowed, excluding the terminator
pub const MAX_NQN_LENGTH: usize = 223;

/// Generate an NQN for a WARP subsystem
pub fn generate_nqn(name: &str) -> String {
    format!("{}{}", WARP_NQN_PREFIX, name)
}

/// Validate an NQN format
pub fn validate_nqn(nqn: &str) -> bool {
    // nqn.YYYY-MM.reverse.domain:name, or the colon-less discovery NQN
    if !nqn.starts_with("nqn.") || nqn.len() > MAX_NQN_LENGTH {
        return false;
    }
    match nqn.split_once(':') {
        Some((_, name)) => !name.is_empty(),
        None => nqn.len() >= 12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_nqn() {
        let nqn = generate_nqn("storage");
        assert_eq!(nqn, "nqn.2024-01.io.warp:storage");
        assert!(validate_nqn(&nqn));
    }

    #[test]
    fn test_validate_nqn() {
        assert!(validate_nqn("nqn.2024-01.io.warp:storage"));
        assert!(validate_nqn(DISCOVERY_NQN));
        assert!(validate_nqn("nqn.test:null"));
        assert!(!validate_nqn("invalid"));
        assert!(!validate_nqn("nq.2024-01.io.warp:storage"));
        assert!(!validate_nqn("nqn.2024-01.io.warp:"));
        assert!(!validate_nqn(&format!("nqn.2024-01.io.warp:{}", "x".repeat(220))));
    }
}
