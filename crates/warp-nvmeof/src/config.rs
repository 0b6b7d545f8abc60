//! NVMe-oF configuration types
//!
//! Server settings, the subsystems to export and client tuning, loadable
//! from TOML.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::NvmeOfResult;
use crate::protocol::{BLOCK_SIZE, CONTROLLER_QUEUE_CAPACITY, MAX_H2C_DATA_LENGTH};
use crate::subsystem::TargetSubsystem;
use crate::target::{TargetFactory, TargetOptions};
use crate::validate_nqn;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid value
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Error message
        message: String,
    },
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main NVMe-oF target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NvmeOfConfig {
    /// Address to bind to for incoming connections
    pub bind_addr: IpAddr,

    /// Port to listen on (default: 4420)
    pub port: u16,

    /// Advertised address for discovery (if different from bind_addr)
    pub advertised_addr: Option<IpAddr>,

    /// TCP transport configuration
    pub tcp: TcpConfig,

    /// Request slots per controller; the most a host may negotiate
    pub queue_depth: usize,

    /// Payload buffers per controller
    pub buffer_count: usize,

    /// Size of each payload buffer in bytes
    pub buffer_size: usize,

    /// How long a closing controller waits for in-flight commands
    pub drain_timeout_ms: u64,

    /// Keep-alive timer reported to hosts, in milliseconds
    pub keep_alive_ms: u32,

    /// Subsystems to export
    pub targets: Vec<TargetConfig>,
}

impl Default for NvmeOfConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 4420,
            advertised_addr: None,
            tcp: TcpConfig::default(),
            queue_depth: CONTROLLER_QUEUE_CAPACITY,
            buffer_count: 128,
            buffer_size: 0x40000,
            drain_timeout_ms: 5_000,
            keep_alive_ms: 60_000,
            targets: Vec::new(),
        }
    }
}

impl NvmeOfConfig {
    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Drain timeout as a duration
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Check value ranges and target definitions
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_depth == 0 || self.queue_depth > u16::MAX as usize {
            return Err(ConfigError::InvalidValue {
                field: "queue_depth".into(),
                message: format!("{} is outside 1..=65535", self.queue_depth),
            });
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer_count".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.buffer_size < BLOCK_SIZE as usize || self.buffer_size % BLOCK_SIZE as usize != 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer_size".into(),
                message: format!("{} is not a positive multiple of {}", self.buffer_size, BLOCK_SIZE),
            });
        }
        if self.tcp.max_h2c_data == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tcp.max_h2c_data".into(),
                message: "must be positive".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !seen.insert(target.nqn.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate target nqn {}",
                    target.nqn
                )));
            }
        }
        Ok(())
    }
}

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY on accepted connections
    pub nodelay: bool,

    /// MAXH2CDATA advertised in ICResp
    pub max_h2c_data: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            max_h2c_data: MAX_H2C_DATA_LENGTH,
        }
    }
}

/// One exported subsystem and its backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Subsystem NQN
    pub nqn: String,

    /// Backend type name (`null`, `mem`, `file`, `sleepy`, `testable`)
    #[serde(rename = "type")]
    pub target_type: String,

    /// Model number reported by Identify
    pub model: Option<String>,

    /// Serial number reported by Identify
    pub serial: Option<String>,

    /// Firmware revision reported by Identify
    pub firmware: Option<String>,

    /// Namespace UUID (random when unset)
    pub uuid: Option<Uuid>,

    /// Backend options; scalars are passed on as strings
    pub options: BTreeMap<String, toml::Value>,
}

impl TargetConfig {
    /// Check the NQN and backend type
    pub fn validate(&self) -> ConfigResult<()> {
        if self.nqn.is_empty() {
            return Err(ConfigError::MissingField("nqn".into()));
        }
        if !validate_nqn(&self.nqn) {
            return Err(ConfigError::InvalidValue {
                field: "nqn".into(),
                message: format!("'{}' is not a valid NQN", self.nqn),
            });
        }
        if self.target_type.is_empty() {
            return Err(ConfigError::MissingField(format!("type for {}", self.nqn)));
        }
        Ok(())
    }

    /// Options flattened to strings for the backend constructor
    pub fn target_options(&self) -> TargetOptions {
        self.options
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Build and start the backend, then wrap it in a subsystem
    pub async fn build(&self, factory: &TargetFactory) -> NvmeOfResult<TargetSubsystem> {
        let target = factory.create(&self.target_type, &self.target_options())?;
        target.start().await?;
        let mut subsystem = TargetSubsystem::new(self.nqn.clone(), target)?;
        if let Some(model) = &self.model {
            subsystem = subsystem.with_model(model.clone());
        }
        if let Some(serial) = &self.serial {
            subsystem = subsystem.with_serial(serial.clone());
        }
        if let Some(firmware) = &self.firmware {
            subsystem = subsystem.with_firmware(firmware.clone());
        }
        if let Some(uuid) = self.uuid {
            subsystem = subsystem.with_uuid(uuid);
        }
        Ok(subsystem)
    }
}

/// Initiator side tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host NQN sent in Connect
    pub host_nqn: String,

    /// Submission queue depth requested in Connect
    pub queue_size: u16,

    /// Reusable I/O descriptors per I/O queue
    pub io_descriptors: usize,

    /// Capacity of the outgoing request channel
    pub request_depth: usize,

    /// Largest single read or write in bytes
    pub max_transfer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host_nqn: format!("nqn.2014-08.org.nvmexpress:uuid:{}", Uuid::new_v4()),
            queue_size: 32,
            io_descriptors: 128,
            request_depth: 32,
            max_transfer: 0x20000,
        }
    }
}

impl ClientConfig {
    /// Check value ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_size < 2 {
            return Err(ConfigError::InvalidValue {
                field: "queue_size".into(),
                message: "must be at least 2".into(),
            });
        }
        if self.io_descriptors == 0 || self.request_depth == 0 {
            return Err(ConfigError::Validation(
                "io_descriptors and request_depth must be positive".into(),
            ));
        }
        if !validate_nqn(&self.host_nqn) {
            return Err(ConfigError::InvalidValue {
                field: "host_nqn".into(),
                message: format!("'{}' is not a valid NQN", self.host_nqn),
            });
        }
        Ok(())
    }
}
