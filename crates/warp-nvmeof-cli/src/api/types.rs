//! Management API request and response bodies

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp_nvmeof::target::KeyValue;

/// Outcome carried by every response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// HTTP status code
    pub code: u16,
    /// Human readable message
    pub message: String,
}

impl Status {
    /// Successful outcome
    pub fn ok() -> Self {
        Self {
            code: 200,
            message: "ok".to_string(),
        }
    }
}

/// File-backed volume exported as its own subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume and namespace UUID
    pub uuid: Uuid,
    /// Display name
    pub name: String,
    /// Free form description
    #[serde(default)]
    pub description: String,
    /// Size in bytes
    pub size: u64,
    /// Subsystem NQN the volume is exported under
    pub nqn: String,
}

/// Create a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Display name
    pub name: String,
    /// Free form description
    #[serde(default)]
    pub description: String,
    /// Size in bytes, a whole number of blocks
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeResponse {
    pub status: Status,
    pub volume: Volume,
}

/// Look up one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVolumeRequest {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVolumeResponse {
    pub status: Status,
    pub volume: Volume,
}

/// Stop exporting a volume and delete its image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVolumeRequest {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVolumeResponse {
    pub status: Status,
}

/// List every volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumeRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumeResponse {
    pub status: Status,
    pub volumes: Vec<Volume>,
}

/// One exported subsystem, as listed by `/targets`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetView {
    /// Subsystem NQN
    pub nqn: String,
    /// `discovery` or `nvm`
    pub kind: String,
    /// Backend details
    pub details: Vec<KeyValue>,
}

/// Body of every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: Status,
}
