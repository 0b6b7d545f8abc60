//! NVMe/TCP protocol model
//!
//! Typed records for everything that crosses the wire, declared with the
//! [`wire_record!`](crate::wire_record) codec, plus the opcode and register
//! vocabulary shared by the controller and the client.

pub mod capsule;
pub mod fabric;
pub mod header;
pub mod identify;
pub mod log_page;
pub mod transport;

pub use capsule::{CapsuleCommand, CapsuleResponse};
pub use fabric::{ConnectCommand, ConnectData, PropertySize};
pub use header::{CommonHeader, Pdu, PduType};
pub use identify::{
    ActiveNamespaceList, IdentifyController, IdentifyNamespace, NamespaceDescriptor,
};
pub use log_page::{
    AnaGroupDescriptor, AnaLog, CommandsSupportedLog, DiscoveryLogEntry, DiscoveryLogHeader,
    LogPageRequest,
};
pub use transport::{C2hData, IcReq, IcResp, R2t, TermReq};

/// Logical block size exposed by every namespace
pub const BLOCK_SIZE: u32 = 512;

/// Largest PDU header this crate accepts (common header included)
pub const MAX_HEADER_SIZE: usize = 128;

/// Largest host-to-controller data segment advertised in ICResp
pub const MAX_H2C_DATA_LENGTH: u32 = 0x8000;

/// Request slots preallocated per controller
pub const CONTROLLER_QUEUE_CAPACITY: usize = 64;

/// Maximum outstanding commands reported in Identify
pub const MAX_COMMANDS: u16 = 64;

/// Implemented NVMe version (1.3.0)
pub const NVME_VERSION: u32 = 1 << 16 | 3 << 8;

/// Controller capabilities register
///
/// Command sets supported (NVM), 7.5 s ready timeout, MQES = capacity - 1.
pub const CONTROLLER_CAPABILITIES: u64 =
    1 << 37 | 15 << 24 | (CONTROLLER_QUEUE_CAPACITY as u64 - 1);

/// Write Zeroes: deallocate the range instead of writing zeros (D12)
pub const DEALLOCATE_BIT: u32 = 1 << 25;

/// Connect CATTR: submission queue flow control disabled
pub const FLOW_CONTROL_DISABLED: u8 = 1 << 2;

/// Connect CNTLID asking the target to pick a controller ID
pub const AUTO_CONTROLLER_ID: u16 = 0xFFFF;

/// SQHD reported when flow control is disabled
pub const SQHD_DISABLED: u16 = 0xFFFF;

/// Well-known NQN of the discovery subsystem
pub const DISCOVERY_NQN: &str = "nqn.2014-08.org.nvmexpress.discovery";

/// NQN of the placeholder subsystem bound before Connect
pub const INIT_NQN: &str = "nqn.2014-08.org.nvmexpress.init";

/// Admin command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AdminOpcode {
    /// Delete I/O submission queue
    DeleteIoSq = 0x00,
    /// Get log page
    GetLogPage = 0x02,
    /// Identify
    Identify = 0x06,
    /// Abort
    Abort = 0x08,
    /// Set features
    SetFeatures = 0x09,
    /// Get features
    GetFeatures = 0x0A,
    /// Asynchronous event request
    AsyncEventRequest = 0x0C,
    /// Keep alive
    KeepAlive = 0x18,
    /// Fabrics command (connect, property get/set, ...)
    Fabric = 0x7F,
    /// Security send
    SecuritySend = 0x81,
    /// Security receive
    SecurityReceive = 0x82,
}

impl AdminOpcode {
    /// Convert from raw opcode
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::DeleteIoSq),
            0x02 => Some(Self::GetLogPage),
            0x06 => Some(Self::Identify),
            0x08 => Some(Self::Abort),
            0x09 => Some(Self::SetFeatures),
            0x0A => Some(Self::GetFeatures),
            0x0C => Some(Self::AsyncEventRequest),
            0x18 => Some(Self::KeepAlive),
            0x7F => Some(Self::Fabric),
            0x81 => Some(Self::SecuritySend),
            0x82 => Some(Self::SecurityReceive),
            _ => None,
        }
    }
}

/// NVM (I/O) command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IoOpcode {
    /// Flush
    Flush = 0x00,
    /// Write
    Write = 0x01,
    /// Read
    Read = 0x02,
    /// Write zeroes (or deallocate, see [`DEALLOCATE_BIT`])
    WriteZeroes = 0x08,
    /// Dataset management
    DatasetManagement = 0x09,
}

impl IoOpcode {
    /// Convert from raw opcode
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Flush),
            0x01 => Some(Self::Write),
            0x02 => Some(Self::Read),
            0x08 => Some(Self::WriteZeroes),
            0x09 => Some(Self::DatasetManagement),
            _ => None,
        }
    }
}

/// Fabrics command types (FCTYPE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FabricCommandType {
    /// Property set
    PropertySet = 0x00,
    /// Connect
    Connect = 0x01,
    /// Property get
    PropertyGet = 0x04,
    /// Authentication send
    AuthenticationSend = 0x05,
    /// Authentication receive
    AuthenticationReceive = 0x06,
    /// Disconnect
    Disconnect = 0x08,
}

impl FabricCommandType {
    /// Convert from raw FCTYPE
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::PropertySet),
            0x01 => Some(Self::Connect),
            0x04 => Some(Self::PropertyGet),
            0x05 => Some(Self::AuthenticationSend),
            0x06 => Some(Self::AuthenticationReceive),
            0x08 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// Controller property (register) offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Property {
    /// Controller capabilities (CAP)
    Capabilities = 0x00,
    /// Version (VS)
    Version = 0x08,
    /// Controller configuration (CC)
    Configuration = 0x14,
    /// Controller status (CSTS)
    Status = 0x1C,
    /// NVM subsystem reset (NSSR)
    SubsystemReset = 0x20,
}

impl Property {
    /// Convert from a register offset
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0x00 => Some(Self::Capabilities),
            0x08 => Some(Self::Version),
            0x14 => Some(Self::Configuration),
            0x1C => Some(Self::Status),
            0x20 => Some(Self::SubsystemReset),
            _ => None,
        }
    }
}

/// CC.EN
pub const CC_ENABLE: u32 = 0x1;
/// CC.SHN (shutdown notification)
pub const CC_SHUTDOWN_MASK: u32 = 0xC000;
/// CSTS.RDY
pub const CSTS_READY: u32 = 0x1;
/// CSTS.SHST = shutdown processing occurring
pub const CSTS_SHUTDOWN_OCCURRING: u32 = 0x2 << 2;

/// Identify controller or namespace structure (CNS)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IdentifyCns {
    /// Identify namespace
    Namespace = 0x00,
    /// Identify controller
    Controller = 0x01,
    /// Active namespace ID list
    ActiveNamespaces = 0x02,
    /// Namespace identification descriptor list
    NamespaceDescriptors = 0x03,
}

impl IdentifyCns {
    /// Convert from raw CNS
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Namespace),
            0x01 => Some(Self::Controller),
            0x02 => Some(Self::ActiveNamespaces),
            0x03 => Some(Self::NamespaceDescriptors),
            _ => None,
        }
    }
}

/// Log page identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogPageId {
    /// Error information
    ErrorInformation = 0x01,
    /// SMART / health information
    HealthInformation = 0x02,
    /// Commands supported and effects
    CommandsSupported = 0x05,
    /// Device self-test
    DeviceSelfTest = 0x06,
    /// Asymmetric namespace access
    AsymmetricNamespaceAccess = 0x0C,
    /// Discovery log
    Discovery = 0x70,
}

impl LogPageId {
    /// Convert from raw log identifier
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ErrorInformation),
            0x02 => Some(Self::HealthInformation),
            0x05 => Some(Self::CommandsSupported),
            0x06 => Some(Self::DeviceSelfTest),
            0x0C => Some(Self::AsymmetricNamespaceAccess),
            0x70 => Some(Self::Discovery),
            _ => None,
        }
    }
}

/// Feature identifiers handled by Set/Get Features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FeatureId {
    /// Number of queues
    NumberOfQueues = 0x07,
    /// Asynchronous event configuration
    AsyncEventConfig = 0x0B,
    /// Keep alive timer
    KeepAliveTimer = 0x0F,
}

impl FeatureId {
    /// Convert from raw feature identifier
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x07 => Some(Self::NumberOfQueues),
            0x0B => Some(Self::AsyncEventConfig),
            0x0F => Some(Self::KeepAliveTimer),
            _ => None,
        }
    }
}
