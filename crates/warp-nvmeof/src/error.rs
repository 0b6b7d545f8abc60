//! NVMe-oF error types
//!
//! Two layers live here: [`NvmeOfError`], the crate-wide error returned by
//! fallible operations, and [`NvmeStatus`], the completion status carried in
//! every capsule response.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::target::TargetError;

/// Result type for NVMe-oF operations
pub type NvmeOfResult<T> = Result<T, NvmeOfError>;

/// NVMe-oF error types
#[derive(Debug, Error)]
pub enum NvmeOfError {
    /// I/O error on the underlying connection or backing store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wire record could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Peer violated the transport protocol; the connection is unusable
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command completed with a non-success status
    #[error("command failed: {0}")]
    Status(NvmeStatus),

    /// Command completed with a status this crate does not know
    #[error("command failed: nvme error {0:#x}")]
    UnknownStatus(u16),

    /// Connection setup failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Subsystem lookup or registration error
    #[error("Subsystem error: {0}")]
    Subsystem(String),

    /// NQN (NVMe Qualified Name) error
    #[error("Invalid NQN: {0}")]
    InvalidNqn(String),

    /// Caller passed an argument that can never be sent
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Backing target failure
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Queue or connection already closed
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// Not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<NvmeStatus> for NvmeOfError {
    fn from(status: NvmeStatus) -> Self {
        NvmeOfError::Status(status)
    }
}

/// Status code type (bits 8..11 of the status code)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCodeType {
    /// Generic command status
    Generic,
    /// Command specific status
    CommandSpecific,
    /// Media and data integrity errors
    Media,
    /// Path related status
    Path,
    /// Vendor specific
    Vendor,
}

/// Do-not-retry flag set on every failed completion
pub const STATUS_DO_NOT_RETRY: u16 = 0x8000;

/// Mask selecting the status code bits of a wire status field
pub const STATUS_CODE_MASK: u16 = 0x3FFF;

/// NVMe status codes (NVM Express Base Specification)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NvmeStatus {
    /// Command completed successfully
    Success = 0x0000,
    /// Invalid command opcode
    InvalidOpcode = 0x0001,
    /// Invalid field in command
    InvalidField = 0x0002,
    /// Command ID conflict
    CommandIdConflict = 0x0003,
    /// Data transfer error
    DataTransferError = 0x0004,
    /// Commands aborted due to power loss notification
    PowerLoss = 0x0005,
    /// Internal error
    InternalError = 0x0006,
    /// Command abort requested
    CommandAbortRequested = 0x0007,
    /// Command aborted due to SQ deletion
    SqDeletionAbort = 0x0008,
    /// Command aborted due to failed fused command
    FusedFail = 0x0009,
    /// Command aborted due to missing fused command
    FusedMissing = 0x000A,
    /// Invalid namespace or format
    InvalidNamespaceOrFormat = 0x000B,
    /// Command sequence error
    CommandSequenceError = 0x000C,
    /// Invalid SGL segment descriptor
    InvalidSglSegment = 0x000D,
    /// Invalid number of SGL descriptors
    InvalidSglCount = 0x000E,
    /// Data SGL length invalid
    DataSglLengthInvalid = 0x000F,
    /// Metadata SGL length invalid
    MetadataSglLengthInvalid = 0x0010,
    /// SGL descriptor type invalid
    SglTypeInvalid = 0x0011,
    /// Invalid use of controller memory buffer
    InvalidCmbUse = 0x0012,
    /// PRP offset invalid
    PrpOffsetInvalid = 0x0013,
    /// Atomic write unit exceeded
    AtomicWriteUnitExceeded = 0x0014,
    /// Operation denied
    OperationDenied = 0x0015,
    /// SGL offset invalid
    SglOffsetInvalid = 0x0016,
    /// Host identifier inconsistent format
    HostIdInconsistentFormat = 0x0018,
    /// Keep alive timer expired
    KeepAliveExpired = 0x0019,
    /// Keep alive timeout invalid
    KeepAliveTimeoutInvalid = 0x001A,
    /// Command aborted due to preempt and abort
    PreemptAbort = 0x001B,
    /// Sanitize failed
    SanitizeFailed = 0x001C,
    /// Sanitize in progress
    SanitizeInProgress = 0x001D,
    /// SGL data block granularity invalid
    SglDataBlockGranularityInvalid = 0x001E,
    /// Command not supported for queue in CMB
    CommandNotSupportedForQueueInCmb = 0x001F,
    /// Namespace is write protected
    NamespaceWriteProtected = 0x0020,
    /// Command interrupted
    CommandInterrupted = 0x0021,
    /// Transient transport error
    TransientTransportError = 0x0022,
    /// LBA out of range
    LbaOutOfRange = 0x0080,
    /// Capacity exceeded
    CapacityExceeded = 0x0081,
    /// Namespace not ready
    NamespaceNotReady = 0x0082,
    /// Reservation conflict
    ReservationConflict = 0x0083,
    /// Format in progress
    FormatInProgress = 0x0084,
    /// Feature identifier not changeable
    FeatureNotChangeable = 0x010E,
    /// Write fault
    WriteFault = 0x0280,
    /// Unrecovered read error
    UnrecoveredReadError = 0x0281,
    /// End-to-end guard check error
    GuardCheckError = 0x0282,
    /// End-to-end application tag check error
    ApplicationTagCheckError = 0x0283,
    /// End-to-end reference tag check error
    ReferenceTagCheckError = 0x0284,
    /// Compare failure
    CompareFailure = 0x0285,
    /// Access denied
    AccessDenied = 0x0286,
    /// Deallocated or unwritten logical block
    DeallocatedBlock = 0x0287,
    /// Internal path error
    InternalPathError = 0x0300,
    /// Asymmetric access persistent loss
    AnaPersistentLoss = 0x0301,
    /// Asymmetric access inaccessible
    AnaInaccessible = 0x0302,
    /// Asymmetric access transition
    AnaTransition = 0x0303,
    /// Controller pathing error
    ControllerPathError = 0x0360,
    /// Host pathing error
    HostPathError = 0x0370,
    /// Command aborted by host
    HostAbortedCommand = 0x0371,
    /// Client side: fabric connection failure
    ConnectionFailure = 0x0701,
    /// Client side: invalid queue id
    InvalidQueueId = 0x0702,
}

impl NvmeStatus {
    const ALL: [NvmeStatus; 57] = [
        Self::Success,
        Self::InvalidOpcode,
        Self::InvalidField,
        Self::CommandIdConflict,
        Self::DataTransferError,
        Self::PowerLoss,
        Self::InternalError,
        Self::CommandAbortRequested,
        Self::SqDeletionAbort,
        Self::FusedFail,
        Self::FusedMissing,
        Self::InvalidNamespaceOrFormat,
        Self::CommandSequenceError,
        Self::InvalidSglSegment,
        Self::InvalidSglCount,
        Self::DataSglLengthInvalid,
        Self::MetadataSglLengthInvalid,
        Self::SglTypeInvalid,
        Self::InvalidCmbUse,
        Self::PrpOffsetInvalid,
        Self::AtomicWriteUnitExceeded,
        Self::OperationDenied,
        Self::SglOffsetInvalid,
        Self::HostIdInconsistentFormat,
        Self::KeepAliveExpired,
        Self::KeepAliveTimeoutInvalid,
        Self::PreemptAbort,
        Self::SanitizeFailed,
        Self::SanitizeInProgress,
        Self::SglDataBlockGranularityInvalid,
        Self::CommandNotSupportedForQueueInCmb,
        Self::NamespaceWriteProtected,
        Self::CommandInterrupted,
        Self::TransientTransportError,
        Self::LbaOutOfRange,
        Self::CapacityExceeded,
        Self::NamespaceNotReady,
        Self::ReservationConflict,
        Self::FormatInProgress,
        Self::FeatureNotChangeable,
        Self::WriteFault,
        Self::UnrecoveredReadError,
        Self::GuardCheckError,
        Self::ApplicationTagCheckError,
        Self::ReferenceTagCheckError,
        Self::CompareFailure,
        Self::AccessDenied,
        Self::DeallocatedBlock,
        Self::InternalPathError,
        Self::AnaPersistentLoss,
        Self::AnaInaccessible,
        Self::AnaTransition,
        Self::ControllerPathError,
        Self::HostPathError,
        Self::HostAbortedCommand,
        Self::ConnectionFailure,
        Self::InvalidQueueId,
    ];

    /// Look up a status by code; flag bits above the code are ignored
    pub fn from_raw(value: u16) -> Option<Self> {
        let code = value & STATUS_CODE_MASK;
        Self::ALL.iter().copied().find(|s| s.to_raw() == code)
    }

    /// Convert to raw status code
    pub fn to_raw(self) -> u16 {
        self as u16
    }

    /// Encoding placed in the capsule response status field
    pub fn to_wire(self) -> u16 {
        match self {
            Self::Success => 0,
            other => other.to_raw() | STATUS_DO_NOT_RETRY,
        }
    }

    /// Check if status indicates success
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Status code type class
    pub fn code_type(self) -> StatusCodeType {
        match self.to_raw() >> 8 {
            0x0 => StatusCodeType::Generic,
            0x1 => StatusCodeType::CommandSpecific,
            0x2 => StatusCodeType::Media,
            0x3 => StatusCodeType::Path,
            _ => StatusCodeType::Vendor,
        }
    }

    /// Human readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "successful completion",
            Self::InvalidOpcode => "invalid command opcode",
            Self::InvalidField => "invalid field in command",
            Self::CommandIdConflict => "command ID conflict",
            Self::DataTransferError => "data transfer error",
            Self::PowerLoss => "command aborted due to power loss notification",
            Self::InternalError => "internal error",
            Self::CommandAbortRequested => "command abort requested",
            Self::SqDeletionAbort => "command aborted due to SQ deletion",
            Self::FusedFail => "command aborted due to failed fused command",
            Self::FusedMissing => "command aborted due to missing fused command",
            Self::InvalidNamespaceOrFormat => "invalid namespace or format",
            Self::CommandSequenceError => "command sequence error",
            Self::InvalidSglSegment => "invalid SGL segment descriptor",
            Self::InvalidSglCount => "invalid number of SGL descriptors",
            Self::DataSglLengthInvalid => "data SGL length invalid",
            Self::MetadataSglLengthInvalid => "metadata SGL length invalid",
            Self::SglTypeInvalid => "SGL descriptor type invalid",
            Self::InvalidCmbUse => "invalid use of controller memory buffer",
            Self::PrpOffsetInvalid => "PRP offset invalid",
            Self::AtomicWriteUnitExceeded => "atomic write unit exceeded",
            Self::OperationDenied => "operation denied",
            Self::SglOffsetInvalid => "SGL offset invalid",
            Self::HostIdInconsistentFormat => "host identifier inconsistent format",
            Self::KeepAliveExpired => "keep alive timer expired",
            Self::KeepAliveTimeoutInvalid => "keep alive timeout invalid",
            Self::PreemptAbort => "command aborted due to preempt and abort",
            Self::SanitizeFailed => "sanitize failed",
            Self::SanitizeInProgress => "sanitize in progress",
            Self::SglDataBlockGranularityInvalid => "SGL data block granularity invalid",
            Self::CommandNotSupportedForQueueInCmb => "command not supported for queue in CMB",
            Self::NamespaceWriteProtected => "namespace is write protected",
            Self::CommandInterrupted => "command interrupted",
            Self::TransientTransportError => "transient transport error",
            Self::LbaOutOfRange => "lba out of range",
            Self::CapacityExceeded => "capacity exceeded",
            Self::NamespaceNotReady => "namespace not ready",
            Self::ReservationConflict => "reservation conflict",
            Self::FormatInProgress => "format in progress",
            Self::FeatureNotChangeable => "feature not changeable",
            Self::WriteFault => "write fault",
            Self::UnrecoveredReadError => "unrecovered read error",
            Self::GuardCheckError => "end to end guard check error",
            Self::ApplicationTagCheckError => "end to end application tag check error",
            Self::ReferenceTagCheckError => "end to end reference tag check error",
            Self::CompareFailure => "compare failure",
            Self::AccessDenied => "access denied",
            Self::DeallocatedBlock => "deallocated or unwritten logical block",
            Self::InternalPathError => "internal path error",
            Self::AnaPersistentLoss => "asymmetric access persistent loss",
            Self::AnaInaccessible => "asymmetric access inaccessible",
            Self::AnaTransition => "asymmetric access transition",
            Self::ControllerPathError => "controller pathing error",
            Self::HostPathError => "host pathing error",
            Self::HostAbortedCommand => "command aborted by host",
            Self::ConnectionFailure => "client fabric connection failure",
            Self::InvalidQueueId => "client invalid queue id",
        }
    }
}

impl fmt::Display for NvmeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.description(), self.to_raw())
    }
}

impl From<TargetError> for NvmeStatus {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::LbaOutOfRange => NvmeStatus::LbaOutOfRange,
            TargetError::Write => NvmeStatus::WriteFault,
            TargetError::Read => NvmeStatus::UnrecoveredReadError,
            TargetError::Unsupported => NvmeStatus::InvalidOpcode,
            _ => NvmeStatus::InternalError,
        }
    }
}

/// Interpret a wire status field, turning failures into errors
pub fn check_status(raw: u16) -> NvmeOfResult<()> {
    if raw & STATUS_CODE_MASK == 0 {
        return Ok(());
    }
    match NvmeStatus::from_raw(raw) {
        Some(status) => Err(NvmeOfError::Status(status)),
        None => Err(NvmeOfError::UnknownStatus(raw & STATUS_CODE_MASK)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nvme_status_conversion() {
        assert_eq!(NvmeStatus::from_raw(0x0000), Some(NvmeStatus::Success));
        assert_eq!(NvmeStatus::from_raw(0x0001), Some(NvmeStatus::InvalidOpcode));
        assert_eq!(NvmeStatus::from_raw(0x8082), Some(NvmeStatus::NamespaceNotReady));
        assert_eq!(NvmeStatus::from_raw(0x0017), None);

        assert!(NvmeStatus::Success.is_success());
        assert!(!NvmeStatus::InvalidOpcode.is_success());
    }

    #[test]
    fn test_wire_encoding_sets_do_not_retry() {
        assert_eq!(NvmeStatus::Success.to_wire(), 0);
        assert_eq!(NvmeStatus::InternalError.to_wire(), 0x8006);
        assert_eq!(NvmeStatus::WriteFault.to_wire(), 0x8280);
    }

    #[test]
    fn test_code_types() {
        assert_eq!(NvmeStatus::InvalidField.code_type(), StatusCodeType::Generic);
        assert_eq!(NvmeStatus::FeatureNotChangeable.code_type(), StatusCodeType::CommandSpecific);
        assert_eq!(NvmeStatus::CompareFailure.code_type(), StatusCodeType::Media);
        assert_eq!(NvmeStatus::HostPathError.code_type(), StatusCodeType::Path);
        assert_eq!(NvmeStatus::InvalidQueueId.code_type(), StatusCodeType::Vendor);
    }

    #[test]
    fn test_every_code_round_trips() {
        for status in NvmeStatus::ALL {
            assert_eq!(NvmeStatus::from_raw(status.to_wire()), Some(status));
        }
    }

    #[test]
    fn test_target_error_mapping() {
        assert_eq!(NvmeStatus::from(TargetError::LbaOutOfRange), NvmeStatus::LbaOutOfRange);
        assert_eq!(NvmeStatus::from(TargetError::Write), NvmeStatus::WriteFault);
        assert_eq!(NvmeStatus::from(TargetError::Read), NvmeStatus::UnrecoveredReadError);
        assert_eq!(NvmeStatus::from(TargetError::Unsupported), NvmeStatus::InvalidOpcode);
        assert_eq!(NvmeStatus::from(TargetError::Aborted), NvmeStatus::InternalError);
        assert_eq!(NvmeStatus::from(TargetError::Internal), NvmeStatus::InternalError);
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(0).is_ok());
        assert!(matches!(
            check_status(0x8002),
            Err(NvmeOfError::Status(NvmeStatus::InvalidField))
        ));
        assert!(matches!(check_status(0x8017), Err(NvmeOfError::UnknownStatus(0x17))));
    }
}
