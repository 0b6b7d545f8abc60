//! Command and response capsules
//!
//! The 64-byte submission queue entry and 16-byte completion queue entry as
//! carried in CapsuleCmd and CapsuleResp PDUs.

use std::fmt;

use crate::codec::{at, CodecResult, WireRecord};
use crate::error::NvmeStatus;

use super::header::{Pdu, PduType};
use super::{AdminOpcode, FabricCommandType, IoOpcode, PropertySize, DEALLOCATE_BIT};

crate::wire_record! {
    /// Submission queue entry (command capsule header)
    #[derive(Clone, PartialEq, Eq)]
    pub struct CapsuleCommand {
        /// Command opcode
        pub opcode: u8 => at(0),
        /// Fused operation and PRP/SGL selection (PSDT)
        pub prp: u8 => at(1),
        /// Command identifier
        pub cid: u16 => at(2),
        /// Fabrics command type, meaningful when `opcode` is Fabric
        pub fctype: u8 => at(4),
        /// Data pointer (SGL descriptor)
        pub dptr: [u8; 16] => at(24),
        /// Command dword 10
        pub d10: u32 => at(40),
        /// Command dword 11
        pub d11: u32 => at(44),
        /// Command dword 12
        pub d12: u32 => at(48),
        /// Command dword 13
        pub d13: u32 => at(52),
        /// Command dword 14
        pub d14: u32 => at(56),
        /// Command dword 15
        pub d15: u32 => at(60),
    }
}

impl Pdu for CapsuleCommand {
    const PDU_TYPE: PduType = PduType::CapsuleCmd;
    const HEADER_LEN: usize = 64;
}

impl CapsuleCommand {
    /// Empty command with the given opcode
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            ..Default::default()
        }
    }

    /// Fabrics command of the given type
    pub fn fabric(fctype: FabricCommandType) -> Self {
        Self {
            opcode: AdminOpcode::Fabric as u8,
            fctype: fctype as u8,
            ..Default::default()
        }
    }

    /// Property Get of `offset`
    pub fn property_get(offset: u32, size: PropertySize) -> Self {
        Self {
            d10: size as u32,
            d11: offset,
            ..Self::fabric(FabricCommandType::PropertyGet)
        }
    }

    /// Property Set of `offset` to `value`
    pub fn property_set(offset: u32, value: u64, size: PropertySize) -> Self {
        Self {
            d10: size as u32,
            d11: offset,
            d12: value as u32,
            d13: (value >> 32) as u32,
            ..Self::fabric(FabricCommandType::PropertySet)
        }
    }

    /// Read, write or write-zeroes style command addressing `blocks` blocks
    pub fn io(opcode: IoOpcode, lba: u64, blocks: u32) -> Self {
        let mut cmd = Self::new(opcode as u8);
        cmd.set_lba(lba);
        cmd.d12 = blocks.saturating_sub(1) & 0xFFFF;
        cmd
    }

    /// Starting LBA (D11:D10)
    pub fn lba(&self) -> u64 {
        (self.d11 as u64) << 32 | self.d10 as u64
    }

    /// Set the starting LBA
    pub fn set_lba(&mut self, lba: u64) {
        self.d10 = lba as u32;
        self.d11 = (lba >> 32) as u32;
    }

    /// Number of logical blocks (NLB is zero based)
    pub fn block_count(&self) -> u32 {
        (self.d12 & 0xFFFF) + 1
    }

    /// Write Zeroes deallocate flag
    pub fn deallocate(&self) -> bool {
        self.d12 & DEALLOCATE_BIT != 0
    }

    /// Fabrics command type, if this is a recognised fabrics command
    pub fn fabric_type(&self) -> Option<FabricCommandType> {
        FabricCommandType::from_raw(self.fctype)
    }

    /// View this capsule through another 64-byte command layout
    pub fn reinterpret<R: WireRecord>(&self) -> CodecResult<R> {
        R::decode(&self.to_bytes()?)
    }
}

impl fmt::Debug for CapsuleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapsuleCommand")
            .field("opcode", &format_args!("{:#04x}", self.opcode))
            .field("cid", &self.cid)
            .field("fctype", &format_args!("{:#04x}", self.fctype))
            .field("d10", &format_args!("{:#x}", self.d10))
            .field("d11", &format_args!("{:#x}", self.d11))
            .field("d12", &format_args!("{:#x}", self.d12))
            .field("d13", &format_args!("{:#x}", self.d13))
            .finish()
    }
}

crate::wire_record! {
    /// Completion queue entry (response capsule)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapsuleResponse {
        /// Command specific result (DW0/DW1)
        pub fabric_response: [u8; 8] => at(0),
        /// Submission queue head pointer
        pub sqhd: u16 => at(8),
        /// Submission queue identifier
        pub queue_id: u16 => at(10),
        /// Command identifier this completes
        pub cid: u16 => at(12),
        /// Status field
        pub status: u16 => at(14),
    }
}

impl Pdu for CapsuleResponse {
    const PDU_TYPE: PduType = PduType::CapsuleResp;
    const HEADER_LEN: usize = 16;
}

impl CapsuleResponse {
    /// Set the completion status (do-not-retry on failure)
    pub fn set_status(&mut self, status: NvmeStatus) {
        self.status = status.to_wire();
    }

    /// Whether the status field reports success
    pub fn is_success(&self) -> bool {
        self.status & crate::error::STATUS_CODE_MASK == 0
    }

    /// Command specific result as a 64-bit value
    pub fn result_u64(&self) -> u64 {
        u64::from_le_bytes(self.fabric_response)
    }

    /// Command specific result DW0
    pub fn result_u32(&self) -> u32 {
        self.result_u64() as u32
    }

    /// Store a 64-bit command specific result
    pub fn set_result_u64(&mut self, value: u64) {
        self.fabric_response = value.to_le_bytes();
    }

    /// Store DW0, leaving DW1 untouched
    pub fn set_result_u32(&mut self, value: u32) {
        self.fabric_response[..4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reset for reuse by another command
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
