//! Log page structures and the Get Log Page command fields

use crate::codec::at;

use super::capsule::CapsuleCommand;
use super::AdminOpcode;

/// Decoded Get Log Page parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPageRequest {
    /// Log page identifier
    pub page_id: u8,
    /// Byte offset into the page
    pub offset: u64,
    /// Bytes requested
    pub length: usize,
}

impl LogPageRequest {
    /// Extract the request from a Get Log Page capsule
    ///
    /// NUMD is split across D10 (lower 16 bits) and D11 (upper 16 bits) and
    /// counts dwords, zero based.
    pub fn from_command(cmd: &CapsuleCommand) -> Self {
        let numdl = cmd.d10 >> 16;
        let numdu = cmd.d11 & 0xFFFF;
        let dwords = (numdu << 16 | numdl) as usize + 1;
        Self {
            page_id: (cmd.d10 & 0xFF) as u8,
            offset: (cmd.d13 as u64) << 32 | cmd.d12 as u64,
            length: dwords * 4,
        }
    }

    /// Build the matching capsule
    pub fn to_command(&self) -> CapsuleCommand {
        let dwords = (self.length.max(4) / 4 - 1) as u32;
        let mut cmd = CapsuleCommand::new(AdminOpcode::GetLogPage as u8);
        cmd.d10 = (dwords & 0xFFFF) << 16 | self.page_id as u32;
        cmd.d11 = dwords >> 16;
        cmd.d12 = self.offset as u32;
        cmd.d13 = (self.offset >> 32) as u32;
        cmd
    }
}

crate::wire_record! {
    /// Commands Supported and Effects log (05h)
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CommandsSupportedLog {
        /// Admin command support, indexed by opcode
        pub admin: [u32; 256] => at(0),
        /// I/O command support, indexed by opcode
        pub io: [u32; 256] => at(1024),
    }
}

/// Command supported (CSUPP)
pub const COMMAND_SUPPORTED: u32 = 0x1;

/// ANA state: optimized
pub const ANA_OPTIMIZED: u8 = 0x01;

crate::wire_record! {
    /// ANA group descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AnaGroupDescriptor {
        /// ANA group identifier
        pub group_id: u32 => at(0),
        /// Number of NSIDs in the group
        pub nsid_count: u32 => at(4),
        /// Change count
        pub change_count: u64 => at(8),
        /// ANA state
        pub state: u8 => at(16),
        /// Namespace identifiers
        pub nsids: [u32; 1] => at(32),
    }
}

crate::wire_record! {
    /// Asymmetric Namespace Access log (0Ch) with a single group
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AnaLog {
        /// Change count
        pub change_count: u64 => at(0),
        /// Number of group descriptors
        pub descriptor_count: u16 => at(8),
        /// First group descriptor
        pub group: AnaGroupDescriptor => at(16),
    }
}

/// Offset of the first discovery log entry
pub const DISCOVERY_ENTRY_OFFSET: usize = 1024;

/// Size of one discovery log entry
pub const DISCOVERY_ENTRY_LEN: usize = 1024;

/// Transport type: TCP
pub const TRTYPE_TCP: u8 = 3;

/// Address family: IPv4
pub const ADRFAM_IPV4: u8 = 1;

/// Address family: IPv6
pub const ADRFAM_IPV6: u8 = 2;

/// Subsystem type: NVM subsystem
pub const SUBTYPE_NVM: u8 = 2;

/// Transport requirements: secure channel not required
pub const TREQ_NOT_REQUIRED: u8 = 4;

crate::wire_record! {
    /// Discovery log page header (70h)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiscoveryLogHeader {
        /// Generation counter
        pub generation: u64 => at(0),
        /// Number of records
        pub record_count: u64 => at(8),
        /// Record format
        pub record_format: u16 => at(16),
    }
}

crate::wire_record! {
    /// Discovery log page entry
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DiscoveryLogEntry {
        /// Transport type
        pub trtype: u8 => at(0),
        /// Address family
        pub adrfam: u8 => at(1),
        /// Subsystem type
        pub subtype: u8 => at(2),
        /// Transport requirements
        pub treq: u8 => at(3),
        /// Port ID
        pub port_id: u16 => at(4),
        /// Controller ID
        pub cntlid: u16 => at(6),
        /// Admin max submission queue size
        pub asqsz: u16 => at(8),
        /// Transport service identifier (port)
        pub trsvcid: String => at(32).len(32).space_padded(),
        /// Subsystem NQN
        pub subnqn: String => at(256).len(256),
        /// Transport address
        pub traddr: String => at(512).len(256).space_padded(),
        /// Transport specific address subtype
        pub tsas: [u8; 256] => at(768),
    }
}
