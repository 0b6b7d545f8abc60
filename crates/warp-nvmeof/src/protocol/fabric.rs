//! Fabrics Connect command and data

use crate::codec::{at, CodecResult, WireRecord};

use super::capsule::CapsuleCommand;
use super::header::{Pdu, PduType};

/// Size of the Connect command data segment
pub const CONNECT_DATA_LEN: usize = 1024;

/// Property access width (D10 ATTRIB)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PropertySize {
    /// 4-byte property
    Four = 0,
    /// 8-byte property
    Eight = 1,
}

crate::wire_record! {
    /// Connect command, an alternate view of the 64-byte capsule
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConnectCommand {
        /// Opcode (always Fabric)
        pub opcode: u8 => at(0),
        /// Command identifier
        pub cid: u16 => at(2),
        /// Fabrics command type (always Connect)
        pub fctype: u8 => at(4),
        /// Record format
        pub recfmt: u16 => at(40),
        /// Queue to create: 0 is the admin queue
        pub queue_id: u16 => at(42),
        /// Submission queue size, zero based
        pub queue_size: u16 => at(44),
        /// Connect attributes
        pub cattr: u8 => at(46),
        /// Keep alive timeout in milliseconds
        pub kato: u32 => at(48),
    }
}

impl Pdu for ConnectCommand {
    const PDU_TYPE: PduType = PduType::CapsuleCmd;
    const HEADER_LEN: usize = 64;
}

impl ConnectCommand {
    /// Queue depth requested by the host
    pub fn depth(&self) -> usize {
        self.queue_size as usize + 1
    }

    /// The full 64-byte capsule carrying this command
    pub fn to_capsule(&self) -> CodecResult<CapsuleCommand> {
        let mut buf = [0u8; <ConnectCommand as Pdu>::HEADER_LEN];
        self.encode_into(&mut buf)?;
        CapsuleCommand::decode(&buf)
    }
}

crate::wire_record! {
    /// Connect command data segment
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ConnectData {
        /// Host identifier
        pub host_id: [u8; 16] => at(0),
        /// Requested controller ID, [`AUTO_CONTROLLER_ID`](super::AUTO_CONTROLLER_ID) to let the target choose
        pub cntlid: u16 => at(16),
        /// Subsystem NQN
        pub subsystem_nqn: String => at(256).len(256),
        /// Host NQN
        pub host_nqn: String => at(512).len(256),
    }
}

/// Byte offset of the subsystem NQN in [`ConnectData`]
pub const CONNECT_DATA_SUBNQN_OFFSET: u64 = 256;
