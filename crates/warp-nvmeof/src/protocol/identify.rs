//! Identify data structures

use crate::codec::at;

/// Size of every Identify data structure
pub const IDENTIFY_DATA_LEN: usize = 4096;

/// Namespace identifier type: UUID
pub const NIDT_UUID: u8 = 0x03;

crate::wire_record! {
    /// Identify Controller data structure (CNS 01h)
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct IdentifyController {
        /// PCI vendor ID
        pub vid: u16 => at(0),
        /// PCI subsystem vendor ID
        pub ssvid: u16 => at(2),
        /// Serial number
        pub serial_number: String => at(4).len(20).space_padded(),
        /// Model number
        pub model_number: String => at(24).len(40).space_padded(),
        /// Firmware revision
        pub firmware_revision: String => at(64).len(8).space_padded(),
        /// Recommended arbitration burst
        pub rab: u8 => at(72),
        /// IEEE OUI identifier
        pub ieee_oui: [u8; 3] => at(73),
        /// Multi-path I/O and namespace sharing capabilities
        pub cmic: u8 => at(76),
        /// Maximum data transfer size (power of two of the minimum page size)
        pub mdts: u8 => at(77),
        /// Controller ID
        pub cntlid: u16 => at(78),
        /// Version
        pub version: u32 => at(80),
        /// Optional asynchronous events supported
        pub oaes: u32 => at(92),
        /// Controller attributes
        pub ctratt: u32 => at(96),
        /// Read recovery levels supported
        pub rrls: u16 => at(100),
        /// Controller type (1 = I/O controller, 2 = discovery)
        pub cntrltype: u8 => at(111),
        /// FRU globally unique identifier
        pub fguid: [u8; 16] => at(112),
        /// Optional admin command support
        pub oacs: u16 => at(256),
        /// Abort command limit
        pub acl: u8 => at(258),
        /// Asynchronous event request limit
        pub aerl: u8 => at(259),
        /// Firmware updates
        pub frmw: u8 => at(260),
        /// Log page attributes
        pub lpa: u8 => at(261),
        /// Error log page entries
        pub elpe: u8 => at(262),
        /// Number of power states support
        pub npss: u8 => at(263),
        /// Admin vendor specific command configuration
        pub avscc: u8 => at(264),
        /// Autonomous power state transition attributes
        pub apsta: u8 => at(265),
        /// Warning composite temperature threshold
        pub wctemp: u16 => at(266),
        /// Critical composite temperature threshold
        pub cctemp: u16 => at(268),
        /// Total NVM capacity in bytes (128-bit)
        pub tnvmcap: [u64; 2] => at(280),
        /// Keep alive support (100 ms units)
        pub kas: u16 => at(320),
        /// ANA transition time
        pub anatt: u8 => at(342),
        /// ANA capabilities
        pub anacap: u8 => at(343),
        /// ANA group identifier maximum
        pub anagrpmax: u32 => at(344),
        /// Number of ANA group identifiers
        pub nanagrpid: u32 => at(348),
        /// Submission queue entry size
        pub sqes: u8 => at(512),
        /// Completion queue entry size
        pub cqes: u8 => at(513),
        /// Maximum outstanding commands
        pub maxcmd: u16 => at(514),
        /// Number of namespaces
        pub nn: u32 => at(516),
        /// Optional NVM command support
        pub oncs: u16 => at(520),
        /// Fused operation support
        pub fuses: u16 => at(522),
        /// Format NVM attributes
        pub fna: u8 => at(524),
        /// Volatile write cache
        pub vwc: u8 => at(525),
        /// Atomic write unit normal
        pub awun: u16 => at(526),
        /// Atomic write unit power fail
        pub awupf: u16 => at(528),
        /// Namespace write protection capabilities
        pub nwpc: u8 => at(531),
        /// Atomic compare and write unit
        pub acwu: u16 => at(532),
        /// SGL support
        pub sgls: u32 => at(536),
        /// Maximum number of allowed namespaces
        pub mnan: u32 => at(540),
        /// NVM subsystem NQN
        pub subnqn: String => at(768).len(256),
        /// I/O queue command capsule supported size (16-byte units)
        pub ioccsz: u32 => at(1792),
        /// I/O queue response capsule supported size (16-byte units)
        pub iorcsz: u32 => at(1796),
        /// In capsule data offset
        pub icdoff: u16 => at(1800),
        /// Fabrics controller attributes
        pub fcatt: u8 => at(1802),
        /// Maximum SGL data block descriptors
        pub msdbd: u8 => at(1803),
        /// Optional fabric commands support
        pub ofcs: u16 => at(1804),
        /// Power state 0 descriptor
        pub psd0: [u8; 32] => at(2048),
    }
}

crate::wire_record! {
    /// Identify Namespace data structure (CNS 00h)
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct IdentifyNamespace {
        /// Namespace size in blocks
        pub nsze: u64 => at(0),
        /// Namespace capacity in blocks
        pub ncap: u64 => at(8),
        /// Namespace utilization in blocks
        pub nuse: u64 => at(16),
        /// Namespace features
        pub nsfeat: u8 => at(24),
        /// Number of LBA formats, zero based
        pub nlbaf: u8 => at(25),
        /// Formatted LBA size
        pub flbas: u8 => at(26),
        /// Metadata capabilities
        pub mc: u8 => at(27),
        /// End-to-end data protection capabilities
        pub dpc: u8 => at(28),
        /// End-to-end data protection type settings
        pub dps: u8 => at(29),
        /// Namespace multi-path I/O and sharing capabilities
        pub nmic: u8 => at(30),
        /// Reservation capabilities
        pub rescap: u8 => at(31),
        /// Format progress indicator
        pub fpi: u8 => at(32),
        /// Deallocate logical block features
        pub dlfeat: u8 => at(33),
        /// Namespace atomic write unit normal
        pub nawun: u16 => at(34),
        /// Namespace atomic write unit power fail
        pub nawupf: u16 => at(36),
        /// Namespace atomic compare and write unit
        pub nacwu: u16 => at(38),
        /// Namespace atomic boundary size normal
        pub nabsn: u16 => at(40),
        /// Namespace atomic boundary offset
        pub nabo: u16 => at(42),
        /// Namespace atomic boundary size power fail
        pub nabspf: u16 => at(44),
        /// Namespace optimal I/O boundary
        pub noiob: u16 => at(46),
        /// NVM capacity in bytes (128-bit)
        pub nvmcap: [u64; 2] => at(48),
        /// Preferred write granularity
        pub npwg: u16 => at(64),
        /// Preferred write alignment
        pub npwa: u16 => at(66),
        /// Preferred deallocate granularity
        pub npdg: u16 => at(68),
        /// Preferred deallocate alignment
        pub npda: u16 => at(70),
        /// Optimal write size
        pub nows: u16 => at(72),
        /// ANA group identifier
        pub anagrpid: u32 => at(92),
        /// Namespace attributes
        pub nsattr: u8 => at(99),
        /// NVM set identifier
        pub nvmsetid: u16 => at(100),
        /// Endurance group identifier
        pub endgid: u16 => at(102),
        /// Namespace globally unique identifier
        pub nguid: [u8; 16] => at(104),
        /// IEEE extended unique identifier
        pub eui64: u64 => at(120),
        /// LBA format descriptors
        pub lbaf: [u32; 16] => at(128),
    }
}

/// LBA format 0: 512-byte data, no metadata (LBADS = 9)
pub const LBAF_512: u32 = 9 << 16;

crate::wire_record! {
    /// Active namespace ID list (CNS 02h)
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ActiveNamespaceList {
        /// Namespace IDs in increasing order, zero terminated
        pub nsids: [u32; 1024] => at(0),
    }
}

crate::wire_record! {
    /// Namespace identification descriptor (CNS 03h)
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct NamespaceDescriptor {
        /// Namespace identifier type
        pub nidt: u8 => at(0),
        /// Namespace identifier length
        pub nidl: u8 => at(1),
        /// Namespace identifier
        pub nid: [u8; 16] => at(4),
    }
}
