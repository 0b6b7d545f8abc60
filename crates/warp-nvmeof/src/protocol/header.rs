//! NVMe/TCP common PDU header

use crate::codec::{at, WireRecord};

/// Size of the common header that starts every PDU
pub const COMMON_HEADER_SIZE: usize = 8;

/// NVMe/TCP PDU types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    /// Initialize connection request
    IcReq = 0x00,
    /// Initialize connection response
    IcResp = 0x01,
    /// Host to controller termination request
    H2cTermReq = 0x02,
    /// Controller to host termination request
    C2hTermReq = 0x03,
    /// Command capsule
    CapsuleCmd = 0x04,
    /// Response capsule
    CapsuleResp = 0x05,
    /// Host to controller data
    H2cData = 0x06,
    /// Controller to host data
    C2hData = 0x07,
    /// Ready to transfer
    R2t = 0x09,
}

impl PduType {
    /// Convert from raw PDU type
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::IcReq),
            0x01 => Some(Self::IcResp),
            0x02 => Some(Self::H2cTermReq),
            0x03 => Some(Self::C2hTermReq),
            0x04 => Some(Self::CapsuleCmd),
            0x05 => Some(Self::CapsuleResp),
            0x06 => Some(Self::H2cData),
            0x07 => Some(Self::C2hData),
            0x09 => Some(Self::R2t),
            _ => None,
        }
    }
}

crate::wire_record! {
    /// Eight byte preamble shared by all PDUs
    ///
    /// A data segment follows the type specific header iff `data_offset != 0`,
    /// in which case `data_offset >= header_length`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommonHeader {
        /// Raw [`PduType`]
        pub pdu_type: u8 => at(0),
        /// Type specific flags
        pub flags: u8 => at(1),
        /// Header length including this preamble (HLEN)
        pub header_length: u8 => at(2),
        /// Offset of the data segment from the PDU start (PDO)
        pub data_offset: u8 => at(3),
        /// Total PDU length (PLEN)
        pub data_length: u32 => at(4),
    }
}

impl CommonHeader {
    /// Decoded PDU type
    pub fn kind(&self) -> Option<PduType> {
        PduType::from_raw(self.pdu_type)
    }

    /// Whether a data segment follows the header
    pub fn has_data(&self) -> bool {
        self.data_offset != 0
    }

    /// Length of the trailing data segment
    pub fn payload_length(&self) -> usize {
        if self.has_data() {
            (self.data_length as usize).saturating_sub(self.data_offset as usize)
        } else {
            0
        }
    }

    /// Check the framing invariants for a header we are about to consume
    pub fn is_well_formed(&self) -> bool {
        let hlen = self.header_length as usize;
        if hlen < COMMON_HEADER_SIZE || hlen > super::MAX_HEADER_SIZE {
            return false;
        }
        if self.has_data() {
            self.data_offset >= self.header_length
                && self.data_length as usize >= self.data_offset as usize
        } else {
            self.data_length as usize >= hlen
        }
    }
}

/// A PDU-specific header record
pub trait Pdu: WireRecord {
    /// PDU type written into the common header
    const PDU_TYPE: PduType;
    /// Length of the type specific header (common header excluded)
    const HEADER_LEN: usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = CommonHeader {
            pdu_type: PduType::CapsuleResp as u8,
            flags: 0,
            header_length: 24,
            data_offset: 0,
            data_length: 24,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes, vec![5, 0, 24, 0, 24, 0, 0, 0]);
        assert_eq!(CommonHeader::encoded_len(), COMMON_HEADER_SIZE);
    }

    #[test]
    fn test_payload_length() {
        let mut header = CommonHeader {
            pdu_type: PduType::C2hData as u8,
            flags: 0,
            header_length: 24,
            data_offset: 24,
            data_length: 24 + 4096,
        };
        assert!(header.has_data());
        assert_eq!(header.payload_length(), 4096);
        assert!(header.is_well_formed());

        header.data_offset = 0;
        header.data_length = 24;
        assert_eq!(header.payload_length(), 0);
        assert!(header.is_well_formed());
    }

    #[test]
    fn test_malformed_headers() {
        let short = CommonHeader {
            pdu_type: 4,
            flags: 0,
            header_length: 4,
            data_offset: 0,
            data_length: 4,
        };
        assert!(!short.is_well_formed());

        let overlapping = CommonHeader {
            pdu_type: 4,
            flags: 0,
            header_length: 72,
            data_offset: 16,
            data_length: 1096,
        };
        assert!(!overlapping.is_well_formed());
    }

    #[test]
    fn test_pdu_type_conversion() {
        assert_eq!(PduType::from_raw(0x09), Some(PduType::R2t));
        assert_eq!(PduType::from_raw(0x08), None);
    }
}
