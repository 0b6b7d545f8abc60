//! Transport level PDUs: connection setup, data transfer, termination

use crate::codec::at;

use super::header::{Pdu, PduType};

/// C2HData flag: last data PDU of the command
pub const C2H_DATA_LAST: u8 = 1 << 2;

/// C2HData flag: a response capsule is not sent (SUCCESS)
pub const C2H_DATA_SUCCESS: u8 = 1 << 3;

/// Supported PDU format version
pub const PDU_FORMAT_VERSION: u16 = 0;

crate::wire_record! {
    /// Initialize connection request
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IcReq {
        /// PDU format version
        pub pfv: u16 => at(0),
        /// Host PDU data alignment
        pub hpda: u8 => at(2),
        /// Header/data digest enable bits
        pub digest: u8 => at(3),
        /// Maximum outstanding R2T per command
        pub max_r2t: u32 => at(4),
    }
}

impl Pdu for IcReq {
    const PDU_TYPE: PduType = PduType::IcReq;
    const HEADER_LEN: usize = 120;
}

crate::wire_record! {
    /// Initialize connection response
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IcResp {
        /// PDU format version
        pub pfv: u16 => at(0),
        /// Controller PDU data alignment
        pub cpda: u8 => at(2),
        /// Header/data digest enable bits
        pub digest: u8 => at(3),
        /// Maximum host to controller data length
        pub max_h2c_data: u32 => at(4),
    }
}

impl Pdu for IcResp {
    const PDU_TYPE: PduType = PduType::IcResp;
    const HEADER_LEN: usize = 120;
}

crate::wire_record! {
    /// Controller to host data transfer header
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct C2hData {
        /// Command the data belongs to
        pub cccid: u16 => at(0),
        /// Offset of this segment in the command's data buffer
        pub data_offset: u32 => at(4),
        /// Length of this segment
        pub data_length: u32 => at(8),
    }
}

impl Pdu for C2hData {
    const PDU_TYPE: PduType = PduType::C2hData;
    const HEADER_LEN: usize = 16;
}

crate::wire_record! {
    /// Ready to transfer
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R2t {
        /// Command the transfer belongs to
        pub cccid: u16 => at(0),
        /// Transfer tag
        pub ttag: u16 => at(2),
        /// Requested offset
        pub r2t_offset: u32 => at(4),
        /// Requested length
        pub r2t_length: u32 => at(8),
    }
}

impl Pdu for R2t {
    const PDU_TYPE: PduType = PduType::R2t;
    const HEADER_LEN: usize = 16;
}

/// Fatal error status carried in a termination request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TerminationStatus {
    /// Invalid PDU header field
    InvalidHeaderField = 0x01,
    /// PDU sequence error
    PduSequenceError = 0x02,
    /// Header digest error
    HeaderDigestError = 0x03,
    /// Data transfer out of range
    DataTransferOutOfRange = 0x04,
    /// Data transfer limit exceeded
    DataTransferLimitExceeded = 0x05,
    /// Unsupported parameter
    UnsupportedParameter = 0x06,
}

crate::wire_record! {
    /// Host or controller termination request
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TermReq {
        /// Fatal error status
        pub fes: u16 => at(0),
        /// Fatal error information
        pub fei: u32 => at(2),
    }
}

impl Pdu for TermReq {
    const PDU_TYPE: PduType = PduType::C2hTermReq;
    const HEADER_LEN: usize = 16;
}

impl TermReq {
    /// Termination request with the given status
    pub fn new(status: TerminationStatus, info: u32) -> Self {
        Self {
            fes: status as u16,
            fei: info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireRecord;

    #[test]
    fn test_ic_resp_layout() {
        let resp = IcResp {
            pfv: PDU_FORMAT_VERSION,
            cpda: 0,
            digest: 0,
            max_h2c_data: super::super::MAX_H2C_DATA_LENGTH,
        };
        let bytes = resp.to_bytes().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0x00, 0x80, 0, 0]);
    }

    #[test]
    fn test_c2h_data_layout() {
        let header = C2hData {
            cccid: 0x0102,
            data_offset: 4096,
            data_length: 512,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..2], &[0x02, 0x01]);
        assert_eq!(&bytes[4..8], &4096u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &512u32.to_le_bytes());
    }

    #[test]
    fn test_term_req() {
        let term = TermReq::new(TerminationStatus::PduSequenceError, 7);
        let decoded = TermReq::decode(&term.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.fes, 2);
        assert_eq!(decoded.fei, 7);
    }
}
