//! PDU framing over a byte stream
//!
//! [`PduReader`] pulls one PDU apart in three steps: the 8-byte common
//! header ([`PduReader::dequeue`]), the type specific header
//! ([`PduReader::receive`]) and the optional data segment
//! ([`PduReader::receive_data`]). [`PduWriter`] stages a header and optional
//! payload, then [`PduWriter::flush`] writes them back to back.
//!
//! Neither half locks: the owner of a writer must serialize all writes on a
//! connection.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::WireRecord;
use crate::error::{NvmeOfError, NvmeOfResult};
use crate::protocol::header::{CommonHeader, Pdu, COMMON_HEADER_SIZE};
use crate::protocol::MAX_HEADER_SIZE;

/// Reading half of a PDU stream
pub struct PduReader<R> {
    inner: R,
    header: CommonHeader,
    scratch: [u8; MAX_HEADER_SIZE],
}

impl<R: AsyncRead + Unpin> PduReader<R> {
    /// Wrap a byte stream
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            header: CommonHeader::default(),
            scratch: [0u8; MAX_HEADER_SIZE],
        }
    }

    /// Wait for the next common header
    ///
    /// EOF and I/O errors are returned as [`NvmeOfError::Io`]; a header that
    /// breaks the framing rules is a [`NvmeOfError::Protocol`] error.
    pub async fn dequeue(&mut self) -> NvmeOfResult<CommonHeader> {
        let raw = &mut self.scratch[..COMMON_HEADER_SIZE];
        self.inner.read_exact(raw).await?;
        let header = CommonHeader::decode(raw)?;
        if !header.is_well_formed() {
            return Err(NvmeOfError::Protocol(format!(
                "malformed PDU header: {:?}",
                header
            )));
        }
        trace!(
            pdu_type = header.pdu_type,
            hlen = header.header_length,
            pdo = header.data_offset,
            plen = header.data_length,
            "dequeued PDU"
        );
        self.header = header;
        Ok(header)
    }

    /// Header returned by the last [`dequeue`](Self::dequeue)
    pub fn header(&self) -> &CommonHeader {
        &self.header
    }

    /// Read and decode the type specific header, then skip any padding
    /// before the data segment
    pub async fn receive<P: WireRecord>(&mut self) -> NvmeOfResult<P> {
        let len = self.header.header_length as usize - COMMON_HEADER_SIZE;
        let raw = &mut self.scratch[..len];
        self.inner.read_exact(raw).await?;
        let record = P::decode(raw)?;

        if self.header.has_data() {
            let padding = self.header.data_offset as usize - self.header.header_length as usize;
            if padding > 0 {
                self.skip(padding).await?;
            }
        }
        Ok(record)
    }

    /// Read exactly `buf.len()` bytes of the data segment
    pub async fn receive_data(&mut self, buf: &mut [u8]) -> NvmeOfResult<()> {
        self.inner.read_exact(buf).await?;
        Ok(())
    }

    /// Length of the current PDU's data segment
    pub fn length(&self) -> usize {
        self.header.payload_length()
    }

    /// Discard `len` bytes of the stream
    pub async fn skip(&mut self, len: usize) -> NvmeOfResult<()> {
        let copied =
            tokio::io::copy(&mut (&mut self.inner).take(len as u64), &mut tokio::io::sink())
                .await?;
        if copied != len as u64 {
            return Err(NvmeOfError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(())
    }
}

/// Writing half of a PDU stream
pub struct PduWriter<W> {
    inner: W,
    header: BytesMut,
    payload: BytesMut,
}

impl<W: AsyncWrite + Unpin> PduWriter<W> {
    /// Wrap a byte stream
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            header: BytesMut::with_capacity(MAX_HEADER_SIZE),
            payload: BytesMut::new(),
        }
    }

    /// Stage a header-only PDU
    pub fn send<P: Pdu>(&mut self, record: &P) -> NvmeOfResult<()> {
        self.stage(record, 0, &[])
    }

    /// Stage a PDU with a data segment
    pub fn marshal_with_data<P: Pdu>(
        &mut self,
        record: &P,
        flags: u8,
        data: &[u8],
    ) -> NvmeOfResult<()> {
        self.stage(record, flags, data)
    }

    fn stage<P: Pdu>(&mut self, record: &P, flags: u8, data: &[u8]) -> NvmeOfResult<()> {
        let hlen = P::HEADER_LEN + COMMON_HEADER_SIZE;
        if hlen > MAX_HEADER_SIZE {
            return Err(NvmeOfError::Protocol(format!("header of {} bytes too large", hlen)));
        }
        let total = hlen + data.len();
        let data_length = u32::try_from(total).map_err(|_| {
            NvmeOfError::Protocol(format!("PDU of {} bytes exceeds PLEN", total))
        })?;

        let common = CommonHeader {
            pdu_type: P::PDU_TYPE as u8,
            flags,
            header_length: hlen as u8,
            data_offset: if data.is_empty() { 0 } else { hlen as u8 },
            data_length,
        };

        self.header.clear();
        self.header.resize(hlen, 0);
        common.encode_into(&mut self.header[..COMMON_HEADER_SIZE])?;
        record.encode_into(&mut self.header[COMMON_HEADER_SIZE..])?;

        self.payload.clear();
        self.payload.put_slice(data);
        Ok(())
    }

    /// Write the staged header, then the staged payload
    pub async fn flush(&mut self) -> NvmeOfResult<()> {
        self.inner.write_all(&self.header).await?;
        if !self.payload.is_empty() {
            self.inner.write_all(&self.payload).await?;
        }
        self.inner.flush().await?;
        self.header.clear();
        self.payload.clear();
        Ok(())
    }

    /// Stage and flush a header-only PDU
    pub async fn write_pdu<P: Pdu>(&mut self, record: &P) -> NvmeOfResult<()> {
        self.send(record)?;
        self.flush().await
    }

    /// Shut down the write direction
    pub async fn shutdown(&mut self) -> NvmeOfResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::C2H_DATA_LAST;
    use crate::protocol::{C2hData, CapsuleCommand, CapsuleResponse, IoOpcode, PduType};

    #[tokio::test]
    async fn test_header_only_pdu() {
        let mut wire = Vec::new();
        let mut writer = PduWriter::new(&mut wire);
        let resp = CapsuleResponse {
            cid: 42,
            ..Default::default()
        };
        writer.write_pdu(&resp).await.unwrap();
        drop(writer);

        assert_eq!(wire.len(), 24);
        assert_eq!(&wire[..8], &[5, 0, 24, 0, 24, 0, 0, 0]);

        let mut reader = PduReader::new(&wire[..]);
        let header = reader.dequeue().await.unwrap();
        assert_eq!(header.kind(), Some(PduType::CapsuleResp));
        assert_eq!(reader.length(), 0);
        let decoded: CapsuleResponse = reader.receive().await.unwrap();
        assert_eq!(decoded.cid, 42);
    }

    #[tokio::test]
    async fn test_pdu_with_data() {
        let mut wire = Vec::new();
        let mut writer = PduWriter::new(&mut wire);
        let header = C2hData {
            cccid: 3,
            data_offset: 0,
            data_length: 512,
        };
        writer
            .marshal_with_data(&header, C2H_DATA_LAST, &[0x55; 512])
            .unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        assert_eq!(wire.len(), 24 + 512);
        assert_eq!(wire[1], C2H_DATA_LAST);
        assert_eq!(wire[3], 24);

        let mut reader = PduReader::new(&wire[..]);
        reader.dequeue().await.unwrap();
        assert_eq!(reader.length(), 512);
        let decoded: C2hData = reader.receive().await.unwrap();
        assert_eq!(decoded.cccid, 3);
        let mut data = vec![0u8; reader.length()];
        reader.receive_data(&mut data).await.unwrap();
        assert!(data.iter().all(|&b| b == 0x55));
    }

    #[tokio::test]
    async fn test_padding_before_data_is_skipped() {
        let mut cmd = CapsuleCommand::io(IoOpcode::Write, 0, 1);
        cmd.cid = 1;
        let mut wire = vec![4, 0, 72, 80, 0, 0, 0, 0];
        wire[4..8].copy_from_slice(&(80u32 + 4).to_le_bytes());
        wire.extend_from_slice(&cmd.to_bytes().unwrap());
        wire.extend_from_slice(&[0xEE; 8]);
        wire.extend_from_slice(&[1, 2, 3, 4]);

        let mut reader = PduReader::new(&wire[..]);
        reader.dequeue().await.unwrap();
        assert_eq!(reader.length(), 4);
        let decoded: CapsuleCommand = reader.receive().await.unwrap();
        assert_eq!(decoded, cmd);
        let mut data = [0u8; 4];
        reader.receive_data(&mut data).await.unwrap();
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_eof_is_an_error() {
        let wire = [4u8, 0, 72];
        let mut reader = PduReader::new(&wire[..]);
        assert!(matches!(reader.dequeue().await, Err(NvmeOfError::Io(_))));
    }

    #[tokio::test]
    async fn test_malformed_header_is_rejected() {
        let wire = [4u8, 0, 200, 0, 200, 0, 0, 0];
        let mut reader = PduReader::new(&wire[..]);
        assert!(matches!(reader.dequeue().await, Err(NvmeOfError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_flags_do_not_leak_between_pdus() {
        let mut wire = Vec::new();
        let mut writer = PduWriter::new(&mut wire);
        writer
            .marshal_with_data(&C2hData::default(), C2H_DATA_LAST, &[1])
            .unwrap();
        writer.flush().await.unwrap();
        writer.write_pdu(&CapsuleResponse::default()).await.unwrap();
        drop(writer);

        assert_eq!(wire[25 + 1], 0);
    }
}
