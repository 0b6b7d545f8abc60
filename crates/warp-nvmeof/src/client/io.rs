//! I/O queue: block reads and writes over a pool of reusable descriptors

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::buffers::{Pool, Pooled};
use crate::error::{NvmeOfError, NvmeOfResult};
use crate::protocol::{CapsuleCommand, IoOpcode, BLOCK_SIZE, DEALLOCATE_BIT};

use super::queue::Queue;

/// Most blocks a single command can address (NLB is a zero based u16)
const MAX_BLOCKS_PER_COMMAND: u64 = 1 << 16;

/// Reusable per-command state
#[derive(Default)]
struct IoDescriptor {
    /// Staging buffer for outgoing write data
    staging: BytesMut,
    /// Landing buffer for read data
    landing: Vec<u8>,
}

/// A connected I/O queue
///
/// Every call holds one descriptor for its whole round trip, so the number
/// of descriptors bounds the commands in flight on this queue.
pub struct IoQueue {
    queue: Queue,
    descriptors: Pool<IoDescriptor>,
    max_transfer: usize,
}

impl IoQueue {
    pub(crate) fn new(queue: Queue, descriptors: usize, max_transfer: usize) -> Self {
        Self {
            queue,
            descriptors: Pool::with_items(descriptors.max(1), IoDescriptor::default),
            max_transfer,
        }
    }

    /// Queue identifier
    pub fn id(&self) -> u16 {
        self.queue.id()
    }

    /// Descriptors not currently in use
    pub fn available_descriptors(&self) -> usize {
        self.descriptors.available()
    }

    /// Read `buf.len()` bytes starting at `lba`
    pub async fn read(&self, lba: u64, buf: &mut [u8]) -> NvmeOfResult<()> {
        let blocks = self.transfer_blocks(buf.len())?;
        let mut descriptor = self.descriptors.acquire().await?;

        let mut landing = std::mem::take(&mut descriptor.landing);
        landing.clear();
        landing.resize(buf.len(), 0);

        trace!("Read lba={}, blocks={}", lba, blocks);
        let capsule = CapsuleCommand::io(IoOpcode::Read, lba, blocks);
        let completion = self.queue.submit(capsule, None, landing).await?;
        buf.copy_from_slice(&completion.data[..buf.len()]);
        descriptor.landing = completion.data;
        Ok(())
    }

    /// Write `data` starting at `lba`
    pub async fn write(&self, lba: u64, data: &[u8]) -> NvmeOfResult<()> {
        let blocks = self.transfer_blocks(data.len())?;
        let mut descriptor = self.descriptors.acquire().await?;
        let payload = stage(&mut descriptor, data);

        trace!("Write lba={}, blocks={}", lba, blocks);
        let capsule = CapsuleCommand::io(IoOpcode::Write, lba, blocks);
        self.queue.submit(capsule, Some(payload), Vec::new()).await?;
        Ok(())
    }

    /// Zero `count` blocks starting at `lba`
    pub async fn write_zeroes(&self, lba: u64, count: u32) -> NvmeOfResult<()> {
        let capsule = CapsuleCommand::io(IoOpcode::WriteZeroes, lba, block_count(count)?);
        self.simple(capsule).await
    }

    /// Deallocate `count` blocks starting at `lba`
    pub async fn trim(&self, lba: u64, count: u32) -> NvmeOfResult<()> {
        let mut capsule = CapsuleCommand::io(IoOpcode::WriteZeroes, lba, block_count(count)?);
        capsule.d12 |= DEALLOCATE_BIT;
        self.simple(capsule).await
    }

    pub async fn flush(&self) -> NvmeOfResult<()> {
        self.simple(CapsuleCommand::new(IoOpcode::Flush as u8)).await
    }

    async fn simple(&self, capsule: CapsuleCommand) -> NvmeOfResult<()> {
        let _descriptor = self.descriptors.acquire().await?;
        self.queue.submit(capsule, None, Vec::new()).await?;
        Ok(())
    }

    fn transfer_blocks(&self, len: usize) -> NvmeOfResult<u32> {
        if len == 0 || len % BLOCK_SIZE as usize != 0 {
            return Err(NvmeOfError::InvalidParameter(format!(
                "transfer of {} bytes is not a positive multiple of {}",
                len, BLOCK_SIZE
            )));
        }
        if len > self.max_transfer {
            return Err(NvmeOfError::InvalidParameter(format!(
                "transfer of {} bytes exceeds limit of {}",
                len, self.max_transfer
            )));
        }
        block_count((len / BLOCK_SIZE as usize) as u32)
    }

    pub(crate) async fn close(&self) {
        self.queue.close().await;
    }
}

fn block_count(count: u32) -> NvmeOfResult<u32> {
    if count == 0 || u64::from(count) > MAX_BLOCKS_PER_COMMAND {
        return Err(NvmeOfError::InvalidParameter(format!(
            "block count {} out of range 1..={}",
            count, MAX_BLOCKS_PER_COMMAND
        )));
    }
    Ok(count)
}

/// Copy `data` into the descriptor's staging buffer and freeze it
fn stage(descriptor: &mut Pooled<IoDescriptor>, data: &[u8]) -> Bytes {
    descriptor.staging.clear();
    descriptor.staging.extend_from_slice(data);
    descriptor.staging.split().freeze()
}
