//! NVM command set: block I/O routed to the bound subsystem

use tracing::{debug, trace};

use super::{Controller, Slot};
use crate::error::{NvmeOfResult, NvmeStatus};
use crate::protocol::{IoOpcode, BLOCK_SIZE};
use crate::target::{IoCommand, IoRequest};

impl Controller {
    /// Turn an I/O capsule into an [`IoRequest`] and queue it
    ///
    /// The slot travels inside the request's completion callback and is
    /// queued for the completion task from whatever task completes it.
    pub(super) async fn dispatch_io(&mut self, mut slot: Slot) -> NvmeOfResult<()> {
        self.stamp(&mut slot);
        let opcode = slot.capsule.opcode;
        let lba = slot.capsule.lba();
        let length = slot.capsule.block_count() * BLOCK_SIZE;

        let request = match IoOpcode::from_raw(opcode) {
            Some(IoOpcode::Flush) => IoRequest::new(IoCommand::Flush, 0, 0),
            Some(IoOpcode::Read) => {
                if length as usize > self.buffers.buffer_size() {
                    debug!("Read of {} bytes exceeds buffer size", length);
                    slot.set_status(NvmeStatus::InvalidField);
                    self.finish(slot);
                    return Ok(());
                }
                let buffer = self.buffers.get(length as usize).await?;
                IoRequest::new(IoCommand::Read, lba, length).with_buffer(buffer)
            }
            Some(IoOpcode::Write) => match slot.payload.take() {
                Some(payload) if payload.len() == length as usize => {
                    IoRequest::new(IoCommand::Write, lba, length).with_buffer(payload)
                }
                payload => {
                    // anything short of the full in-capsule payload would need R2T
                    debug!(
                        "Write of {} bytes carried {} in capsule",
                        length,
                        payload.as_ref().map_or(0, |p| p.len())
                    );
                    drop(payload);
                    slot.set_status(NvmeStatus::DataSglLengthInvalid);
                    self.finish(slot);
                    return Ok(());
                }
            },
            Some(IoOpcode::WriteZeroes) => {
                let command = if slot.capsule.deallocate() {
                    IoCommand::Trim
                } else {
                    IoCommand::WriteZero
                };
                IoRequest::new(command, lba, length)
            }
            Some(IoOpcode::DatasetManagement) => {
                self.finish(slot);
                return Ok(());
            }
            None => {
                debug!("Unsupported I/O opcode {:#04x}", opcode);
                slot.set_status(NvmeStatus::InvalidOpcode);
                self.finish(slot);
                return Ok(());
            }
        };

        trace!(
            "Queue {:?}: lba={}, length={}, cid={}",
            request.command,
            lba,
            length,
            slot.capsule.cid
        );

        let completions = self.completions.clone();
        let request = request.on_complete(move |mut io, result| {
            let mut slot = slot;
            match result {
                Ok(()) if io.command == IoCommand::Read => {
                    slot.response.data = std::mem::take(&mut io.sgl);
                }
                Ok(()) => {}
                Err(e) => slot.set_status(NvmeStatus::from(e)),
            }
            // buffers go back before the slot does
            drop(io);
            let _ = completions.send(slot);
        });

        if let Err(rejected) = self.subsystem.queue_io(request).await {
            debug!("I/O rejected: {}", rejected.error);
            rejected.complete();
        }
        Ok(())
    }
}
