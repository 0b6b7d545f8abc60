//! Request slots recycled by a controller

use crate::buffers::PooledBuffer;
use crate::error::NvmeStatus;
use crate::protocol::{CapsuleCommand, CapsuleResponse};

/// Response being assembled for one command
#[derive(Default)]
pub(crate) struct NvmeResponse {
    /// Completion queue entry sent back to the host
    pub capsule: CapsuleResponse,
    /// Segments sent as C2HData ahead of the capsule
    pub data: Vec<PooledBuffer>,
    /// Suppress the capsule (asynchronous event requests)
    pub no_reply: bool,
}

/// One in-flight command and everything it holds
///
/// Slots live in the controller's request pool; a slot is back in the pool
/// only once its payload buffers have been released.
#[derive(Default)]
pub(crate) struct NvmeRequest {
    /// Command as received
    pub capsule: CapsuleCommand,
    /// In-capsule data, if any
    pub payload: Option<PooledBuffer>,
    /// Response under construction
    pub response: NvmeResponse,
}

impl NvmeRequest {
    /// Prepare a recycled slot for `capsule` received on `queue_id`
    pub fn reset(&mut self, capsule: CapsuleCommand, queue_id: u16) {
        self.payload = None;
        self.response.data.clear();
        self.response.no_reply = false;
        self.response.capsule.reset();
        self.response.capsule.cid = capsule.cid;
        self.response.capsule.queue_id = queue_id;
        self.capsule = capsule;
    }

    /// Set the completion status
    pub fn set_status(&mut self, status: NvmeStatus) {
        self.response.capsule.set_status(status);
    }

    /// Total bytes queued for C2HData
    pub fn data_len(&self) -> usize {
        self.response.data.iter().map(|b| b.len()).sum()
    }
}
