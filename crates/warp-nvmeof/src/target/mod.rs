//! Block storage backends
//!
//! A [`Target`] serves byte-range reads, writes, trims and flushes described
//! by an [`IoRequest`]. Every request carries a completion callback that
//! fires exactly once: either when the backend calls
//! [`IoRequest::complete`], or with [`TargetError::Aborted`] if the request
//! is dropped without being completed.

use std::fmt;
use std::ops::Range;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffers::PooledBuffer;
use crate::protocol::BLOCK_SIZE;

pub mod factory;
pub mod file;
pub mod memory;
pub mod null;
pub mod options;
pub mod sleepy;
pub mod testable;
pub mod work_queue;

pub use factory::TargetFactory;
pub use file::FileTarget;
pub use memory::MemoryTarget;
pub use null::NullTarget;
pub use options::TargetOptions;
pub use sleepy::SleepyTarget;
pub use testable::TestableTarget;
pub use work_queue::WorkQueue;

/// Backend failure reported through an I/O completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum TargetError {
    /// Command not supported by this backend
    #[error("operation not supported")]
    Unsupported,
    /// Request aborted before it ran
    #[error("request aborted")]
    Aborted,
    /// Range falls outside the device
    #[error("lba out of range")]
    LbaOutOfRange,
    /// Media write failure
    #[error("write failed")]
    Write,
    /// Media read failure
    #[error("read failed")]
    Read,
    /// Anything else
    #[error("internal target error")]
    Internal,
}

/// Operation requested from a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoCommand {
    /// Fill the scatter list from the device
    Read,
    /// Store the scatter list on the device
    Write,
    /// Deallocate the range; reads return zeros afterwards
    Trim,
    /// Write zeros over the range
    WriteZero,
    /// Make prior writes durable
    Flush,
}

/// Completion callback of an [`IoRequest`]
pub type IoCompleter = Box<dyn FnOnce(IoRequest, Result<(), TargetError>) + Send + 'static>;

/// One block I/O handed to a backend
pub struct IoRequest {
    /// Operation
    pub command: IoCommand,
    /// First logical block
    pub lba: u64,
    /// Length in bytes
    pub length: u32,
    /// Scatter-gather list of data buffers
    pub sgl: Vec<PooledBuffer>,
    completer: Option<IoCompleter>,
}

impl IoRequest {
    /// Request without buffers or completion callback
    pub fn new(command: IoCommand, lba: u64, length: u32) -> Self {
        Self {
            command,
            lba,
            length,
            sgl: Vec::new(),
            completer: None,
        }
    }

    /// Append a buffer to the scatter-gather list
    pub fn with_buffer(mut self, buffer: PooledBuffer) -> Self {
        self.sgl.push(buffer);
        self
    }

    /// Set the completion callback
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(IoRequest, Result<(), TargetError>) + Send + 'static,
    {
        self.completer = Some(Box::new(f));
        self
    }

    /// Byte offset of the first block
    pub fn byte_offset(&self) -> u64 {
        self.lba.saturating_mul(BLOCK_SIZE as u64)
    }

    /// Byte range on a device of `device_size` bytes
    pub fn byte_range(&self, device_size: u64) -> Result<Range<u64>, TargetError> {
        let start = self
            .lba
            .checked_mul(BLOCK_SIZE as u64)
            .ok_or(TargetError::LbaOutOfRange)?;
        let end = start
            .checked_add(self.length as u64)
            .ok_or(TargetError::LbaOutOfRange)?;
        if end > device_size {
            return Err(TargetError::LbaOutOfRange);
        }
        Ok(start..end)
    }

    /// Total bytes held by the scatter-gather list
    pub fn sgl_len(&self) -> usize {
        self.sgl.iter().map(|b| b.len()).sum()
    }

    /// Finish the request, running its callback
    pub fn complete(mut self, result: Result<(), TargetError>) {
        if let Some(completer) = self.completer.take() {
            completer(self, result);
        }
    }
}

impl Drop for IoRequest {
    fn drop(&mut self) {
        if let Some(completer) = self.completer.take() {
            let orphan = IoRequest {
                command: self.command,
                lba: self.lba,
                length: self.length,
                sgl: std::mem::take(&mut self.sgl),
                completer: None,
            };
            completer(orphan, Err(TargetError::Aborted));
        }
    }
}

impl fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoRequest")
            .field("command", &self.command)
            .field("lba", &self.lba)
            .field("length", &self.length)
            .field("segments", &self.sgl.len())
            .finish()
    }
}

/// A request a backend refused to take
///
/// The request is handed back so the caller decides how to complete it.
#[derive(Debug, Error)]
#[error("request rejected: {error}")]
pub struct QueueError {
    /// Why the request was refused
    pub error: TargetError,
    /// The untouched request
    pub request: IoRequest,
}

impl QueueError {
    /// Complete the returned request with the rejection error
    pub fn complete(self) {
        self.request.complete(Err(self.error));
    }
}

/// Key/value pair describing a backend at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Name
    pub key: String,
    /// Value
    pub value: String,
}

impl KeyValue {
    /// Create a pair
    pub fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

/// Block storage backend
#[async_trait]
pub trait Target: Send + Sync {
    /// Prepare the backend (spawn workers, open resources)
    async fn start(&self) -> Result<(), TargetError> {
        Ok(())
    }

    /// Accept a request; it is completed through its callback
    async fn queue(&self, request: IoRequest) -> Result<(), QueueError>;

    /// Device size in bytes
    fn size(&self) -> u64;

    /// Stop the backend; queued requests are aborted
    async fn close(&self) {}

    /// Backend specific details for management output
    fn runtime_details(&self) -> Vec<KeyValue> {
        Vec::new()
    }
}

/// Copy `src` into the scatter list, segment after segment
pub(crate) fn scatter(src: &[u8], sgl: &mut [PooledBuffer]) -> Result<(), TargetError> {
    let mut offset = 0;
    for segment in sgl.iter_mut() {
        let end = offset + segment.len();
        let chunk = src.get(offset..end).ok_or(TargetError::Read)?;
        segment.copy_from_slice(chunk);
        offset = end;
    }
    Ok(())
}

/// Copy the scatter list into `dst`, segment after segment
pub(crate) fn gather(dst: &mut [u8], sgl: &[PooledBuffer]) -> Result<(), TargetError> {
    let mut offset = 0;
    for segment in sgl {
        let end = offset + segment.len();
        let chunk = dst.get_mut(offset..end).ok_or(TargetError::Write)?;
        chunk.copy_from_slice(segment);
        offset = end;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for driving a target from unit tests

    use super::*;
    use crate::buffers::Pooled;
    use tokio::sync::oneshot;

    /// Queue a request and wait for its completion
    pub async fn run(
        target: &dyn Target,
        command: IoCommand,
        lba: u64,
        data: Option<Vec<u8>>,
        length: u32,
    ) -> (Result<(), TargetError>, Option<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        let mut request = IoRequest::new(command, lba, length).on_complete(move |req, result| {
            let data = req.sgl.first().map(|b| b.to_vec());
            let _ = tx.send((result, data));
        });
        match (command, data) {
            (_, Some(data)) => request = request.with_buffer(Pooled::standalone(data)),
            (IoCommand::Read, None) => {
                request = request.with_buffer(Pooled::standalone(vec![0u8; length as usize]))
            }
            _ => {}
        }
        if let Err(rejected) = target.queue(request).await {
            rejected.complete();
        }
        rx.await.unwrap()
    }

    /// Checks every backend must pass: starts, has a size, flushes
    pub async fn conformance(target: &dyn Target) {
        target.start().await.unwrap();
        assert_ne!(target.size(), 0);
        let (result, _) = run(target, IoCommand::Flush, 0, None, 0).await;
        assert_eq!(result, Ok(()));
    }
}
