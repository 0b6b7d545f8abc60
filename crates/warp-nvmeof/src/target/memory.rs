//! RAM backed device

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{gather, scatter, IoCommand, IoRequest, KeyValue, QueueError, Target, TargetError};

/// Byte array shared by the in-memory backends
pub(crate) struct MemoryStore {
    data: RwLock<Vec<u8>>,
}

impl MemoryStore {
    pub(crate) fn zeroed(size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u8; size]),
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    /// Run `request` against the store
    pub(crate) fn execute(&self, request: &mut IoRequest) -> Result<(), TargetError> {
        if request.command == IoCommand::Flush {
            return Ok(());
        }
        let range = request.byte_range(self.len())?;
        let (start, end) = (range.start as usize, range.end as usize);
        match request.command {
            IoCommand::Read => {
                let data = self.data.read();
                scatter(&data[start..end], &mut request.sgl)
            }
            IoCommand::Write => {
                let mut data = self.data.write();
                gather(&mut data[start..end], &request.sgl)
            }
            IoCommand::Trim | IoCommand::WriteZero => {
                self.data.write()[start..end].fill(0);
                Ok(())
            }
            IoCommand::Flush => Ok(()),
        }
    }
}

/// Device held entirely in memory; contents are lost on drop
pub struct MemoryTarget {
    store: MemoryStore,
}

impl MemoryTarget {
    /// Zero-filled device of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            store: MemoryStore::zeroed(size),
        }
    }
}

#[async_trait]
impl Target for MemoryTarget {
    async fn queue(&self, mut request: IoRequest) -> Result<(), QueueError> {
        let result = self.store.execute(&mut request);
        request.complete(result);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.store.len()
    }

    fn runtime_details(&self) -> Vec<KeyValue> {
        vec![KeyValue::new("Size", self.store.len())]
    }
}
