//! Null backend: a very large device that stores nothing

use async_trait::async_trait;

use super::{IoRequest, QueueError, Target};

/// Default null device size (1 TiB)
pub const NULL_TARGET_SIZE: u64 = 1 << 40;

/// Completes every request successfully without touching data
#[derive(Debug, Clone)]
pub struct NullTarget {
    size: u64,
}

impl NullTarget {
    /// Null device of [`NULL_TARGET_SIZE`] bytes
    pub fn new() -> Self {
        Self {
            size: NULL_TARGET_SIZE,
        }
    }
}

impl Default for NullTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Target for NullTarget {
    async fn queue(&self, request: IoRequest) -> Result<(), QueueError> {
        request.complete(Ok(()));
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
