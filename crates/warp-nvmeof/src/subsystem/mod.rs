//! NVMe-oF subsystems
//!
//! A controller is bound to exactly one [`Subsystem`] at a time: the
//! [`InitSubsystem`] until Connect succeeds, then whatever the host named.
//! Subsystems build identify and log page payloads and route block I/O to
//! their backend.

use std::fmt;

use async_trait::async_trait;

use crate::error::NvmeOfResult;
use crate::target::{IoRequest, KeyValue, QueueError};

pub mod discovery;
pub mod init;
pub mod target;

pub use discovery::{DiscoveryDirectory, DiscoverySubsystem};
pub use init::InitSubsystem;
pub use target::TargetSubsystem;

/// Flavor of a subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemKind {
    /// Placeholder bound before Connect
    Init,
    /// Discovery service
    Discovery,
    /// Storage backed NVM subsystem
    Nvm,
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Discovery => write!(f, "discovery"),
            Self::Nvm => write!(f, "nvm"),
        }
    }
}

/// What a controller needs from the subsystem it serves
#[async_trait]
pub trait Subsystem: Send + Sync {
    /// Subsystem NQN
    fn nqn(&self) -> &str;

    /// Subsystem flavor
    fn kind(&self) -> SubsystemKind;

    /// Identify payload for `cns`, as seen by controller `cntlid`
    fn identify(&self, cntlid: u16, cns: u8) -> NvmeOfResult<Vec<u8>>;

    /// Complete log page `page_id`
    ///
    /// An empty page is returned as an empty vector.
    fn log_page(&self, page_id: u8) -> NvmeOfResult<Vec<u8>>;

    /// `length` bytes of log page `page_id` starting at byte `offset`,
    /// zero padded past the end of the page
    fn get_log_page(&self, page_id: u8, offset: u64, length: usize) -> NvmeOfResult<Vec<u8>> {
        let page = self.log_page(page_id)?;
        Ok(slice_page(&page, offset, length))
    }

    /// Hand an I/O request to the backend; it completes asynchronously
    async fn queue_io(&self, request: IoRequest) -> Result<(), QueueError>;

    /// Run an I/O request; same contract as [`queue_io`](Self::queue_io)
    async fn handle_io(&self, request: IoRequest) -> Result<(), QueueError> {
        self.queue_io(request).await
    }

    /// Backend details for management output
    fn runtime_details(&self) -> Vec<KeyValue> {
        Vec::new()
    }

    /// Release the backend once no controller uses the subsystem
    async fn close(&self) {}
}

/// Window `[offset, offset + length)` of `page`, zero padded to `length`
pub fn slice_page(page: &[u8], offset: u64, length: usize) -> Vec<u8> {
    let mut out = vec![0u8; length];
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    if start < page.len() {
        let end = page.len().min(start.saturating_add(length));
        out[..end - start].copy_from_slice(&page[start..end]);
    }
    out
}
