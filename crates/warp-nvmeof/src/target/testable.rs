//! In-memory fault injection backend
//!
//! Behaves like [`MemoryTarget`](super::MemoryTarget) except that fixed LBA
//! regions fail reads, writes or both, every request sleeps first, and each
//! operation is counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::trace;

use super::memory::MemoryStore;
use super::{IoCommand, IoRequest, KeyValue, QueueError, Target, TargetError};
use crate::protocol::BLOCK_SIZE;

/// Default device size (1 GiB)
pub const DEFAULT_TESTABLE_SIZE: u64 = 1 << 30;

/// Default per-request delay
pub const DEFAULT_TESTABLE_SLEEP: Duration = Duration::from_millis(5);

/// LBA range with injected media failures (bounds inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaRegion {
    /// First LBA
    pub start: u64,
    /// Last LBA
    pub end: u64,
    /// Reads starting here fail
    pub fail_read: bool,
    /// Writes starting here fail
    pub fail_write: bool,
}

impl MediaRegion {
    fn contains(&self, lba: u64) -> bool {
        (self.start..=self.end).contains(&lba)
    }
}

/// Regions installed on every new [`TestableTarget`]
pub const DEFAULT_REGIONS: [MediaRegion; 3] = [
    MediaRegion {
        start: 1000,
        end: 1063,
        fail_read: false,
        fail_write: true,
    },
    MediaRegion {
        start: 1064,
        end: 1127,
        fail_read: true,
        fail_write: false,
    },
    MediaRegion {
        start: 1128,
        end: 1256,
        fail_read: true,
        fail_write: true,
    },
];

/// Snapshot of the operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestableCounters {
    pub reads: u64,
    pub writes: u64,
    pub zeroes: u64,
    pub trims: u64,
    pub flushes: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    zeroes: AtomicU64,
    trims: AtomicU64,
    flushes: AtomicU64,
}

/// Fault injecting in-memory device
pub struct TestableTarget {
    store: MemoryStore,
    delay: Duration,
    regions: Vec<MediaRegion>,
    counters: Counters,
}

impl TestableTarget {
    /// Device of `size` bytes sleeping `delay` per request
    pub fn new(size: usize, delay: Duration) -> Self {
        Self {
            store: MemoryStore::zeroed(size),
            delay,
            regions: DEFAULT_REGIONS.to_vec(),
            counters: Counters::default(),
        }
    }

    /// Replace the failure regions
    pub fn with_regions(mut self, regions: Vec<MediaRegion>) -> Self {
        self.regions = regions;
        self
    }

    /// Current operation counts
    pub fn counters(&self) -> TestableCounters {
        TestableCounters {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            zeroes: self.counters.zeroes.load(Ordering::Relaxed),
            trims: self.counters.trims.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
        }
    }

    fn region(&self, lba: u64) -> Option<&MediaRegion> {
        self.regions.iter().find(|r| r.contains(lba))
    }

    fn check(&self, request: &IoRequest) -> Result<(), TargetError> {
        let max_lba = self.store.len() / BLOCK_SIZE as u64;
        let blocks = (request.length / BLOCK_SIZE) as u64;
        // the last block is never addressable
        if request.lba.saturating_add(blocks) >= max_lba {
            return Err(TargetError::LbaOutOfRange);
        }

        let region = self.region(request.lba);
        let counter = match request.command {
            IoCommand::Read => {
                self.counters.reads.fetch_add(1, Ordering::Relaxed);
                if region.is_some_and(|r| r.fail_read) {
                    return Err(TargetError::Read);
                }
                return Ok(());
            }
            IoCommand::Write => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                if region.is_some_and(|r| r.fail_write) {
                    return Err(TargetError::Write);
                }
                return Ok(());
            }
            IoCommand::WriteZero => &self.counters.zeroes,
            IoCommand::Trim => &self.counters.trims,
            IoCommand::Flush => &self.counters.flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl Target for TestableTarget {
    async fn queue(&self, mut request: IoRequest) -> Result<(), QueueError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let result = self
            .check(&request)
            .and_then(|_| self.store.execute(&mut request));
        trace!(lba = request.lba, command = ?request.command, ?result, "testable request");
        request.complete(result);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.store.len()
    }

    fn runtime_details(&self) -> Vec<KeyValue> {
        let counters = self.counters();
        vec![
            KeyValue::new("ReadCount", counters.reads),
            KeyValue::new("WriteCount", counters.writes),
            KeyValue::new("ZeroCount", counters.zeroes),
            KeyValue::new("TrimCount", counters.trims),
            KeyValue::new("FlushCount", counters.flushes),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::testing::{conformance, run};

    fn target() -> TestableTarget {
        TestableTarget::new(1 << 20, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_testable_conformance() {
        conformance(&target()).await;
    }

    #[tokio::test]
    async fn test_failure_regions() {
        let target = target();

        let (result, _) = run(&target, IoCommand::Write, 1000, Some(vec![1; 512]), 512).await;
        assert_eq!(result, Err(TargetError::Write));
        let (result, _) = run(&target, IoCommand::Read, 1000, None, 512).await;
        assert!(result.is_ok());

        let (result, _) = run(&target, IoCommand::Read, 1064, None, 512).await;
        assert_eq!(result, Err(TargetError::Read));
        let (result, _) = run(&target, IoCommand::Write, 1127, Some(vec![1; 512]), 512).await;
        assert!(result.is_ok());

        let (read, _) = run(&target, IoCommand::Read, 1256, None, 512).await;
        let (write, _) = run(&target, IoCommand::Write, 1128, Some(vec![1; 512]), 512).await;
        assert_eq!(read, Err(TargetError::Read));
        assert_eq!(write, Err(TargetError::Write));

        let (result, _) = run(&target, IoCommand::Write, 1257, Some(vec![1; 512]), 512).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_last_block_is_out_of_range() {
        let target = target();
        let max_lba = (1 << 20) / 512;
        let (result, _) = run(&target, IoCommand::Read, max_lba - 1, None, 512).await;
        assert_eq!(result, Err(TargetError::LbaOutOfRange));
        let (result, _) = run(&target, IoCommand::Read, max_lba - 2, None, 512).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_counters() {
        let target = target();
        run(&target, IoCommand::Read, 1, None, 512).await;
        run(&target, IoCommand::Write, 1, Some(vec![0; 512]), 512).await;
        run(&target, IoCommand::Write, 2, Some(vec![0; 512]), 512).await;
        run(&target, IoCommand::WriteZero, 1, None, 512).await;
        run(&target, IoCommand::Trim, 1, None, 512).await;
        run(&target, IoCommand::Flush, 0, None, 0).await;

        assert_eq!(
            target.counters(),
            TestableCounters {
                reads: 1,
                writes: 2,
                zeroes: 1,
                trims: 1,
                flushes: 1,
            }
        );
        let details = target.runtime_details();
        assert_eq!(details[1], KeyValue::new("WriteCount", 2));
    }
}
