//! Latency injecting null backend

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::null::NULL_TARGET_SIZE;
use super::{IoRequest, QueueError, Target};

/// Delay applied to every request unless configured otherwise
pub const DEFAULT_SLEEP: Duration = Duration::from_millis(5);

/// Null device that sleeps before completing each request
///
/// The sleep happens inside `queue`, so on its own the device serializes
/// its caller. Wrap it in a [`WorkQueue`](super::WorkQueue) for concurrency.
#[derive(Debug, Clone)]
pub struct SleepyTarget {
    size: u64,
    delay: Duration,
}

impl SleepyTarget {
    /// Sleepy device with the given per-request delay
    pub fn new(delay: Duration) -> Self {
        Self {
            size: NULL_TARGET_SIZE,
            delay,
        }
    }

    /// Per-request delay
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for SleepyTarget {
    fn default() -> Self {
        Self::new(DEFAULT_SLEEP)
    }
}

#[async_trait]
impl Target for SleepyTarget {
    async fn queue(&self, request: IoRequest) -> Result<(), QueueError> {
        sleep(self.delay).await;
        request.complete(Ok(()));
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::testing::{conformance, run};
    use crate::target::IoCommand;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleepy_target_delays() {
        let target = SleepyTarget::new(Duration::from_millis(20));
        conformance(&target).await;

        let started = Instant::now();
        let (result, _) = run(&target, IoCommand::Write, 0, Some(vec![1; 512]), 512).await;
        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
