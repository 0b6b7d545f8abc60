//! Bounded request queue in front of a backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{IoRequest, KeyValue, QueueError, Target, TargetError};

/// Queue depth and worker count used by the factory
pub const DEFAULT_WORK_QUEUE_DEPTH: usize = 8;

struct Shared {
    receiver: tokio::sync::Mutex<mpsc::Receiver<IoRequest>>,
    closing: AtomicBool,
}

/// Runs requests for an inner target on a fixed set of worker tasks
///
/// `queue` waits while the queue is full. After `close` every request still
/// queued is completed with [`TargetError::Aborted`] and the inner target is
/// closed.
pub struct WorkQueue {
    inner: Arc<dyn Target>,
    sender: Mutex<Option<mpsc::Sender<IoRequest>>>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkQueue {
    /// Queue of [`DEFAULT_WORK_QUEUE_DEPTH`] in front of `inner`
    pub fn new(inner: Arc<dyn Target>) -> Self {
        Self::with_depth(inner, DEFAULT_WORK_QUEUE_DEPTH)
    }

    /// Queue holding `depth` requests, drained by `depth` workers
    pub fn with_depth(inner: Arc<dyn Target>, depth: usize) -> Self {
        let depth = depth.max(1);
        let (sender, receiver) = mpsc::channel(depth);
        Self {
            inner,
            sender: Mutex::new(Some(sender)),
            shared: Arc::new(Shared {
                receiver: tokio::sync::Mutex::new(receiver),
                closing: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
            worker_count: depth,
        }
    }

    /// The wrapped target
    pub fn inner(&self) -> &Arc<dyn Target> {
        &self.inner
    }

    async fn work(id: usize, shared: Arc<Shared>, inner: Arc<dyn Target>) {
        loop {
            let next = shared.receiver.lock().await.recv().await;
            let Some(request) = next else {
                trace!(worker = id, "work queue worker exiting");
                return;
            };
            if shared.closing.load(Ordering::Acquire) {
                debug!(worker = id, "draining queued request");
                request.complete(Err(TargetError::Aborted));
                continue;
            }
            if let Err(rejected) = inner.queue(request).await {
                rejected.complete();
            }
        }
    }
}

#[async_trait]
impl Target for WorkQueue {
    async fn start(&self) -> Result<(), TargetError> {
        self.inner.start().await?;
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }
        for id in 0..self.worker_count {
            let shared = Arc::clone(&self.shared);
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(Self::work(id, shared, inner)));
        }
        Ok(())
    }

    async fn queue(&self, request: IoRequest) -> Result<(), QueueError> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(QueueError {
                error: TargetError::Aborted,
                request,
            });
        };
        sender.send(request).await.map_err(|err| QueueError {
            error: TargetError::Aborted,
            request: err.0,
        })
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    async fn close(&self) {
        self.shared.closing.store(true, Ordering::Release);
        drop(self.sender.lock().take());

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            // never started: drain here
            let mut receiver = self.shared.receiver.lock().await;
            receiver.close();
            while let Some(request) = receiver.recv().await {
                request.complete(Err(TargetError::Aborted));
            }
        }
        for worker in workers {
            let _ = worker.await;
        }
        self.inner.close().await;
    }

    fn runtime_details(&self) -> Vec<KeyValue> {
        self.inner.runtime_details()
    }
}
