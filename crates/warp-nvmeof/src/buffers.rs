//! Bounded pools of reusable objects
//!
//! A [`Pool`] hands out a fixed set of pre-allocated items. Taking an item
//! from an exhausted pool waits until another holder drops theirs; this is the
//! backpressure both the controller (payload buffers) and the client (I/O
//! descriptors) rely on. A [`Pooled`] guard returns its item on drop, so every
//! completion path, error paths included, gives the item back exactly once.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{NvmeOfError, NvmeOfResult};

struct PoolInner<T> {
    items: Mutex<Vec<T>>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// Fixed-capacity pool of reusable items
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Pool<T> {
    /// Create a pool holding `count` items built by `make`
    pub fn with_items(count: usize, make: impl FnMut() -> T) -> Self {
        let items: Vec<T> = std::iter::repeat_with(make).take(count).collect();
        Self {
            inner: Arc::new(PoolInner {
                items: Mutex::new(items),
                permits: Arc::new(Semaphore::new(count)),
                capacity: count,
            }),
        }
    }

    /// Take an item, waiting while the pool is exhausted
    pub async fn acquire(&self) -> NvmeOfResult<Pooled<T>> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| NvmeOfError::Internal("pool closed".into()))?;
        self.take(permit)
    }

    /// Take an item if one is available right now
    pub fn try_acquire(&self) -> Option<Pooled<T>> {
        let permit = Arc::clone(&self.inner.permits).try_acquire_owned().ok()?;
        self.take(permit).ok()
    }

    fn take(&self, permit: OwnedSemaphorePermit) -> NvmeOfResult<Pooled<T>> {
        let item = self
            .inner
            .items
            .lock()
            .pop()
            .ok_or_else(|| NvmeOfError::Internal("pool permit without item".into()))?;
        Ok(Pooled {
            item: Some(item),
            home: Some((Arc::clone(&self.inner), permit)),
        })
    }

    /// Wait until every item is back in the pool
    pub async fn wait_idle(&self) -> NvmeOfResult<()> {
        let all = u32::try_from(self.inner.capacity)
            .map_err(|_| NvmeOfError::Internal("pool too large to drain".into()))?;
        let _permits = self
            .inner
            .permits
            .acquire_many(all)
            .await
            .map_err(|_| NvmeOfError::Internal("pool closed".into()))?;
        Ok(())
    }

    /// Items currently available
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Total items owned by the pool
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// An item checked out of a [`Pool`]
///
/// Dropping the guard puts the item back and wakes one waiter.
pub struct Pooled<T> {
    item: Option<T>,
    home: Option<(Arc<PoolInner<T>>, OwnedSemaphorePermit)>,
}

impl<T> Pooled<T> {
    /// Wrap an item that does not belong to any pool
    pub fn standalone(item: T) -> Self {
        Self {
            item: Some(item),
            home: None,
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // populated from construction until drop
        match self.item.as_ref() {
            Some(item) => item,
            None => unreachable!("pooled item taken before drop"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.item.as_mut() {
            Some(item) => item,
            None => unreachable!("pooled item taken before drop"),
        }
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let (Some(item), Some((pool, _permit))) = (self.item.take(), self.home.as_ref()) {
            pool.items.lock().push(item);
        }
        // the permit is released after the item is back
    }
}

/// A payload buffer checked out of a [`BufferPool`]
pub type PooledBuffer = Pooled<Vec<u8>>;

/// Pool of fixed-size payload buffers
#[derive(Clone)]
pub struct BufferPool {
    pool: Pool<Vec<u8>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Pre-allocate `count` buffers of `buffer_size` bytes
    pub fn new(count: usize, buffer_size: usize) -> Self {
        trace!(count, buffer_size, "allocating buffer pool");
        Self {
            pool: Pool::with_items(count, || Vec::with_capacity(buffer_size)),
            buffer_size,
        }
    }

    /// Take a zeroed buffer of `len` bytes, waiting while none is free
    pub async fn get(&self, len: usize) -> NvmeOfResult<PooledBuffer> {
        if len > self.buffer_size {
            return Err(NvmeOfError::InvalidParameter(format!(
                "transfer of {} bytes exceeds buffer size {}",
                len, self.buffer_size
            )));
        }
        let mut buf = self.pool.acquire().await?;
        buf.clear();
        buf.resize(len, 0);
        Ok(buf)
    }

    /// Size of each buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers currently free
    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// Total buffers
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_return() {
        let pool = Pool::with_items(2, || 0u32);
        assert_eq!(pool.available(), 2);

        let mut a = pool.acquire().await.unwrap();
        *a = 7;
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        let again = pool.try_acquire().unwrap();
        assert_eq!(*again, 7);
    }

    #[tokio::test]
    async fn test_exhausted_pool_blocks_until_release() {
        let pool = Pool::with_items(1, || ());
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let pool = Pool::with_items(2, || ());
        pool.wait_idle().await.unwrap();

        let held = pool.acquire().await.unwrap();
        let idle = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!idle.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), idle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_buffer_pool_sizes() {
        let pool = BufferPool::new(2, 4096);
        let mut buf = pool.get(512).await.unwrap();
        assert_eq!(buf.len(), 512);
        buf.fill(0xAA);
        drop(buf);

        let buf = pool.get(1024).await.unwrap();
        assert_eq!(buf.len(), 1024);
        assert!(buf.iter().all(|&b| b == 0));

        assert!(matches!(
            pool.get(8192).await,
            Err(NvmeOfError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_standalone_is_not_returned() {
        let pool: Pool<u8> = Pool::with_items(0, || 0);
        let item = Pooled::standalone(5u8);
        drop(item);
        assert_eq!(pool.available(), 0);
    }
}
