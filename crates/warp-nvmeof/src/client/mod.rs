//! NVMe/TCP initiator
//!
//! A [`Client`] logs in to one subsystem over an admin queue, then opens any
//! number of I/O queues against the same controller. Each queue is its own
//! TCP connection.
//!
//! ```no_run
//! use warp_nvmeof::client::Client;
//! use warp_nvmeof::config::ClientConfig;
//!
//! # async fn example() -> warp_nvmeof::NvmeOfResult<()> {
//! let addr = "127.0.0.1:4420".parse().unwrap();
//! let mut client = Client::connect(addr, "nqn.test:null", ClientConfig::default())?;
//! client.login().await?;
//! let io = client.open_io_queue(1).await?;
//! io.write(0, &[0x55; 512]).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{NvmeOfError, NvmeOfResult, NvmeStatus};
use crate::protocol::AUTO_CONTROLLER_ID;
use crate::validate_nqn;

pub mod admin;
pub mod io;
pub mod queue;

pub use admin::AdminQueue;
pub use io::IoQueue;
pub use queue::{Completion, Queue};

/// Initiator for one subsystem on one target
pub struct Client {
    addr: SocketAddr,
    subsystem_nqn: String,
    config: ClientConfig,
    host_id: [u8; 16],
    admin: Option<AdminQueue>,
    io_queues: Mutex<HashMap<u16, Arc<IoQueue>>>,
}

impl Client {
    /// Prepare a client; no connection is made until [`login`](Self::login)
    pub fn connect(
        addr: SocketAddr,
        subsystem_nqn: impl Into<String>,
        config: ClientConfig,
    ) -> NvmeOfResult<Self> {
        let subsystem_nqn = subsystem_nqn.into();
        if !validate_nqn(&subsystem_nqn) {
            return Err(NvmeOfError::InvalidNqn(subsystem_nqn));
        }
        config.validate()?;
        Ok(Self {
            addr,
            subsystem_nqn,
            config,
            host_id: *Uuid::new_v4().as_bytes(),
            admin: None,
            io_queues: Mutex::new(HashMap::new()),
        })
    }

    /// Target address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn subsystem_nqn(&self) -> &str {
        &self.subsystem_nqn
    }

    /// Connect the admin queue
    pub async fn login(&mut self) -> NvmeOfResult<()> {
        if self.admin.is_some() {
            return Ok(());
        }
        let queue = Queue::connect(
            self.addr,
            &self.subsystem_nqn,
            0,
            AUTO_CONTROLLER_ID,
            self.host_id,
            &self.config,
        )
        .await?;
        info!(
            "Logged in to {} at {} as controller {}",
            self.subsystem_nqn,
            self.addr,
            queue.controller_id()
        );
        self.admin = Some(AdminQueue::new(queue));
        Ok(())
    }

    /// The admin queue, once logged in
    pub fn admin(&self) -> NvmeOfResult<&AdminQueue> {
        self.admin
            .as_ref()
            .ok_or_else(|| NvmeOfError::Disconnected("not logged in".into()))
    }

    /// Connect I/O queue `queue_id` to the logged in controller
    pub async fn open_io_queue(&self, queue_id: u16) -> NvmeOfResult<Arc<IoQueue>> {
        if queue_id == 0 {
            return Err(NvmeOfError::Status(NvmeStatus::InvalidQueueId));
        }
        let controller_id = self.admin()?.controller_id();
        if self.io_queues.lock().contains_key(&queue_id) {
            return Err(NvmeOfError::InvalidParameter(format!(
                "queue {} is already open",
                queue_id
            )));
        }

        let queue = Queue::connect(
            self.addr,
            &self.subsystem_nqn,
            queue_id,
            controller_id,
            self.host_id,
            &self.config,
        )
        .await?;
        let io = Arc::new(IoQueue::new(
            queue,
            self.config.io_descriptors,
            self.config.max_transfer,
        ));

        let raced = self.io_queues.lock().insert(queue_id, Arc::clone(&io));
        if let Some(previous) = raced {
            previous.close().await;
        }
        debug!("Opened I/O queue {}", queue_id);
        Ok(io)
    }

    /// An open I/O queue
    pub fn io_queue(&self, queue_id: u16) -> Option<Arc<IoQueue>> {
        self.io_queues.lock().get(&queue_id).cloned()
    }

    /// Close one I/O queue, failing its outstanding commands
    pub async fn close_queue(&self, queue_id: u16) -> NvmeOfResult<()> {
        let queue = self
            .io_queues
            .lock()
            .remove(&queue_id)
            .ok_or(NvmeOfError::Status(NvmeStatus::InvalidQueueId))?;
        queue.close().await;
        debug!("Closed I/O queue {}", queue_id);
        Ok(())
    }

    /// Close every I/O queue, then the admin queue
    pub async fn close(&mut self) {
        let queues: Vec<_> = self.io_queues.lock().drain().map(|(_, q)| q).collect();
        for queue in queues {
            queue.close().await;
        }
        if let Some(admin) = self.admin.take() {
            admin.close().await;
        }
        debug!("Client for {} closed", self.subsystem_nqn);
    }
}
