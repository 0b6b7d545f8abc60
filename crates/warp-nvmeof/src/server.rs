//! NVMe/TCP target server
//!
//! [`Registry`] owns the exported subsystems, the live sessions and the
//! controller ID pool behind a single lock. [`Server`] accepts connections
//! and runs one controller per connection against that registry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::NvmeOfConfig;
use crate::controller::{self, ControllerConfig};
use crate::error::{NvmeOfError, NvmeOfResult};
use crate::protocol::{ConnectData, AUTO_CONTROLLER_ID, DISCOVERY_NQN};
use crate::subsystem::{DiscoveryDirectory, DiscoverySubsystem, Subsystem};

/// Lowest controller ID handed out
const FIRST_CONTROLLER_ID: u16 = 0x0001;

/// Highest controller ID handed out; the rest of the range is reserved
const LAST_CONTROLLER_ID: u16 = 0xFFEF;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Snapshot of one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session identifier, unique for the registry's lifetime
    pub id: u64,
    /// Remote address
    pub peer: SocketAddr,
    /// Subsystem bound by Connect
    pub subsystem_nqn: Option<String>,
    /// Host NQN sent in Connect
    pub host_nqn: Option<String>,
    /// Controller ID in use
    pub controller_id: Option<u16>,
    /// Queue served by the connection
    pub queue_id: Option<u16>,
}

struct SessionEntry {
    info: SessionInfo,
    stop: watch::Sender<bool>,
    done: watch::Receiver<bool>,
    /// ID taken from the pool on this session's behalf
    allocated_id: Option<u16>,
}

/// Free controller IDs
#[derive(Debug)]
struct ControllerIds {
    next: u16,
    released: BTreeSet<u16>,
}

impl ControllerIds {
    fn new() -> Self {
        Self {
            next: FIRST_CONTROLLER_ID,
            released: BTreeSet::new(),
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        if let Some(id) = self.released.pop_first() {
            return Some(id);
        }
        if self.next > LAST_CONTROLLER_ID {
            return None;
        }
        let id = self.next;
        self.next += 1;
        Some(id)
    }

    fn release(&mut self, id: u16) {
        if (FIRST_CONTROLLER_ID..self.next).contains(&id) {
            self.released.insert(id);
        }
    }
}

struct RegistryState {
    subsystems: BTreeMap<String, Arc<dyn Subsystem>>,
    sessions: HashMap<u64, SessionEntry>,
    next_session: u64,
    controller_ids: ControllerIds,
}

/// What a successful Connect binds a controller to
pub(crate) struct Binding {
    pub subsystem: Arc<dyn Subsystem>,
    pub controller_id: u16,
}

/// Why a Connect could not be bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectRefusal {
    /// No subsystem with the requested NQN
    UnknownSubsystem,
    /// Every controller ID is in use
    ControllerIdsExhausted,
}

/// Handles a connection task needs from its session entry
pub(crate) struct SessionHandle {
    pub id: u64,
    pub stop: watch::Receiver<bool>,
    pub done: watch::Sender<bool>,
}

/// Subsystems and sessions served by one server
///
/// The discovery subsystem is registered from the start and cannot be
/// removed.
pub struct Registry {
    state: Mutex<RegistryState>,
    advertised: RwLock<Option<SocketAddr>>,
}

impl Registry {
    /// Registry holding only the discovery subsystem
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Registry>| {
            let directory: Weak<dyn DiscoveryDirectory> = weak.clone();
            let discovery: Arc<dyn Subsystem> = Arc::new(DiscoverySubsystem::new(directory));
            let mut subsystems = BTreeMap::new();
            subsystems.insert(DISCOVERY_NQN.to_string(), discovery);
            Registry {
                state: Mutex::new(RegistryState {
                    subsystems,
                    sessions: HashMap::new(),
                    next_session: 1,
                    controller_ids: ControllerIds::new(),
                }),
                advertised: RwLock::new(None),
            }
        })
    }

    /// Export a subsystem; its NQN must not be taken
    pub fn add_subsystem(&self, subsystem: Arc<dyn Subsystem>) -> NvmeOfResult<()> {
        let nqn = subsystem.nqn().to_string();
        let mut state = self.state.lock();
        if state.subsystems.contains_key(&nqn) {
            return Err(NvmeOfError::Subsystem(format!(
                "subsystem {} already exists",
                nqn
            )));
        }
        info!("Added subsystem: nqn={}, kind={}", nqn, subsystem.kind());
        state.subsystems.insert(nqn, subsystem);
        Ok(())
    }

    /// Look up a subsystem by NQN
    pub fn subsystem(&self, nqn: &str) -> Option<Arc<dyn Subsystem>> {
        self.state.lock().subsystems.get(nqn).cloned()
    }

    /// NQNs of all subsystems, discovery included, in order
    pub fn list_subsystems(&self) -> Vec<String> {
        self.state.lock().subsystems.keys().cloned().collect()
    }

    /// Stop exporting a subsystem
    ///
    /// Sessions bound to it are closed and waited for before the subsystem
    /// itself is closed.
    pub async fn remove_subsystem(&self, nqn: &str) -> NvmeOfResult<()> {
        if nqn == DISCOVERY_NQN {
            return Err(NvmeOfError::Subsystem(
                "the discovery subsystem cannot be removed".into(),
            ));
        }
        let (subsystem, waiters) = {
            let mut state = self.state.lock();
            let subsystem = state
                .subsystems
                .remove(nqn)
                .ok_or_else(|| NvmeOfError::Subsystem(format!("unknown subsystem {}", nqn)))?;
            let waiters: Vec<_> = state
                .sessions
                .values()
                .filter(|entry| entry.info.subsystem_nqn.as_deref() == Some(nqn))
                .map(|entry| {
                    entry.stop.send_replace(true);
                    entry.done.clone()
                })
                .collect();
            (subsystem, waiters)
        };

        info!("Removing subsystem {}: closing {} sessions", nqn, waiters.len());
        wait_for_sessions(waiters).await;
        subsystem.close().await;
        Ok(())
    }

    /// Snapshot of the live sessions, ordered by ID
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let state = self.state.lock();
        let mut sessions: Vec<_> = state.sessions.values().map(|e| e.info.clone()).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Address published in discovery log entries
    pub fn set_advertised_addr(&self, addr: SocketAddr) {
        *self.advertised.write() = Some(addr);
    }

    /// Close every session and wait for them to finish
    pub async fn close_sessions(&self) {
        let waiters: Vec<_> = {
            let state = self.state.lock();
            state
                .sessions
                .values()
                .map(|entry| {
                    entry.stop.send_replace(true);
                    entry.done.clone()
                })
                .collect()
        };
        if !waiters.is_empty() {
            debug!("Closing {} sessions", waiters.len());
        }
        wait_for_sessions(waiters).await;
    }

    /// Remove and close every subsystem except discovery
    pub async fn close_subsystems(&self) {
        let subsystems: Vec<_> = {
            let mut state = self.state.lock();
            let nqns: Vec<_> = state
                .subsystems
                .keys()
                .filter(|nqn| nqn.as_str() != DISCOVERY_NQN)
                .cloned()
                .collect();
            nqns.iter()
                .filter_map(|nqn| state.subsystems.remove(nqn))
                .collect()
        };
        for subsystem in subsystems {
            debug!("Closing subsystem {}", subsystem.nqn());
            subsystem.close().await;
        }
    }

    pub(crate) fn register_session(&self, peer: SocketAddr) -> SessionHandle {
        let (stop, stop_rx) = watch::channel(false);
        let (done_tx, done) = watch::channel(false);
        let mut state = self.state.lock();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(
            id,
            SessionEntry {
                info: SessionInfo {
                    id,
                    peer,
                    subsystem_nqn: None,
                    host_nqn: None,
                    controller_id: None,
                    queue_id: None,
                },
                stop,
                done,
                allocated_id: None,
            },
        );
        SessionHandle {
            id,
            stop: stop_rx,
            done: done_tx,
        }
    }

    /// Resolve a Connect for `session`
    ///
    /// Lookup, controller ID allocation and the session update happen under
    /// one lock, so a concurrent removal either sees the binding or refuses
    /// it.
    pub(crate) fn bind(
        &self,
        session: u64,
        data: &ConnectData,
        queue_id: u16,
    ) -> Result<Binding, ConnectRefusal> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let subsystem = state
            .subsystems
            .get(&data.subsystem_nqn)
            .cloned()
            .ok_or(ConnectRefusal::UnknownSubsystem)?;

        let entry = state.sessions.get_mut(&session);
        let controller_id = if data.cntlid == AUTO_CONTROLLER_ID {
            let id = state
                .controller_ids
                .allocate()
                .ok_or(ConnectRefusal::ControllerIdsExhausted)?;
            if let Some(previous) = entry.as_ref().and_then(|e| e.allocated_id) {
                state.controller_ids.release(previous);
            }
            id
        } else {
            data.cntlid
        };

        if let Some(entry) = entry {
            if data.cntlid == AUTO_CONTROLLER_ID {
                entry.allocated_id = Some(controller_id);
            }
            entry.info.subsystem_nqn = Some(data.subsystem_nqn.clone());
            entry.info.host_nqn = Some(data.host_nqn.clone());
            entry.info.controller_id = Some(controller_id);
            entry.info.queue_id = Some(queue_id);
        }

        Ok(Binding {
            subsystem,
            controller_id,
        })
    }

    pub(crate) fn end_session(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.remove(&id) {
            if let Some(controller_id) = entry.allocated_id {
                state.controller_ids.release(controller_id);
            }
            debug!("Session {} ended", id);
        }
    }
}

impl DiscoveryDirectory for Registry {
    fn subsystem_nqns(&self) -> Vec<String> {
        self.list_subsystems()
    }

    fn advertised_addr(&self) -> Option<SocketAddr> {
        *self.advertised.read()
    }
}

async fn wait_for_sessions(waiters: Vec<watch::Receiver<bool>>) {
    for mut done in waiters {
        // a dropped sender means the session task is gone as well
        let _ = done.wait_for(|finished| *finished).await;
    }
}

/// NVMe/TCP listener serving a [`Registry`]
pub struct Server {
    config: NvmeOfConfig,
    registry: Arc<Registry>,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    stop: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind the listening socket; call [`serve`](Self::serve) to start
    /// accepting
    pub async fn bind(config: NvmeOfConfig, registry: Arc<Registry>) -> NvmeOfResult<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        let advertised = match config.advertised_addr {
            Some(ip) => SocketAddr::new(ip, local_addr.port()),
            None => local_addr,
        };
        registry.set_advertised_addr(advertised);
        info!("NVMe-oF target bound to {}", local_addr);

        let (stop, _) = watch::channel(false);
        Ok(Self {
            config,
            registry,
            local_addr,
            listener: Mutex::new(Some(listener)),
            stop,
            accept_task: Mutex::new(None),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The registry being served
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Start the accept loop in the background
    pub fn serve(&self) -> NvmeOfResult<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| NvmeOfError::Internal("server is already serving".into()))?;
        let task = tokio::spawn(accept_connections(
            listener,
            Arc::clone(&self.registry),
            ControllerConfig::from(&self.config),
            self.config.tcp.nodelay,
            self.stop.subscribe(),
        ));
        *self.accept_task.lock() = Some(task);
        info!("NVMe-oF target listening on {}", self.local_addr);
        Ok(())
    }

    /// Export a subsystem
    pub fn add_subsystem(&self, subsystem: Arc<dyn Subsystem>) -> NvmeOfResult<()> {
        self.registry.add_subsystem(subsystem)
    }

    /// Look up a subsystem by NQN
    pub fn subsystem(&self, nqn: &str) -> Option<Arc<dyn Subsystem>> {
        self.registry.subsystem(nqn)
    }

    /// NQNs of all subsystems
    pub fn list_subsystems(&self) -> Vec<String> {
        self.registry.list_subsystems()
    }

    /// Stop exporting a subsystem, closing its sessions first
    pub async fn remove_subsystem(&self, nqn: &str) -> NvmeOfResult<()> {
        self.registry.remove_subsystem(nqn).await
    }

    /// Live sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.sessions()
    }

    /// Stop accepting, close all sessions, then close all subsystems
    pub async fn close(&self) {
        self.stop.send_replace(true);
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Accept loop failed: {}", e);
            }
        }
        self.registry.close_sessions().await;
        self.registry.close_subsystems().await;
        info!("NVMe-oF target on {} closed", self.local_addr);
    }
}

async fn accept_connections(
    listener: TcpListener,
    registry: Arc<Registry>,
    config: ControllerConfig,
    nodelay: bool,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        if let Err(e) = stream.set_nodelay(nodelay) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let session = registry.register_session(peer);
        info!("Accepted connection from {} as session {}", peer, session.id);
        let span = info_span!("session", id = session.id, peer = %peer);
        let registry = Arc::clone(&registry);
        let config = config.clone();
        tokio::spawn(
            async move {
                let SessionHandle { id, stop, done } = session;
                controller::serve(stream, id, Arc::clone(&registry), config, stop).await;
                registry.end_session(id);
                done.send_replace(true);
            }
            .instrument(span),
        );
    }
    debug!("Accept loop stopped");
}
