//! NVMe/TCP controller
//!
//! One controller serves one TCP connection. Capsules are received and
//! dispatched strictly in order by the receive loop; completions may arrive
//! out of order from the backend and are written back by a dedicated
//! completion task, which owns every write on the connection apart from the
//! ICResp and a final termination request.
//!
//! Admission control is the request pool: a capsule is only read once a
//! free request slot is available. After Connect the slots beyond the
//! negotiated queue depth are parked, so a host can never have more than
//! that many commands in flight.

mod admin;
mod fabric;
mod io;
mod request;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, trace, warn, Instrument};

use crate::buffers::{BufferPool, Pool, Pooled};
use crate::config::NvmeOfConfig;
use crate::error::{NvmeOfError, NvmeOfResult};
use crate::pdu::{PduReader, PduWriter};
use crate::protocol::transport::{TerminationStatus, C2H_DATA_LAST, PDU_FORMAT_VERSION};
use crate::protocol::{
    AdminOpcode, C2hData, CapsuleCommand, IcReq, IcResp, PduType, TermReq, SQHD_DISABLED,
};
use crate::server::Registry;
use crate::subsystem::{InitSubsystem, Subsystem};

use request::NvmeRequest;

/// Request slot checked out of the controller's pool
type Slot = Pooled<NvmeRequest>;

/// Per-controller limits
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// MAXH2CDATA advertised in ICResp
    pub max_h2c_data: u32,
    /// Request slots; the deepest queue a host may negotiate
    pub queue_capacity: usize,
    /// Payload buffers
    pub buffer_count: usize,
    /// Bytes per payload buffer; also the largest single transfer
    pub buffer_size: usize,
    /// How long to wait for in-flight commands when closing
    pub drain_timeout: Duration,
    /// Keep-alive timer reported by Get Features
    pub keep_alive_ms: u32,
}

impl From<&NvmeOfConfig> for ControllerConfig {
    fn from(config: &NvmeOfConfig) -> Self {
        Self {
            max_h2c_data: config.tcp.max_h2c_data,
            queue_capacity: config.queue_depth,
            buffer_count: config.buffer_count,
            buffer_size: config.buffer_size,
            drain_timeout: config.drain_timeout(),
            keep_alive_ms: config.keep_alive_ms,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&NvmeOfConfig::default())
    }
}

/// Serve one connection until the host leaves, a fatal protocol error
/// occurs or `stop` fires
///
/// Returns once in-flight commands have drained (or the drain timeout
/// passed) and the completion task has exited.
pub(crate) async fn serve<S>(
    stream: S,
    session: u64,
    registry: Arc<Registry>,
    config: ControllerConfig,
    mut stop: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = PduReader::new(read_half);
    let writer = Arc::new(AsyncMutex::new(PduWriter::new(write_half)));

    let (completions, queue) = mpsc::unbounded_channel();
    let (stop_completions, completions_stopped) = watch::channel(false);
    let completion_task = tokio::spawn(
        complete_requests(queue, Arc::clone(&writer), completions_stopped).in_current_span(),
    );

    let drain_timeout = config.drain_timeout;
    let mut controller = Controller::new(session, registry, config, completions);
    match controller.receive_loop(&mut reader, &writer, &mut stop).await {
        Ok(()) => debug!("Connection closed"),
        Err(NvmeOfError::Io(e)) => debug!("Connection lost: {}", e),
        Err(e) => {
            warn!("Terminating connection: {}", e);
            let term = TermReq::new(termination_status(&e), 0);
            let sent = tokio::time::timeout(drain_timeout, async {
                writer.lock().await.write_pdu(&term).await
            })
            .await;
            match sent {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Failed to send termination request: {}", e),
                Err(_) => debug!("Host is not reading, termination request dropped"),
            }
        }
    }

    controller.drain().await;
    drop(controller);
    stop_completions.send_replace(true);
    if let Err(e) = completion_task.await {
        warn!("Completion task failed: {}", e);
    }
    if let Err(e) = writer.lock().await.shutdown().await {
        trace!("Shutdown of write half failed: {}", e);
    };
}

fn termination_status(error: &NvmeOfError) -> TerminationStatus {
    match error {
        NvmeOfError::Codec(_) => TerminationStatus::InvalidHeaderField,
        NvmeOfError::InvalidParameter(_) => TerminationStatus::DataTransferLimitExceeded,
        _ => TerminationStatus::PduSequenceError,
    }
}

/// Controller state for one connection
pub(crate) struct Controller {
    session: u64,
    registry: Arc<Registry>,
    config: ControllerConfig,
    subsystem: Arc<dyn Subsystem>,
    buffers: BufferPool,
    requests: Pool<NvmeRequest>,
    /// Slots withheld because the host negotiated a shallower queue
    reserved: Vec<Slot>,
    completions: mpsc::UnboundedSender<Slot>,

    queue_id: u16,
    queue_depth: usize,
    sqhd: u16,
    flow_control_disabled: bool,
    controller_id: u16,

    // registers and features
    configuration: u32,
    status: u32,
    async_event_config: u32,
    queue_count: u32,
}

impl Controller {
    fn new(
        session: u64,
        registry: Arc<Registry>,
        config: ControllerConfig,
        completions: mpsc::UnboundedSender<Slot>,
    ) -> Self {
        let requests = Pool::with_items(config.queue_capacity, NvmeRequest::default);
        let buffers = BufferPool::new(config.buffer_count, config.buffer_size);
        Self {
            session,
            registry,
            queue_depth: config.queue_capacity,
            config,
            subsystem: Arc::new(InitSubsystem),
            buffers,
            requests,
            reserved: Vec::new(),
            completions,
            queue_id: 0,
            sqhd: 0,
            flow_control_disabled: false,
            controller_id: 0,
            configuration: 0,
            status: 0,
            async_event_config: 0,
            queue_count: 0,
        }
    }

    async fn receive_loop<R, W>(
        &mut self,
        reader: &mut PduReader<R>,
        writer: &AsyncMutex<PduWriter<W>>,
        stop: &mut watch::Receiver<bool>,
    ) -> NvmeOfResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            // no header is read until a request slot is free
            let slot = tokio::select! {
                biased;
                _ = stop.changed() => return Ok(()),
                slot = self.requests.acquire() => slot?,
            };
            let header = tokio::select! {
                biased;
                _ = stop.changed() => return Ok(()),
                header = reader.dequeue() => header?,
            };

            match header.kind() {
                Some(PduType::IcReq) => self.initialize(reader, writer).await?,
                Some(PduType::CapsuleCmd) => self.receive_capsule(reader, slot).await?,
                Some(PduType::H2cTermReq) => {
                    let term: TermReq = reader.receive().await?;
                    info!(
                        "Host terminated connection: fes={:#x}, fei={:#x}",
                        term.fes, term.fei
                    );
                    return Ok(());
                }
                _ => {
                    return Err(NvmeOfError::Protocol(format!(
                        "unexpected PDU type {:#04x}",
                        header.pdu_type
                    )))
                }
            }
        }
    }

    async fn initialize<R, W>(
        &mut self,
        reader: &mut PduReader<R>,
        writer: &AsyncMutex<PduWriter<W>>,
    ) -> NvmeOfResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let request: IcReq = reader.receive().await?;
        debug!(
            "ICReq: pfv={}, hpda={}, digest={:#x}, maxr2t={}",
            request.pfv, request.hpda, request.digest, request.max_r2t
        );
        let response = IcResp {
            pfv: PDU_FORMAT_VERSION,
            cpda: 0,
            digest: 0,
            max_h2c_data: self.config.max_h2c_data,
        };
        writer.lock().await.write_pdu(&response).await
    }

    async fn receive_capsule<R>(
        &mut self,
        reader: &mut PduReader<R>,
        mut slot: Slot,
    ) -> NvmeOfResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let capsule: CapsuleCommand = reader.receive().await?;
        slot.reset(capsule, self.queue_id);

        let length = reader.length();
        if length > 0 {
            if length > self.buffers.buffer_size() {
                return Err(NvmeOfError::InvalidParameter(format!(
                    "in-capsule data of {} bytes exceeds {}",
                    length,
                    self.buffers.buffer_size()
                )));
            }
            let mut payload = self.buffers.get(length).await?;
            reader.receive_data(&mut payload[..]).await?;
            slot.payload = Some(payload);
        }

        self.sqhd = ((self.sqhd as usize + 1) % self.queue_depth.max(1)) as u16;
        trace!(
            "Capsule: qid={}, cid={}, opcode={:#04x}, data={}",
            self.queue_id,
            slot.capsule.cid,
            slot.capsule.opcode,
            length
        );

        if self.queue_id == 0 || slot.capsule.opcode == AdminOpcode::Fabric as u8 {
            self.dispatch_admin(slot)
        } else {
            self.dispatch_io(slot).await
        }
    }

    /// Fill in the submission queue head reported with a completion
    fn stamp(&self, request: &mut NvmeRequest) {
        request.response.capsule.sqhd = if self.flow_control_disabled {
            SQHD_DISABLED
        } else {
            self.sqhd
        };
    }

    /// Hand a finished request to the completion task
    fn finish(&self, slot: Slot) {
        // a closed channel drops the slot, which returns it to the pool
        let _ = self.completions.send(slot);
    }

    /// Withhold `count` slots from the receive loop
    fn park_slots(&mut self, count: usize) {
        self.reserved.clear();
        while self.reserved.len() < count {
            match self.requests.try_acquire() {
                Some(slot) => self.reserved.push(slot),
                None => break,
            }
        }
    }

    async fn drain(&mut self) {
        self.reserved.clear();
        let timeout = self.config.drain_timeout;
        match tokio::time::timeout(timeout, self.requests.wait_idle()).await {
            Ok(Ok(())) => trace!("All requests drained"),
            Ok(Err(e)) => warn!("Failed to drain requests: {}", e),
            Err(_) => warn!(
                "{} requests still in flight after {:?}",
                self.requests.capacity() - self.requests.available(),
                timeout
            ),
        }
    }
}

/// Write completions back to the host until told to stop
///
/// After a write error nothing more is written, but requests keep being
/// drained so their slots return to the pool. A stop also abandons a write
/// the host is not reading.
async fn complete_requests<W>(
    mut queue: mpsc::UnboundedReceiver<Slot>,
    writer: Arc<AsyncMutex<PduWriter<W>>>,
    mut stop: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut healthy = true;
    loop {
        let slot = tokio::select! {
            biased;
            slot = queue.recv() => match slot {
                Some(slot) => slot,
                None => break,
            },
            _ = stop.wait_for(|&stopped| stopped) => break,
        };
        if healthy {
            let sent = tokio::select! {
                biased;
                sent = send_response(&writer, &slot) => sent,
                _ = stop.wait_for(|&stopped| stopped) => {
                    debug!("Abandoned response for cid={}", slot.response.capsule.cid);
                    break;
                }
            };
            if let Err(e) = sent {
                warn!(
                    "Failed to send response for cid={}: {}",
                    slot.response.capsule.cid, e
                );
                healthy = false;
            }
        }
    }

    queue.close();
    let mut dropped = 0usize;
    while let Ok(slot) = queue.try_recv() {
        drop(slot);
        dropped += 1;
    }
    if dropped > 0 {
        debug!("Dropped {} completions after close", dropped);
    }
}

async fn send_response<W>(
    writer: &AsyncMutex<PduWriter<W>>,
    request: &NvmeRequest,
) -> NvmeOfResult<()>
where
    W: AsyncWrite + Unpin,
{
    let response = &request.response;
    let mut writer = writer.lock().await;

    let last = response.data.len().saturating_sub(1);
    let mut offset = 0u32;
    for (i, segment) in response.data.iter().enumerate() {
        let length = u32::try_from(segment.len())
            .map_err(|_| NvmeOfError::Internal("data segment too large".into()))?;
        let header = C2hData {
            cccid: response.capsule.cid,
            data_offset: offset,
            data_length: length,
        };
        let flags = if i == last { C2H_DATA_LAST } else { 0 };
        writer.marshal_with_data(&header, flags, &segment[..])?;
        writer.flush().await?;
        offset = offset.saturating_add(length);
    }

    if !response.no_reply {
        writer.write_pdu(&response.capsule).await?;
    }
    Ok(())
}
