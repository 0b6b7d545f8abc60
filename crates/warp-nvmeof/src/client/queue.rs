//! One queue connection to a controller
//!
//! A [`Queue`] owns a TCP connection and two tasks. The transmitter takes
//! submissions off a bounded channel, assigns each a command identifier and
//! writes it out. The receiver matches C2HData and response capsules back to
//! the pending command by CID. Callers wait on a per-command oneshot, so the
//! pending table lock is only held to insert, look up or remove an entry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::codec::WireRecord;
use crate::config::ClientConfig;
use crate::error::{check_status, NvmeOfError, NvmeOfResult, NvmeStatus};
use crate::pdu::{PduReader, PduWriter};
use crate::protocol::fabric::CONNECT_DATA_LEN;
use crate::protocol::header::CommonHeader;
use crate::protocol::{
    AdminOpcode, C2hData, CapsuleCommand, CapsuleResponse, ConnectCommand, ConnectData,
    FabricCommandType, IcReq, IcResp, PduType, TermReq, FLOW_CONTROL_DISABLED,
    MAX_H2C_DATA_LENGTH,
};
use crate::protocol::transport::{C2H_DATA_LAST, C2H_DATA_SUCCESS, PDU_FORMAT_VERSION};

/// A finished command
#[derive(Debug)]
pub struct Completion {
    /// Response capsule
    pub response: CapsuleResponse,
    /// Data received ahead of the response
    pub data: Vec<u8>,
}

impl Completion {
    /// Completion for a command the connection could not finish
    fn failed(cid: u16, data: Vec<u8>) -> Self {
        let mut response = CapsuleResponse {
            cid,
            ..Default::default()
        };
        response.set_status(NvmeStatus::InternalError);
        Self { response, data }
    }
}

struct Submission {
    capsule: CapsuleCommand,
    payload: Option<Bytes>,
    receive: Vec<u8>,
    reply: oneshot::Sender<Completion>,
}

struct Pending {
    reply: oneshot::Sender<Completion>,
    data: Vec<u8>,
}

impl Pending {
    fn fail(self, cid: u16) {
        let _ = self.reply.send(Completion::failed(cid, self.data));
    }
}

/// Commands written but not yet answered, by CID
#[derive(Default)]
struct PendingTable {
    next_cid: u16,
    entries: HashMap<u16, Pending>,
    closed: bool,
}

impl PendingTable {
    /// Record a command under the next free CID
    ///
    /// CIDs wrap at 16 bits and skip any still pending. Hands the entry back
    /// if the connection is gone or no CID is free.
    fn insert(&mut self, pending: Pending) -> Result<u16, Pending> {
        if self.closed || self.entries.len() > usize::from(u16::MAX) {
            return Err(pending);
        }
        loop {
            self.next_cid = self.next_cid.wrapping_add(1);
            if !self.entries.contains_key(&self.next_cid) {
                break;
            }
        }
        self.entries.insert(self.next_cid, pending);
        Ok(self.next_cid)
    }

    fn remove(&mut self, cid: u16) -> Option<Pending> {
        self.entries.remove(&cid)
    }

    fn get_mut(&mut self, cid: u16) -> Option<&mut Pending> {
        self.entries.get_mut(&cid)
    }

    /// Refuse further commands and hand back everything outstanding
    fn close(&mut self) -> Vec<(u16, Pending)> {
        self.closed = true;
        self.entries.drain().collect()
    }
}

type SharedPending = Arc<Mutex<PendingTable>>;

fn fail_pending(pending: &SharedPending) {
    let outstanding = pending.lock().close();
    if !outstanding.is_empty() {
        debug!("Failing {} outstanding commands", outstanding.len());
    }
    for (cid, entry) in outstanding {
        entry.fail(cid);
    }
}

/// A connected admin or I/O queue
pub struct Queue {
    id: u16,
    controller_id: u16,
    submissions: mpsc::Sender<Submission>,
    pending: SharedPending,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Queue {
    /// Open a connection, run the ICReq exchange and Connect queue `id`
    ///
    /// `controller_id` is [`AUTO_CONTROLLER_ID`](crate::protocol::AUTO_CONTROLLER_ID)
    /// for the admin queue and the controller's ID for I/O queues.
    pub(crate) async fn connect(
        addr: SocketAddr,
        subsystem_nqn: &str,
        id: u16,
        controller_id: u16,
        host_id: [u8; 16],
        config: &ClientConfig,
    ) -> NvmeOfResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let mut queue = Self::start(stream, id, config.request_depth).await?;

        let connected = queue
            .send_connect(subsystem_nqn, controller_id, host_id, config)
            .await;
        match connected {
            Ok(controller_id) => {
                queue.controller_id = controller_id;
                debug!(
                    "Queue {} connected to {} as controller {}",
                    id, subsystem_nqn, controller_id
                );
                Ok(queue)
            }
            Err(e) => {
                queue.close().await;
                Err(e)
            }
        }
    }

    /// Run the ICReq exchange on `stream` and start both pumps
    pub(crate) async fn start<S>(stream: S, id: u16, request_depth: usize) -> NvmeOfResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let mut reader = PduReader::new(read);
        let mut writer = PduWriter::new(write);
        handshake(&mut reader, &mut writer).await?;

        let pending: SharedPending = Arc::default();
        let (submissions, queued) = mpsc::channel(request_depth.max(1));
        let (stop, stop_rx) = watch::channel(false);

        let transmitter = tokio::spawn(transmit(
            writer,
            queued,
            Arc::clone(&pending),
            stop_rx.clone(),
        ));
        let receiver = tokio::spawn(receive(reader, Arc::clone(&pending), id, stop_rx));

        Ok(Self {
            id,
            controller_id: 0,
            submissions,
            pending,
            stop,
            tasks: Mutex::new(vec![transmitter, receiver]),
        })
    }

    /// Queue identifier
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Controller ID assigned by Connect
    pub fn controller_id(&self) -> u16 {
        self.controller_id
    }

    /// Send a command and wait for its response
    ///
    /// `receive` is the buffer C2HData lands in; it comes back in the
    /// [`Completion`]. A failed status is returned as an error.
    pub async fn submit(
        &self,
        capsule: CapsuleCommand,
        payload: Option<Bytes>,
        receive: Vec<u8>,
    ) -> NvmeOfResult<Completion> {
        let completion = self.submit_raw(capsule, payload, receive).await?;
        check_status(completion.response.status)?;
        Ok(completion)
    }

    /// Like [`submit`](Self::submit) but hands back failed responses too
    pub async fn submit_raw(
        &self,
        capsule: CapsuleCommand,
        payload: Option<Bytes>,
        receive: Vec<u8>,
    ) -> NvmeOfResult<Completion> {
        let (reply, completed) = oneshot::channel();
        self.submissions
            .send(Submission {
                capsule,
                payload,
                receive,
                reply,
            })
            .await
            .map_err(|_| NvmeOfError::Disconnected(format!("queue {} is closed", self.id)))?;
        completed
            .await
            .map_err(|_| NvmeOfError::Disconnected(format!("queue {} dropped a command", self.id)))
    }

    /// Number of commands awaiting a response
    pub fn outstanding(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Stop both pumps and fail anything still outstanding
    pub async fn close(&self) {
        self.stop.send_replace(true);
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Queue {} task failed: {}", self.id, e);
            }
        }
        fail_pending(&self.pending);
    }

    async fn send_connect(
        &self,
        subsystem_nqn: &str,
        controller_id: u16,
        host_id: [u8; 16],
        config: &ClientConfig,
    ) -> NvmeOfResult<u16> {
        let command = ConnectCommand {
            opcode: AdminOpcode::Fabric as u8,
            fctype: FabricCommandType::Connect as u8,
            queue_id: self.id,
            queue_size: config.queue_size.saturating_sub(1),
            cattr: FLOW_CONTROL_DISABLED,
            ..Default::default()
        };
        let capsule = command.to_capsule()?;

        let data = ConnectData {
            host_id,
            cntlid: controller_id,
            subsystem_nqn: subsystem_nqn.to_string(),
            host_nqn: config.host_nqn.clone(),
        };
        let mut payload = vec![0u8; CONNECT_DATA_LEN];
        data.encode_into(&mut payload)?;

        let completion = self
            .submit(capsule, Some(Bytes::from(payload)), Vec::new())
            .await?;
        Ok(completion.response.result_u32() as u16)
    }
}

async fn handshake<R, W>(reader: &mut PduReader<R>, writer: &mut PduWriter<W>) -> NvmeOfResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = IcReq {
        pfv: PDU_FORMAT_VERSION,
        ..Default::default()
    };
    writer.write_pdu(&request).await?;

    let header = reader.dequeue().await?;
    if header.kind() != Some(PduType::IcResp) {
        return Err(NvmeOfError::Protocol(format!(
            "expected ICResp, got PDU type {:#04x}",
            header.pdu_type
        )));
    }
    let response: IcResp = reader.receive().await?;
    if response.max_h2c_data != MAX_H2C_DATA_LENGTH {
        return Err(NvmeOfError::Connection(format!(
            "unsupported MAXH2CDATA {:#x}",
            response.max_h2c_data
        )));
    }
    trace!("ICResp: pfv={}, cpda={}", response.pfv, response.cpda);
    Ok(())
}

async fn transmit<W>(
    mut writer: PduWriter<W>,
    mut queued: mpsc::Receiver<Submission>,
    pending: SharedPending,
    mut stop: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let submission = tokio::select! {
            biased;
            _ = stop.changed() => break,
            next = queued.recv() => match next {
                Some(submission) => submission,
                None => break,
            },
        };
        let Submission {
            mut capsule,
            payload,
            receive,
            reply,
        } = submission;

        let cid = match pending.lock().insert(Pending {
            reply,
            data: receive,
        }) {
            Ok(cid) => cid,
            Err(refused) => {
                refused.fail(capsule.cid);
                continue;
            }
        };
        capsule.cid = cid;
        trace!("Submit opcode={:#04x}, cid={}", capsule.opcode, cid);

        let written = match &payload {
            Some(data) => match writer.marshal_with_data(&capsule, 0, data) {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            },
            None => writer.write_pdu(&capsule).await,
        };
        if let Err(e) = written {
            warn!("Failed to send command {}: {}", cid, e);
            if let Some(entry) = pending.lock().remove(cid) {
                entry.fail(cid);
            }
            break;
        }
    }

    fail_pending(&pending);
    queued.close();
    while let Ok(submission) = queued.try_recv() {
        let _ = submission
            .reply
            .send(Completion::failed(submission.capsule.cid, submission.receive));
    }
    let _ = writer.shutdown().await;
}

async fn receive<R>(
    mut reader: PduReader<R>,
    pending: SharedPending,
    queue_id: u16,
    mut stop: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let result = loop {
        let header = tokio::select! {
            biased;
            _ = stop.changed() => break Ok(()),
            header = reader.dequeue() => header,
        };
        let handled = match header {
            Ok(header) => handle_pdu(&mut reader, header, &pending).await,
            Err(e) => Err(e),
        };
        if let Err(e) = handled {
            break Err(e);
        }
    };

    match result {
        Ok(()) => debug!("Queue {} receiver stopped", queue_id),
        Err(NvmeOfError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!("Queue {} closed by controller", queue_id)
        }
        Err(e) => warn!("Queue {} failed: {}", queue_id, e),
    }
    fail_pending(&pending);
}

async fn handle_pdu<R>(
    reader: &mut PduReader<R>,
    header: CommonHeader,
    pending: &SharedPending,
) -> NvmeOfResult<()>
where
    R: AsyncRead + Unpin,
{
    match header.kind() {
        Some(PduType::CapsuleResp) => {
            let response: CapsuleResponse = reader.receive().await?;
            let entry = pending.lock().remove(response.cid).ok_or_else(|| {
                NvmeOfError::Protocol(format!("response for unknown cid {}", response.cid))
            })?;
            let _ = entry.reply.send(Completion {
                response,
                data: entry.data,
            });
        }
        Some(PduType::C2hData) => {
            let c2h: C2hData = reader.receive().await?;
            let length = reader.length();
            let start = c2h.data_offset as usize;
            let success = header.flags & C2H_DATA_SUCCESS != 0;
            if success && header.flags & C2H_DATA_LAST == 0 {
                return Err(NvmeOfError::Protocol(format!(
                    "SUCCESS flag on a non-final data PDU for cid {}",
                    c2h.cccid
                )));
            }

            // the segment lands straight in the command's buffer, which is
            // lent out of the table for the read
            let mut buffer = {
                let mut table = pending.lock();
                let entry = table.get_mut(c2h.cccid).ok_or_else(|| {
                    NvmeOfError::Protocol(format!("data for unknown cid {}", c2h.cccid))
                })?;
                match start.checked_add(length) {
                    Some(end) if end <= entry.data.len() => std::mem::take(&mut entry.data),
                    _ => {
                        return Err(NvmeOfError::Protocol(format!(
                            "data {}+{} overruns {} byte buffer of cid {}",
                            start,
                            length,
                            entry.data.len(),
                            c2h.cccid
                        )))
                    }
                }
            };
            let received = reader
                .receive_data(&mut buffer[start..start + length])
                .await;
            if let Some(entry) = pending.lock().get_mut(c2h.cccid) {
                entry.data = buffer;
            }
            received?;

            // the controller sends no response capsule after a SUCCESS segment
            if success {
                if let Some(entry) = pending.lock().remove(c2h.cccid) {
                    let response = CapsuleResponse {
                        cid: c2h.cccid,
                        ..Default::default()
                    };
                    let _ = entry.reply.send(Completion {
                        response,
                        data: entry.data,
                    });
                }
            }
        }
        Some(PduType::C2hTermReq) => {
            let term: TermReq = reader.receive().await?;
            return Err(NvmeOfError::Connection(format!(
                "controller terminated the connection: fes={:#x}, fei={:#x}",
                term.fes, term.fei
            )));
        }
        _ => {
            return Err(NvmeOfError::Protocol(format!(
                "unexpected PDU type {:#04x}",
                header.pdu_type
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::TerminationStatus;
    use crate::protocol::AUTO_CONTROLLER_ID;
    use tokio::io::DuplexStream;

    type Peer = (PduReader<tokio::io::ReadHalf<DuplexStream>>, PduWriter<tokio::io::WriteHalf<DuplexStream>>);

    /// Start a queue against a scripted controller that has answered ICReq
    async fn scripted(max_h2c_data: u32) -> (NvmeOfResult<Queue>, Peer) {
        let (host, controller) = tokio::io::duplex(1 << 20);
        let (read, write) = tokio::io::split(controller);
        let mut reader = PduReader::new(read);
        let mut writer = PduWriter::new(write);

        let peer = async move {
            reader.dequeue().await.unwrap();
            let _: IcReq = reader.receive().await.unwrap();
            let response = IcResp {
                max_h2c_data,
                ..Default::default()
            };
            writer.write_pdu(&response).await.unwrap();
            (reader, writer)
        };
        let (queue, peer) = tokio::join!(Queue::start(host, 1, 8), peer);
        (queue, peer)
    }

    async fn next_command(peer: &mut Peer) -> CapsuleCommand {
        peer.0.dequeue().await.unwrap();
        peer.0.receive().await.unwrap()
    }

    fn respond(cid: u16) -> CapsuleResponse {
        CapsuleResponse {
            cid,
            ..Default::default()
        }
    }

    #[test]
    fn test_cid_skips_pending() {
        let mut table = PendingTable::default();
        let entry = || Pending {
            reply: oneshot::channel().0,
            data: Vec::new(),
        };
        assert_eq!(table.insert(entry()).ok(), Some(1));
        assert_eq!(table.insert(entry()).ok(), Some(2));

        table.next_cid = u16::MAX - 1;
        assert_eq!(table.insert(entry()).ok(), Some(u16::MAX));
        assert_eq!(table.insert(entry()).ok(), Some(0));
        // 1 and 2 are still outstanding
        assert_eq!(table.insert(entry()).ok(), Some(3));

        assert_eq!(table.close().len(), 5);
        assert!(table.insert(entry()).is_err());
    }

    #[tokio::test]
    async fn test_connect_capsule_and_data() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());
        let config = ClientConfig::default();
        let call = {
            let queue = Arc::clone(&queue);
            let config = config.clone();
            tokio::spawn(async move {
                queue
                    .send_connect("nqn.test:mem", AUTO_CONTROLLER_ID, [9; 16], &config)
                    .await
            })
        };

        let header = peer.0.dequeue().await.unwrap();
        assert_eq!(header.kind(), Some(PduType::CapsuleCmd));
        let capsule: CapsuleCommand = peer.0.receive().await.unwrap();
        assert_eq!(capsule.opcode, AdminOpcode::Fabric as u8);
        assert_eq!(capsule.fabric_type(), Some(FabricCommandType::Connect));

        let connect: ConnectCommand = capsule.reinterpret().unwrap();
        assert_eq!(connect.queue_id, 1);
        assert_eq!(connect.depth(), config.queue_size as usize);
        assert_eq!(connect.cattr, FLOW_CONTROL_DISABLED);

        assert_eq!(peer.0.length(), CONNECT_DATA_LEN);
        let mut payload = vec![0u8; CONNECT_DATA_LEN];
        peer.0.receive_data(&mut payload).await.unwrap();
        let data = ConnectData::decode(&payload).unwrap();
        assert_eq!(data.host_id, [9; 16]);
        assert_eq!(data.cntlid, AUTO_CONTROLLER_ID);
        assert_eq!(data.subsystem_nqn, "nqn.test:mem");
        assert_eq!(data.host_nqn, config.host_nqn);

        let mut response = respond(capsule.cid);
        response.set_result_u32(5);
        peer.1.write_pdu(&response).await.unwrap();
        assert_eq!(call.await.unwrap().unwrap(), 5);
        queue.close().await;
    }

    #[tokio::test]
    async fn test_data_overrun_is_fatal() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());
        let call = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .submit(CapsuleCommand::new(0x02), None, vec![0u8; 8])
                    .await
            })
        };
        let command = next_command(&mut peer).await;
        let c2h = C2hData {
            cccid: command.cid,
            data_offset: 4,
            data_length: 64,
        };
        peer.1.marshal_with_data(&c2h, C2H_DATA_LAST, &[0xEE; 64]).unwrap();
        peer.1.flush().await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), call)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(NvmeOfError::Status(NvmeStatus::InternalError))
        ));
        queue.close().await;
    }

    #[tokio::test]
    async fn test_rejects_unexpected_max_h2c_data() {
        let (queue, _peer) = scripted(0x1000).await;
        assert!(matches!(queue, Err(NvmeOfError::Connection(_))));
    }

    #[tokio::test]
    async fn test_responses_match_callers() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());

        let first = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .submit(CapsuleCommand::new(0x02), None, vec![0u8; 8])
                    .await
            })
        };
        let a = next_command(&mut peer).await;
        let second = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.submit(CapsuleCommand::new(0x00), None, Vec::new()).await })
        };
        let b = next_command(&mut peer).await;
        assert_ne!(a.cid, b.cid);

        // answer out of order, data in two segments
        peer.1.write_pdu(&respond(b.cid)).await.unwrap();
        let c2h = C2hData {
            cccid: a.cid,
            data_offset: 4,
            data_length: 4,
        };
        peer.1.marshal_with_data(&c2h, 0, &[5, 6, 7, 8]).unwrap();
        peer.1.flush().await.unwrap();
        let c2h = C2hData {
            cccid: a.cid,
            data_offset: 0,
            data_length: 4,
        };
        peer.1.marshal_with_data(&c2h, C2H_DATA_LAST, &[1, 2, 3, 4]).unwrap();
        peer.1.flush().await.unwrap();
        peer.1.write_pdu(&respond(a.cid)).await.unwrap();

        let second = second.await.unwrap().unwrap();
        assert_eq!(second.response.cid, b.cid);
        assert!(second.data.is_empty());
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.response.cid, a.cid);
        assert_eq!(first.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(queue.outstanding(), 0);

        queue.close().await;
    }

    #[tokio::test]
    async fn test_success_flag_completes_without_response() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());
        let call = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .submit(CapsuleCommand::new(0x02), None, vec![0u8; 4])
                    .await
            })
        };
        let command = next_command(&mut peer).await;
        let c2h = C2hData {
            cccid: command.cid,
            data_offset: 0,
            data_length: 4,
        };
        peer.1
            .marshal_with_data(&c2h, C2H_DATA_LAST | C2H_DATA_SUCCESS, &[7, 7, 7, 7])
            .unwrap();
        peer.1.flush().await.unwrap();

        let completion = tokio::time::timeout(std::time::Duration::from_secs(5), call)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(completion.response.cid, command.cid);
        assert!(completion.response.is_success());
        assert_eq!(completion.data, vec![7, 7, 7, 7]);
        assert_eq!(queue.outstanding(), 0);
        queue.close().await;
    }

    #[tokio::test]
    async fn test_success_flag_requires_last() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());
        let call = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .submit(CapsuleCommand::new(0x02), None, vec![0u8; 4])
                    .await
            })
        };
        let command = next_command(&mut peer).await;
        let c2h = C2hData {
            cccid: command.cid,
            data_offset: 0,
            data_length: 4,
        };
        peer.1.marshal_with_data(&c2h, C2H_DATA_SUCCESS, &[1; 4]).unwrap();
        peer.1.flush().await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), call)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(NvmeOfError::Status(NvmeStatus::InternalError))
        ));
        queue.close().await;
    }

    #[tokio::test]
    async fn test_error_status_is_returned() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());
        let call = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.submit(CapsuleCommand::new(0x55), None, Vec::new()).await })
        };
        let command = next_command(&mut peer).await;
        let mut response = respond(command.cid);
        response.set_status(NvmeStatus::InvalidOpcode);
        peer.1.write_pdu(&response).await.unwrap();

        assert!(matches!(
            call.await.unwrap(),
            Err(NvmeOfError::Status(NvmeStatus::InvalidOpcode))
        ));
        queue.close().await;
    }

    #[tokio::test]
    async fn test_unknown_cid_fails_outstanding() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());
        let call = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.submit(CapsuleCommand::new(0x00), None, Vec::new()).await })
        };
        let command = next_command(&mut peer).await;
        peer.1
            .write_pdu(&respond(command.cid.wrapping_add(100)))
            .await
            .unwrap();

        assert!(matches!(
            call.await.unwrap(),
            Err(NvmeOfError::Status(NvmeStatus::InternalError))
        ));
        let late = queue.submit(CapsuleCommand::new(0x00), None, Vec::new()).await;
        assert!(late.is_err());
        queue.close().await;
    }

    #[tokio::test]
    async fn test_termination_request_fails_outstanding() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());
        let call = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.submit(CapsuleCommand::new(0x00), None, Vec::new()).await })
        };
        next_command(&mut peer).await;
        peer.1
            .write_pdu(&TermReq::new(TerminationStatus::PduSequenceError, 0))
            .await
            .unwrap();

        assert!(call.await.unwrap().is_err());
        queue.close().await;
    }

    #[tokio::test]
    async fn test_close_resolves_in_flight() {
        let (queue, mut peer) = scripted(MAX_H2C_DATA_LENGTH).await;
        let queue = Arc::new(queue.unwrap());
        let calls: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.submit(CapsuleCommand::new(0x00), None, Vec::new()).await })
            })
            .collect();
        for _ in 0..4 {
            next_command(&mut peer).await;
        }

        queue.close().await;
        for call in calls {
            let result = tokio::time::timeout(std::time::Duration::from_secs(5), call)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(
                result,
                Err(NvmeOfError::Status(NvmeStatus::InternalError))
            ));
        }
    }
}
