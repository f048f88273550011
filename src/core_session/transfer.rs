//! One client transfer, from the initial packet to the close.
//!
//! A session owns its socket and runs on its own task. The protocol is strictly
//! lock-step: exactly one packet is waiting for an answer at any time and that
//! packet is kept verbatim in `last_sent` for retransmission.

use crate::constants::{BLOCK_SIZE, RECV_BUFFER_SIZE};
use crate::core_session::registry::SessionLease;
use crate::core_session::Direction;
use crate::core_storage::{Storage, StorageError};
use crate::core_tftp::packet::{encode_ack, encode_data, encode_error};
use crate::core_tftp::{Packet, TftpError, TransferMode};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};

/// A validated read or write request.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub peer: SocketAddr,
    pub direction: Direction,
    pub file_name: String,
    pub mode: TransferMode,
}

/// Retransmission policy of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Everything a session borrows from the server.
pub struct SessionContext {
    pub storage: Arc<dyn Storage>,
    pub settings: SessionSettings,
    pub shutdown: broadcast::Receiver<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed,
}

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The last block was exchanged; carries the number of file bytes moved.
    Completed(u64),
    /// The server is shutting down.
    Shutdown,
}

enum Step {
    Ignored,
    Advanced,
    Finished(Result<SessionOutcome, TftpError>),
}

pub struct TransferSession {
    lease: SessionLease,
    socket: UdpSocket,
    request: TransferRequest,
    storage: Arc<dyn Storage>,
    settings: SessionSettings,
    shutdown: broadcast::Receiver<()>,
    state: SessionState,
    expected_block: u16,
    offset: u64,
    last_sent: Vec<u8>,
    last_payload_len: usize,
    consecutive_timeouts: u32,
}

impl TransferSession {
    /// A read session whose first block, `first_chunk`, is already in hand.
    /// The session expects ACK(1) next.
    pub fn reader(
        lease: SessionLease,
        socket: UdpSocket,
        request: TransferRequest,
        first_chunk: Vec<u8>,
        context: SessionContext,
    ) -> Self {
        let last_sent = encode_data(1, &first_chunk);
        let mut session = Self::new(lease, socket, request, last_sent, context);
        session.expected_block = 1;
        session.offset = first_chunk.len() as u64;
        session.last_payload_len = first_chunk.len();
        session
    }

    /// A write session. It opens with ACK(0) and expects DATA(1) next.
    pub fn writer(
        lease: SessionLease,
        socket: UdpSocket,
        request: TransferRequest,
        context: SessionContext,
    ) -> Self {
        Self::new(lease, socket, request, encode_ack(0), context)
    }

    fn new(
        lease: SessionLease,
        socket: UdpSocket,
        request: TransferRequest,
        last_sent: Vec<u8>,
        context: SessionContext,
    ) -> Self {
        Self {
            lease,
            socket,
            request,
            storage: context.storage,
            settings: context.settings,
            shutdown: context.shutdown,
            state: SessionState::Active,
            expected_block: 0,
            offset: 0,
            last_sent,
            last_payload_len: 0,
            consecutive_timeouts: 0,
        }
    }

    pub fn id(&self) -> u16 {
        self.lease.id()
    }

    /// Sends `last_sent` to the peer. The listener calls this once for the
    /// opening packet; the session calls it for every later packet.
    pub async fn transmit(&self) -> Result<(), TftpError> {
        self.socket.send_to(&self.last_sent, self.request.peer).await?;
        Ok(())
    }

    /// Runs the session to its end. The socket is closed and the id released
    /// when the session is dropped here, whatever the outcome.
    pub async fn run(mut self) -> Result<SessionOutcome, TftpError> {
        debug!(
            "Session {}: {} of {:?} in {} mode",
            self.id(),
            self.request.direction,
            self.request.file_name,
            self.request.mode
        );
        let result = self.exchange().await;
        self.state = SessionState::Closed;

        let id = self.id();
        debug!("Session {}: {:?}", id, self.state);
        let peer = self.request.peer;
        let name = &self.request.file_name;
        match &result {
            Ok(SessionOutcome::Completed(bytes)) => info!(
                "Session {}: {} of {:?} with {} complete ({} bytes)",
                id, self.request.direction, name, peer, bytes
            ),
            Ok(SessionOutcome::Shutdown) => {
                info!("Session {}: closed by server shutdown", id)
            }
            Err(TftpError::TimeoutExhausted(retries)) => warn!(
                "Session {}: {} gave no answer after {} retransmissions, abandoning",
                id, peer, retries
            ),
            Err(e) => error!("Session {}: transfer of {:?} aborted: {}", id, name, e),
        }
        result
    }

    async fn exchange(&mut self) -> Result<SessionOutcome, TftpError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut deadline = Instant::now() + self.settings.timeout;

        loop {
            let received = tokio::select! {
                _ = self.shutdown.recv() => return Ok(SessionOutcome::Shutdown),
                received = timeout_at(deadline, self.socket.recv_from(&mut buf)) => received,
            };

            let (len, from) = match received {
                Err(_elapsed) => {
                    self.consecutive_timeouts += 1;
                    if self.consecutive_timeouts > self.settings.max_retries {
                        return Err(TftpError::TimeoutExhausted(self.settings.max_retries));
                    }
                    warn!(
                        "Session {}: timeout {}/{}, retransmitting",
                        self.id(),
                        self.consecutive_timeouts,
                        self.settings.max_retries
                    );
                    self.transmit().await?;
                    deadline = Instant::now() + self.settings.timeout;
                    continue;
                }
                Ok(result) => result?,
            };

            if from != self.request.peer {
                warn!(
                    "Session {}: ignoring packet from unknown peer {}",
                    self.id(),
                    from
                );
                continue;
            }

            let packet = match Packet::decode(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Session {}: dropping datagram: {}", self.id(), e);
                    continue;
                }
            };

            match self.handle(packet).await {
                Step::Ignored => {}
                Step::Advanced => deadline = Instant::now() + self.settings.timeout,
                Step::Finished(result) => return result,
            }
        }
    }

    async fn handle(&mut self, packet: Packet) -> Step {
        match (self.request.direction, packet) {
            (Direction::Read, Packet::Ack { block }) => self.on_ack(block).await,
            (Direction::Write, Packet::Data { block, payload }) => {
                self.on_data(block, payload).await
            }
            (_, Packet::Error { code, message }) => {
                Step::Finished(Err(TftpError::PeerAborted { code, message }))
            }
            (_, other) => {
                debug!("Session {}: ignoring unexpected {}", self.id(), other.kind());
                Step::Ignored
            }
        }
    }

    async fn on_ack(&mut self, block: u16) -> Step {
        if block != self.expected_block {
            debug!(
                "Session {}: ignoring ACK({}) while waiting for ACK({})",
                self.id(),
                block,
                self.expected_block
            );
            return Step::Ignored;
        }
        if self.last_payload_len < BLOCK_SIZE {
            return Step::Finished(Ok(SessionOutcome::Completed(self.offset)));
        }

        let chunk = match self
            .storage
            .read(&self.request.file_name, self.offset, BLOCK_SIZE)
            .await
        {
            Ok(chunk) => chunk,
            Err(e) => return self.abort(mid_transfer_error(e)).await,
        };

        let next = block.wrapping_add(1);
        self.last_sent = encode_data(next, &chunk);
        self.last_payload_len = chunk.len();
        self.offset += chunk.len() as u64;
        self.expected_block = next;
        self.consecutive_timeouts = 0;

        match self.transmit().await {
            Ok(()) => Step::Advanced,
            Err(e) => Step::Finished(Err(e)),
        }
    }

    async fn on_data(&mut self, block: u16, payload: Vec<u8>) -> Step {
        if block != self.expected_block.wrapping_add(1) {
            debug!(
                "Session {}: ignoring DATA({}) while waiting for DATA({})",
                self.id(),
                block,
                self.expected_block.wrapping_add(1)
            );
            return Step::Ignored;
        }

        if let Err(e) = self
            .storage
            .write(&self.request.file_name, self.offset, &payload)
            .await
        {
            return self.abort(mid_transfer_error(e)).await;
        }

        self.offset += payload.len() as u64;
        self.last_sent = encode_ack(block);
        self.last_payload_len = payload.len();
        self.expected_block = block;
        self.consecutive_timeouts = 0;

        if let Err(e) = self.transmit().await {
            return Step::Finished(Err(e));
        }
        if payload.len() < BLOCK_SIZE {
            Step::Finished(Ok(SessionOutcome::Completed(self.offset)))
        } else {
            Step::Advanced
        }
    }

    /// Tells the peer why the transfer stops, then closes the session.
    async fn abort(&self, error: TftpError) -> Step {
        if let Some((code, message)) = error.to_error_packet() {
            let packet = encode_error(code, message);
            if let Err(e) = self.socket.send_to(&packet, self.request.peer).await {
                debug!("Session {}: could not deliver ERROR: {}", self.id(), e);
            }
        }
        Step::Finished(Err(error))
    }
}

/// Once a session exists its file is known to be reachable, so a missing path
/// is reported as a disk error rather than "file not found".
fn mid_transfer_error(error: StorageError) -> TftpError {
    match error {
        StorageError::NotFound(name) => TftpError::StorageIo(format!("{} is gone", name)),
        other => other.into(),
    }
}
