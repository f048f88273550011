use crate::config::Config;
use crate::constants::{BLOCK_SIZE, RECV_BUFFER_SIZE, SESSION_BIND_ATTEMPTS};
use crate::core_session::{
    Direction, SessionContext, SessionInfo, SessionLease, SessionRegistry, SessionSettings,
    TransferRequest, TransferSession,
};
use crate::core_storage::Storage;
use crate::core_tftp::packet::encode_error;
use crate::core_tftp::{Packet, TftpError, TransferMode};
use crate::helpers::sanitize_file_name;
use anyhow::{Context, Result};
use log::{debug, error, info, trace, warn};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Accepts read and write requests on the service port and hands each one to
/// a TransferSession running on its own task.
pub struct Listener {
    socket: UdpSocket,
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    storage: Arc<dyn Storage>,
    shutdown: broadcast::Sender<()>,
    sessions: JoinSet<()>,
}

impl Listener {
    /// Binds the service socket described by `config`.
    ///
    /// # Arguments
    ///
    /// * `config` - The server configuration.
    /// * `registry` - The session table shared with every session.
    /// * `storage` - Where files are read from and written to.
    /// * `shutdown` - Fires when the server stops; sessions subscribe to it.
    pub async fn bind(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        storage: Arc<dyn Storage>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self> {
        let address = format!(
            "{}:{}",
            config.server.listen_address, config.server.listen_port
        );
        let socket = UdpSocket::bind(&address)
            .await
            .with_context(|| format!("Failed to bind TFTP port: {}", address))?;
        info!("Server listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            config,
            registry,
            storage,
            shutdown,
            sessions: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves requests until the shutdown signal fires, then waits for every
    /// session task to finish.
    pub async fn run(mut self) -> Result<()> {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((len, peer)) => self.handle_datagram(&buffer[..len], peer).await,
                    Err(e) => warn!("Failed to receive on the service port: {}", e),
                },
            }
        }

        self.drain().await;
        Ok(())
    }

    async fn handle_datagram(&mut self, datagram: &[u8], peer: SocketAddr) {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", peer, e);
                return;
            }
        };

        let (direction, file_name, mode) = match packet {
            Packet::ReadRequest { filename, mode } => (Direction::Read, filename, mode),
            Packet::WriteRequest { filename, mode } => (Direction::Write, filename, mode),
            other => {
                debug!("Ignoring {} from {} on the service port", other.kind(), peer);
                return;
            }
        };

        info!(
            "Received {} request for {:?} ({}) from {}",
            direction, file_name, mode, peer
        );

        if let Err(e) = self.accept(peer, direction, file_name, &mode).await {
            warn!("Rejected request from {}: {}", peer, e);
            if let Some((code, message)) = e.to_error_packet() {
                if let Err(e) = self.socket.send_to(&encode_error(code, message), peer).await {
                    error!("Failed to send ERROR to {}: {}", peer, e);
                }
            }
        }
    }

    /// Validates a request and starts its session.
    ///
    /// Nothing is registered unless the session actually starts, so every
    /// error returned here leaves the registry untouched.
    async fn accept(
        &mut self,
        peer: SocketAddr,
        direction: Direction,
        file_name: String,
        mode: &str,
    ) -> Result<(), TftpError> {
        let mode: TransferMode = mode.parse()?;
        if direction == Direction::Write && !self.config.server.allow_write {
            return Err(TftpError::AccessViolation(format!(
                "writes are disabled: {}",
                file_name
            )));
        }

        // 1. The first DATA block doubles as the existence check. Writes are
        // only checked for root confinement; the file is created by DATA(1).
        let first_chunk = match direction {
            Direction::Read => Some(self.storage.read(&file_name, 0, BLOCK_SIZE).await?),
            Direction::Write => {
                if sanitize_file_name(&file_name).is_none() {
                    return Err(TftpError::AccessViolation(file_name));
                }
                None
            }
        };

        // 2. Session id and its socket.
        let info = SessionInfo::new(peer, &file_name, direction);
        let (lease, socket) = self.open_session_socket(info).await?;

        // 3. Opening packet, sent before the session task exists.
        let request = TransferRequest {
            peer,
            direction,
            file_name,
            mode,
        };
        let context = SessionContext {
            storage: Arc::clone(&self.storage),
            settings: SessionSettings {
                timeout: self.config.session_timeout(),
                max_retries: self.config.server.max_retries,
            },
            shutdown: self.shutdown.subscribe(),
        };
        let session = match first_chunk {
            Some(chunk) => TransferSession::reader(lease, socket, request, chunk, context),
            None => TransferSession::writer(lease, socket, request, context),
        };
        session.transmit().await?;

        let id = session.id();
        info!(
            "Session {} started for {} ({} active)",
            id,
            peer,
            self.registry.len()
        );
        self.sessions.spawn(async move {
            // The outcome is logged by the session itself.
            let _ = session.run().await;
        });
        Ok(())
    }

    /// Allocates a session id and binds a socket to it on the listener's
    /// address. Ports held by other processes are given back and redrawn.
    async fn open_session_socket(
        &self,
        info: SessionInfo,
    ) -> Result<(SessionLease, UdpSocket), TftpError> {
        let ip: IpAddr = self.socket.local_addr()?.ip();

        for attempt in 1..=SESSION_BIND_ATTEMPTS {
            let id = self.registry.allocate(info.clone())?;
            let lease = SessionLease::new(Arc::clone(&self.registry), id);
            match UdpSocket::bind((ip, id)).await {
                Ok(socket) => return Ok((lease, socket)),
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    trace!(
                        "Port {} is taken (attempt {}/{})",
                        id,
                        attempt,
                        SESSION_BIND_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TftpError::ExhaustedIdSpace(SESSION_BIND_ATTEMPTS))
    }

    async fn drain(&mut self) {
        let live = self.registry.snapshot();
        if !live.is_empty() {
            info!("Shutting down, closing {} session(s)", live.len());
            for (id, info) in &live {
                debug!(
                    "  Session {}: {} {:?} with {} for {:?}",
                    id,
                    info.direction,
                    info.file_name,
                    info.peer,
                    info.started_at.elapsed()
                );
            }
        }
        while let Some(joined) = self.sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {}", e);
            }
        }
        info!("All sessions closed.");
    }
}
