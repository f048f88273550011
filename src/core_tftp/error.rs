// Error taxonomy for the TFTP core
use crate::core_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TftpError {
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unsupported transfer mode: {0}")]
    UnsupportedMode(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Access violation: {0}")]
    AccessViolation(String),

    #[error("Storage I/O error: {0}")]
    StorageIo(String),

    #[error("Gave up after {0} consecutive timeouts")]
    TimeoutExhausted(u32),

    #[error("No free session id after {0} probes")]
    ExhaustedIdSpace(usize),

    #[error("Peer aborted the transfer with error {code}: {message}")]
    PeerAborted { code: u16, message: String },

    #[error("Socket error: {0}")]
    Network(#[from] std::io::Error),
}

impl TftpError {
    /// Returns the ERROR packet (code, message) owed to the peer, if any.
    ///
    /// Malformed datagrams, exhausted retries, peer aborts and socket failures
    /// are answered with silence.
    pub fn to_error_packet(&self) -> Option<(u16, &'static str)> {
        match self {
            TftpError::UnsupportedMode(_) => Some((0, "unsupported mode")),
            TftpError::FileNotFound(_) => Some((1, "file not found")),
            TftpError::AccessViolation(_) => Some((2, "access violation")),
            TftpError::StorageIo(_) => Some((2, "disk error")),
            TftpError::ExhaustedIdSpace(_) => Some((3, "server busy")),
            TftpError::MalformedPacket(_)
            | TftpError::TimeoutExhausted(_)
            | TftpError::PeerAborted { .. }
            | TftpError::Network(_) => None,
        }
    }
}

impl From<StorageError> for TftpError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(name) => TftpError::FileNotFound(name),
            StorageError::AccessDenied(name) => TftpError::AccessViolation(name),
            e @ StorageError::Io { .. } => TftpError::StorageIo(e.to_string()),
        }
    }
}
