// src/constants.rs

/// Well-known TFTP service port.
pub const DEFAULT_LISTEN_PORT: u16 = 69;
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rouilletftpd.conf";

/// Payload size of a full DATA block. A shorter payload ends the transfer.
pub const BLOCK_SIZE: usize = 512;

/// Receive buffer for a single datagram, large enough for any valid packet.
pub const RECV_BUFFER_SIZE: usize = 1024;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const MAX_RETRIES: u32 = 5;

pub const EPHEMERAL_PORT_MIN: u16 = 1025;
pub const EPHEMERAL_PORT_MAX: u16 = 65535;
pub const MAX_PORT_PROBES: usize = 64;

/// How many freshly allocated ports the listener tries to bind before giving up.
pub const SESSION_BIND_ATTEMPTS: usize = 8;
