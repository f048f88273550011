pub mod registry;
pub mod transfer;

#[cfg(test)]
mod test_transfer;

pub use registry::{SessionInfo, SessionLease, SessionRegistry};
pub use transfer::{
    SessionContext, SessionOutcome, SessionSettings, TransferRequest, TransferSession,
};

use std::fmt;

/// Which side sends the DATA packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// RRQ: the server sends DATA, the client ACKs.
    Read,
    /// WRQ: the client sends DATA, the server ACKs.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}
