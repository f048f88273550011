pub mod error;
pub mod packet;

pub use error::TftpError;
pub use packet::{Packet, TransferMode};
