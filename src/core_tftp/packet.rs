//! TFTP packet codec (RFC 1350 layouts).
//!
//! Every integer field is a big-endian `u16`. Strings are NUL-terminated and
//! must be valid UTF-8.

use crate::constants::BLOCK_SIZE;
#[cfg(test)]
use crate::core_session::Direction;
use crate::core_tftp::error::TftpError;
use std::fmt;
use std::str::FromStr;

mod field {
    use std::ops::{Range, RangeFrom};

    pub const OPCODE: Range<usize> = 0..2;
    pub const BLOCK: Range<usize> = 2..4;
    pub const CODE: Range<usize> = 2..4;
    pub const PAYLOAD: RangeFrom<usize> = 4..;
    pub const REQUEST: RangeFrom<usize> = 2..;
    pub const MESSAGE: RangeFrom<usize> = 4..;
}

/// The five TFTP opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
}

impl Opcode {
    fn from_u16(value: u16) -> Result<Opcode, TftpError> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            other => Err(TftpError::MalformedPacket(format!(
                "unknown opcode {}",
                other
            ))),
        }
    }
}

/// Transfer modes accepted by the server. Both move the file bytes unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Netascii,
    Octet,
}

impl FromStr for TransferMode {
    type Err = TftpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "netascii" => Ok(TransferMode::Netascii),
            "octet" => Ok(TransferMode::Octet),
            _ => Err(TftpError::UnsupportedMode(s.to_string())),
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Netascii => f.write_str("netascii"),
            TransferMode::Octet => f.write_str("octet"),
        }
    }
}

/// A decoded TFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest { filename: String, mode: String },
    WriteRequest { filename: String, mode: String },
    Data { block: u16, payload: Vec<u8> },
    Ack { block: u16 },
    Error { code: u16, message: String },
}

impl Packet {
    /// Decodes a datagram.
    ///
    /// Fails with `MalformedPacket` on an unknown opcode, a packet shorter
    /// than its minimum length, an unterminated or non UTF-8 string field,
    /// an empty request filename, or a DATA payload over 512 bytes.
    /// Anything after a request's mode terminator is ignored.
    pub fn decode(buf: &[u8]) -> Result<Packet, TftpError> {
        if buf.len() < field::OPCODE.end {
            return Err(TftpError::MalformedPacket(format!(
                "{} byte datagram has no opcode",
                buf.len()
            )));
        }
        match Opcode::from_u16(read_be_u16(&buf[field::OPCODE]))? {
            opcode @ (Opcode::Rrq | Opcode::Wrq) => {
                let body = &buf[field::REQUEST];
                let (filename, rest) = take_cstr(body, "filename")?;
                let (mode, _options) = take_cstr(rest, "mode")?;
                if filename.is_empty() {
                    return Err(TftpError::MalformedPacket("empty filename".into()));
                }
                let filename = filename.to_string();
                let mode = mode.to_string();
                Ok(if opcode == Opcode::Rrq {
                    Packet::ReadRequest { filename, mode }
                } else {
                    Packet::WriteRequest { filename, mode }
                })
            }
            Opcode::Data => {
                if buf.len() < field::BLOCK.end {
                    return Err(TftpError::MalformedPacket("DATA without block".into()));
                }
                let payload = &buf[field::PAYLOAD];
                if payload.len() > BLOCK_SIZE {
                    return Err(TftpError::MalformedPacket(format!(
                        "DATA payload of {} bytes",
                        payload.len()
                    )));
                }
                Ok(Packet::Data {
                    block: read_be_u16(&buf[field::BLOCK]),
                    payload: payload.to_vec(),
                })
            }
            Opcode::Ack => {
                if buf.len() != field::BLOCK.end {
                    return Err(TftpError::MalformedPacket(format!(
                        "ACK of {} bytes",
                        buf.len()
                    )));
                }
                Ok(Packet::Ack {
                    block: read_be_u16(&buf[field::BLOCK]),
                })
            }
            Opcode::Error => {
                if buf.len() < field::MESSAGE.start + 1 {
                    return Err(TftpError::MalformedPacket("ERROR too short".into()));
                }
                let (message, _) = take_cstr(&buf[field::MESSAGE], "message")?;
                Ok(Packet::Error {
                    code: read_be_u16(&buf[field::CODE]),
                    message: message.to_string(),
                })
            }
        }
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::ReadRequest { filename, mode } => {
                encode_request(Direction::Read, filename, mode)
            }
            Packet::WriteRequest { filename, mode } => {
                encode_request(Direction::Write, filename, mode)
            }
            Packet::Data { block, payload } => encode_data(*block, payload),
            Packet::Ack { block } => encode_ack(*block),
            Packet::Error { code, message } => encode_error(*code, message),
        }
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::ReadRequest { .. } => "RRQ",
            Packet::WriteRequest { .. } => "WRQ",
            Packet::Data { .. } => "DATA",
            Packet::Ack { .. } => "ACK",
            Packet::Error { .. } => "ERROR",
        }
    }
}

/// Builds a DATA packet. `payload` must not exceed `BLOCK_SIZE`.
pub fn encode_data(block: u16, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= BLOCK_SIZE);
    let mut packet = Vec::with_capacity(field::PAYLOAD.start + payload.len());
    packet.extend_from_slice(&(Opcode::Data as u16).to_be_bytes());
    packet.extend_from_slice(&block.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

pub fn encode_ack(block: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(field::BLOCK.end);
    packet.extend_from_slice(&(Opcode::Ack as u16).to_be_bytes());
    packet.extend_from_slice(&block.to_be_bytes());
    packet
}

pub fn encode_error(code: u16, message: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(field::MESSAGE.start + message.len() + 1);
    packet.extend_from_slice(&(Opcode::Error as u16).to_be_bytes());
    packet.extend_from_slice(&code.to_be_bytes());
    packet.extend_from_slice(message.as_bytes());
    packet.push(0);
    packet
}

#[cfg(test)]
pub fn encode_request(direction: Direction, filename: &str, mode: &str) -> Vec<u8> {
    let opcode = match direction {
        Direction::Read => Opcode::Rrq,
        Direction::Write => Opcode::Wrq,
    };
    let mut packet = Vec::with_capacity(field::REQUEST.start + filename.len() + mode.len() + 2);
    packet.extend_from_slice(&(opcode as u16).to_be_bytes());
    packet.extend_from_slice(filename.as_bytes());
    packet.push(0);
    packet.extend_from_slice(mode.as_bytes());
    packet.push(0);
    packet
}

fn read_be_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// Splits a NUL-terminated UTF-8 string off the front of `buf`.
fn take_cstr<'a>(buf: &'a [u8], what: &str) -> Result<(&'a str, &'a [u8]), TftpError> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| TftpError::MalformedPacket(format!("unterminated {}", what)))?;
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|_| TftpError::MalformedPacket(format!("{} is not UTF-8", what)))?;
    Ok((s, &buf[end + 1..]))
}
