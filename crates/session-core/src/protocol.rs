//! RPC wire protocol.
//!
//! Requests and replies share one envelope:
//!
//! ```text
//! | call id: u32 BE | opcode: u16 BE | payload: 0..506 bytes |
//! ```
//!
//! Payloads are text joined with [`FIELD_DELIMITER`]:
//! - `SESSION_READ` request: `sessionId_version`
//! - `SESSION_READ` reply: the encoded record, or `sessionId_-1_NULL` with `NO_REPLY`
//! - `SESSION_WRITE` request: the encoded record; reply: the custodian's address
//! - `GET_VIEW` reply: the `_`-joined view, or the placeholder address when empty

use crate::record::{FIELD_DELIMITER, RecordError, SessionId, parse_version};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Largest datagram sent or accepted.
pub const MAX_DATAGRAM_LEN: usize = 512;

/// Bytes taken by call id and opcode.
pub const HEADER_LEN: usize = 6;

/// Largest payload that fits after the header.
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM_LEN - HEADER_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Payload is not UTF-8")]
    InvalidUtf8,

    #[error("Malformed payload: {0}")]
    Malformed(#[from] RecordError),
}

/// RPC operation codes. Requests use 0-2, replies use 3-4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    SessionRead = 0,
    SessionWrite = 1,
    GetView = 2,
    Reply = 3,
    NoReply = 4,
}

impl Opcode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::SessionRead),
            1 => Some(Self::SessionWrite),
            2 => Some(Self::GetView),
            3 => Some(Self::Reply),
            4 => Some(Self::NoReply),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// True for the opcodes a server answers with.
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Reply | Self::NoReply)
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SessionRead => "SESSION_READ",
            Self::SessionWrite => "SESSION_WRITE",
            Self::GetView => "GET_VIEW",
            Self::Reply => "REPLY",
            Self::NoReply => "NO_REPLY",
        };
        f.write_str(name)
    }
}

/// One datagram. The opcode stays raw so unknown codes survive decoding
/// and can be answered with `NO_REPLY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub call_id: u32,
    pub opcode: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(call_id: u32, opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            call_id,
            opcode: opcode.as_u16(),
            payload: payload.into(),
        }
    }

    /// The known opcode, if any.
    pub fn op(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode)
    }

    /// Serialize, silently truncating the payload to fit one datagram.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len().min(MAX_PAYLOAD_LEN);
        let mut buf = Vec::with_capacity(HEADER_LEN + len);
        buf.extend_from_slice(&self.call_id.to_be_bytes());
        buf.extend_from_slice(&self.opcode.to_be_bytes());
        buf.extend_from_slice(&self.payload[..len]);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }
        let call_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let opcode = u16::from_be_bytes([data[4], data[5]]);
        Ok(Self {
            call_id,
            opcode,
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

/// Arguments of a `SESSION_READ` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub id: SessionId,
    pub version: u32,
}

impl ReadRequest {
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.id, FIELD_DELIMITER, self.version)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
        let mut fields = text.split(FIELD_DELIMITER);
        let id = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or(RecordError::MissingField("session id"))?
            .parse()?;
        let version = parse_version(fields.next().ok_or(RecordError::MissingField("version"))?)?;
        Ok(Self { id, version })
    }
}

/// `NO_REPLY` payload for a failed read: echoes whatever id the caller sent.
pub fn read_miss_payload(request: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(request);
    let id = text.split(FIELD_DELIMITER).next().unwrap_or_default();
    format!("{id}{d}-1{d}NULL", d = FIELD_DELIMITER).into_bytes()
}
