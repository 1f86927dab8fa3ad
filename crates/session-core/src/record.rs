//! Session records and their canonical text encoding.
//!
//! A record travels between instances as `sessionId_version_message`. The
//! same string is used as the `SESSION_WRITE` request payload and as the
//! successful `SESSION_READ` reply, so there is exactly one encoder and one
//! decoder here.

use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;
use web_time::SystemTime;

/// Separator between fields of every text payload on the wire.
pub const FIELD_DELIMITER: char = '_';

/// Separator between the sequence number and the creator inside a session id.
const ID_DELIMITER: char = '/';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid session id: {0}")]
    InvalidId(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Missing field in record: {0}")]
    MissingField(&'static str),
}

/// Cluster-unique session identifier: a per-process sequence number plus
/// the address of the instance that created the session.
///
/// # Examples
/// ```
/// use session_core::SessionId;
///
/// let id: SessionId = "7/10.0.0.1".parse().unwrap();
/// assert_eq!(id.seq(), 7);
/// assert_eq!(id.to_string(), "7/10.0.0.1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    seq: u64,
    creator: IpAddr,
}

impl SessionId {
    pub fn new(seq: u64, creator: IpAddr) -> Self {
        Self { seq, creator }
    }

    /// Sequence number drawn from the creator's session counter.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Address of the instance that created the session.
    pub fn creator(&self) -> IpAddr {
        self.creator
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.seq, ID_DELIMITER, self.creator)
    }
}

impl FromStr for SessionId {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (seq, creator) = s
            .split_once(ID_DELIMITER)
            .ok_or_else(|| RecordError::InvalidId(s.to_string()))?;
        let seq = seq
            .parse()
            .map_err(|_| RecordError::InvalidId(s.to_string()))?;
        let creator = creator
            .parse()
            .map_err(|_| RecordError::InvalidId(s.to_string()))?;
        Ok(Self { seq, creator })
    }
}

/// Parse a version field. Negative versions (the `-1` failure marker) are
/// rejected like any other malformed value.
pub fn parse_version(s: &str) -> Result<u32, RecordError> {
    s.parse()
        .map_err(|_| RecordError::InvalidVersion(s.to_string()))
}

/// A versioned session with an opaque message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    id: SessionId,
    version: u32,
    message: String,
    /// Absolute expiry, assigned when the record is stored.
    expires_at: Option<SystemTime>,
}

impl SessionRecord {
    pub fn new(id: SessionId, version: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            version,
            message: message.into(),
            expires_at: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Bump the version; callers do this on every request cycle before
    /// writing the session back.
    pub fn increment_version(&mut self) {
        self.version = self.version.saturating_add(1);
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    pub(crate) fn set_expires_at(&mut self, at: SystemTime) {
        self.expires_at = Some(at);
    }

    /// True once `now` is strictly past the expiry. Unstored records never expire.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Encode as `sessionId_version_message`.
    pub fn encode(&self) -> String {
        format!(
            "{}{d}{}{d}{}",
            self.id,
            self.version,
            self.message,
            d = FIELD_DELIMITER
        )
    }

    /// Decode from `sessionId_version_message`.
    ///
    /// Only the first two delimiters split fields; the message keeps any
    /// further delimiters verbatim.
    pub fn decode(s: &str) -> Result<Self, RecordError> {
        let mut fields = s.splitn(3, FIELD_DELIMITER);
        let id = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or(RecordError::MissingField("session id"))?
            .parse()?;
        let version = parse_version(fields.next().ok_or(RecordError::MissingField("version"))?)?;
        let message = fields.next().ok_or(RecordError::MissingField("message"))?;
        Ok(Self::new(id, version, message))
    }
}
