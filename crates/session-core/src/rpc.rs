//! RpcClient trait: the request side of the RPC transport.
//!
//! Implementations:
//! - `UdpTransport` (in session-daemon) - one datagram socket per call
//!
//! The replication protocol and gossip only see this trait, so they can be
//! driven by an in-process fake in tests.

use crate::protocol::Opcode;
use async_trait::async_trait;
use std::net::IpAddr;

/// Sends one request to a list of candidate peers.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Try `candidates` strictly in order, one at a time, and return the
    /// payload of the first `REPLY`.
    ///
    /// A peer that does not answer in time is dropped from the membership
    /// view; a `NO_REPLY` moves on to the next candidate. Returns `None`
    /// when every candidate failed or the channel itself failed.
    async fn send_request(
        &self,
        opcode: Opcode,
        payload: &[u8],
        candidates: &[IpAddr],
    ) -> Option<Vec<u8>>;
}
