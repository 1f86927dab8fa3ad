//! UDP implementation of the session RPC client.
//!
//! Each call opens one socket bound to the local interface, then walks the
//! candidate list in order: send under a new call id, wait up to the timeout
//! for the reply carrying that id, and move on. A candidate that stays
//! silent is dropped from the membership view. The socket is closed when
//! the call returns, whichever way it returns.

use async_trait::async_trait;
use session_core::protocol::{MAX_DATAGRAM_LEN, MAX_PAYLOAD_LEN};
use session_core::{Frame, MembershipView, Opcode, RpcClient};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

/// One attempt at one candidate.
#[derive(Debug, Clone, Copy)]
struct PendingCall {
    call_id: u32,
    opcode: Opcode,
    target: SocketAddr,
    deadline: Instant,
}

/// How a single attempt ended.
#[derive(Debug)]
enum Outcome {
    Reply(Vec<u8>),
    NoReply,
    TimedOut,
}

/// Sends RPCs to peers over UDP.
pub struct UdpTransport {
    /// Local address outgoing sockets bind to
    bind_ip: IpAddr,
    /// Port every peer listens on
    rpc_port: u16,
    /// Wait per candidate
    timeout: Duration,
    /// Silent candidates are removed from here
    view: Arc<MembershipView>,
    next_call_id: AtomicU32,
}

impl UdpTransport {
    pub fn new(bind_ip: IpAddr, rpc_port: u16, timeout: Duration, view: Arc<MembershipView>) -> Self {
        Self {
            bind_ip,
            rpc_port,
            timeout,
            view,
            next_call_id: AtomicU32::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wraps on overflow.
    fn next_call_id(&self) -> u32 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Wait for the reply to `call`, skipping stray datagrams.
    async fn await_reply(socket: &UdpSocket, call: &PendingCall) -> io::Result<Outcome> {
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, from) = match timeout_at(call.deadline, socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(Outcome::TimedOut),
            };

            let frame = match Frame::decode(&buf[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Dropping datagram from {}: {}", from, e);
                    continue;
                }
            };

            if frame.call_id != call.call_id {
                debug!(
                    "Dropping stale reply from {} (call {}, waiting for {})",
                    from, frame.call_id, call.call_id
                );
                continue;
            }

            match frame.op() {
                Some(Opcode::Reply) => return Ok(Outcome::Reply(frame.payload)),
                Some(Opcode::NoReply) => return Ok(Outcome::NoReply),
                _ => {
                    debug!("Dropping non-reply opcode {} from {}", frame.opcode, from);
                }
            }
        }
    }
}

#[async_trait]
impl RpcClient for UdpTransport {
    async fn send_request(
        &self,
        opcode: Opcode,
        payload: &[u8],
        candidates: &[IpAddr],
    ) -> Option<Vec<u8>> {
        if candidates.is_empty() {
            return None;
        }

        if payload.len() > MAX_PAYLOAD_LEN {
            debug!(
                "{} payload of {} bytes truncated to {}",
                opcode,
                payload.len(),
                MAX_PAYLOAD_LEN
            );
        }

        let socket = match UdpSocket::bind(SocketAddr::new(self.bind_ip, 0)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Failed to open RPC socket on {}: {}", self.bind_ip, e);
                return None;
            }
        };

        for &peer in candidates {
            // A fresh id per attempt, so a late answer from an earlier
            // candidate can never be taken for this one's
            let call = PendingCall {
                call_id: self.next_call_id(),
                opcode,
                target: SocketAddr::new(peer, self.rpc_port),
                deadline: Instant::now() + self.timeout,
            };
            let datagram = Frame::new(call.call_id, opcode, payload).encode();

            if let Err(e) = socket.send_to(&datagram, call.target).await {
                warn!("Failed to send {} to {}: {}", call.opcode, call.target, e);
                return None;
            }

            match Self::await_reply(&socket, &call).await {
                Ok(Outcome::Reply(reply)) => {
                    debug!("{} call {} answered by {}", call.opcode, call.call_id, peer);
                    return Some(reply);
                }
                Ok(Outcome::NoReply) => {
                    debug!("{} call {} declined by {}", call.opcode, call.call_id, peer);
                }
                Ok(Outcome::TimedOut) => {
                    debug!(
                        "{} call {} to {} timed out after {:?}",
                        call.opcode, call.call_id, peer, self.timeout
                    );
                    self.view.remove_peer(&peer);
                }
                Err(e) => {
                    warn!("RPC socket failed waiting on {}: {}", call.target, e);
                    return None;
                }
            }
        }

        None
    }
}
