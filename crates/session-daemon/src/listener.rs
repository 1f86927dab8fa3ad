//! The RPC server loop.
//!
//! Receives request datagrams, records each sender in the membership view,
//! dispatches to the `RequestHandler`, and answers the sender with the same
//! call id. Datagrams too short to carry a header are dropped silently.

use crate::shutdown::ShutdownSignal;
use anyhow::{Context, Result};
use session_core::protocol::MAX_DATAGRAM_LEN;
use session_core::{Frame, MembershipView, RequestHandler};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

/// Pause after a transient receive error.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Receive errors caused by one datagram or a stray ICMP message, after
/// which the socket is still usable.
fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

pub struct Listener {
    socket: UdpSocket,
    handler: RequestHandler,
    view: Arc<MembershipView>,
}

impl Listener {
    /// Bind the RPC port. Fails if the port is taken.
    pub async fn bind(
        addr: SocketAddr,
        handler: RequestHandler,
        view: Arc<MembershipView>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind RPC listener on {}", addr))?;
        Ok(Self {
            socket,
            handler,
            view,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve requests until shutdown or a socket failure.
    ///
    /// Transient receive errors are logged and retried after a short pause;
    /// anything else stops the listener.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        if let Ok(addr) = self.local_addr() {
            info!("RPC listener on {}", addr);
        }

        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            let received = tokio::select! {
                _ = shutdown.triggered() => break,
                result = self.socket.recv_from(&mut buf) => result,
            };

            match received {
                Ok((len, from)) => self.on_datagram(&buf[..len], from).await,
                Err(e) if is_transient(e.kind()) => {
                    warn!("RPC listener receive failed: {}", e);
                    if !shutdown.sleep(RECV_ERROR_BACKOFF).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("RPC listener socket failed, stopping: {}", e);
                    break;
                }
            }
        }

        debug!("RPC listener stopped");
    }

    async fn on_datagram(&self, data: &[u8], from: SocketAddr) {
        // Anyone who can reach us is a live member
        self.view.add_peer(from.ip());

        let request = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        let (op, payload) = self.handler.handle(request.opcode, &request.payload);
        debug!(
            "Call {} opcode {} from {} -> {}",
            request.call_id, request.opcode, from, op
        );

        let reply = Frame::new(request.call_id, op, payload).encode();
        if let Err(e) = self.socket.send_to(&reply, from).await {
            warn!("Failed to answer {}: {}", from, e);
        }
    }
}
