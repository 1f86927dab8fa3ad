//! Cross-instance session reads and writes.
//!
//! Every write lands in two places: the local store, and the first peer
//! that accepts it (the custodian). The client carries both addresses in its
//! session handle and presents them on the next request:
//!
//! - If this instance is one of them, the read is served locally and is
//!   destructive: the caller writes the session back after using it.
//! - Otherwise the listed peers are asked in order over RPC.
//!
//! Reads always present the version the client last saw, so a replayed old
//! handle finds nothing instead of a newer session.

use crate::protocol::{Opcode, ReadRequest};
use crate::record::{SessionId, SessionRecord};
use crate::rpc::RpcClient;
use crate::store::SessionStore;
use crate::view::{MembershipView, NULL_ADDR, is_placeholder};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long stored copies live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTtl {
    /// Lifetime of the copy kept by the instance that served the request (default: 25s)
    pub local: Duration,
    /// Lifetime of a replica accepted for another instance (default: 30s)
    pub remote: Duration,
}

impl Default for SessionTtl {
    fn default() -> Self {
        Self {
            local: Duration::from_secs(25),
            remote: Duration::from_secs(30),
        }
    }
}

/// Resolve a replica candidate list, skipping placeholders and garbage.
fn resolve_candidates<S: AsRef<str>>(candidates: &[S]) -> Vec<IpAddr> {
    candidates
        .iter()
        .filter_map(|c| {
            let c = c.as_ref();
            match c.parse::<IpAddr>() {
                Ok(ip) if is_placeholder(&ip) => None,
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("Ignoring unparsable replica address {:?}", c);
                    None
                }
            }
        })
        .collect()
}

/// The session surface offered to front-end request handlers.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<SessionStore>,
    view: Arc<MembershipView>,
    rpc: Arc<dyn RpcClient>,
    ttl: SessionTtl,
}

impl SessionService {
    pub fn new(
        store: Arc<SessionStore>,
        view: Arc<MembershipView>,
        rpc: Arc<dyn RpcClient>,
        ttl: SessionTtl,
    ) -> Self {
        Self {
            store,
            view,
            rpc,
            ttl,
        }
    }

    pub fn local_ip(&self) -> IpAddr {
        self.store.local_ip()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn view(&self) -> &Arc<MembershipView> {
        &self.view
    }

    pub fn ttl(&self) -> SessionTtl {
        self.ttl
    }

    /// Start a new version-1 session. It is not stored until written.
    pub fn new_session(&self, message: impl Into<String>) -> SessionRecord {
        self.store.new_session(message)
    }

    /// Fetch `id` at exactly `version` from the replicas in `candidates`.
    ///
    /// Returns `None` when no replica has that version, which callers treat
    /// as an expired session.
    pub async fn read_session<S: AsRef<str> + Sync>(
        &self,
        id: &SessionId,
        version: u32,
        candidates: &[S],
    ) -> Option<SessionRecord> {
        let replicas = resolve_candidates(candidates);

        if replicas.contains(&self.local_ip()) {
            let record = self.store.remove_session(id, Some(version));
            debug!(
                "Local read of {} v{}: {}",
                id,
                version,
                if record.is_some() { "hit" } else { "miss" }
            );
            return record;
        }

        if replicas.is_empty() {
            debug!("No replicas to read {} from", id);
            return None;
        }

        let request = ReadRequest { id: *id, version };
        let reply = self
            .rpc
            .send_request(Opcode::SessionRead, request.encode().as_bytes(), &replicas)
            .await?;

        match SessionRecord::decode(&String::from_utf8_lossy(&reply)) {
            Ok(record) if record.id() == *id && record.version() == version => Some(record),
            Ok(record) => {
                warn!(
                    "Replica answered {} v{} for {} v{}",
                    record.id(),
                    record.version(),
                    id,
                    version
                );
                None
            }
            Err(e) => {
                warn!("Undecodable SESSION_READ reply for {}: {}", id, e);
                None
            }
        }
    }

    /// Store `record` locally and on one other instance.
    ///
    /// The previous replicas from `old_candidates` are tried first, then the
    /// rest of the view. Returns `(local address, custodian address)`, with
    /// the placeholder address as custodian if no peer accepted.
    pub async fn write_session<S: AsRef<str> + Sync>(
        &self,
        record: &SessionRecord,
        old_candidates: &[S],
    ) -> (IpAddr, IpAddr) {
        let local_ip = self.local_ip();

        let mut targets: Vec<IpAddr> = Vec::new();
        for ip in resolve_candidates(old_candidates) {
            if ip != local_ip && !targets.contains(&ip) {
                self.view.add_peer(ip);
                targets.push(ip);
            }
        }
        for ip in self.view.snapshot() {
            if !targets.contains(&ip) {
                targets.push(ip);
            }
        }

        let custodian = if targets.is_empty() {
            debug!("No peers to replicate {} to", record.id());
            NULL_ADDR
        } else {
            match self
                .rpc
                .send_request(Opcode::SessionWrite, record.encode().as_bytes(), &targets)
                .await
            {
                Some(reply) => {
                    let reply = String::from_utf8_lossy(&reply);
                    reply.trim().parse::<IpAddr>().unwrap_or_else(|_| {
                        warn!("Custodian answered with bad address {:?}", reply);
                        NULL_ADDR
                    })
                }
                None => {
                    info!(
                        "No peer accepted {} v{} ({} tried)",
                        record.id(),
                        record.version(),
                        targets.len()
                    );
                    NULL_ADDR
                }
            }
        };

        self.store.add_session(record.clone(), self.ttl.local);
        (local_ip, custodian)
    }
}
