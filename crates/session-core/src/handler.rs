//! Server-side dispatch of RPC requests.
//!
//! Socket-free: the Listener daemon decodes the frame, records the sender
//! in the view, and hands the opcode and payload here. Nothing in this path
//! fails; bad input is answered with `NO_REPLY`.

use crate::protocol::{Opcode, ReadRequest, read_miss_payload};
use crate::record::SessionRecord;
use crate::store::SessionStore;
use crate::view::MembershipView;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Answers `SESSION_READ`, `SESSION_WRITE` and `GET_VIEW` for one instance.
#[derive(Clone)]
pub struct RequestHandler {
    store: Arc<SessionStore>,
    view: Arc<MembershipView>,
    /// Lifetime of replicas accepted on behalf of another instance
    replica_ttl: Duration,
}

impl RequestHandler {
    pub fn new(store: Arc<SessionStore>, view: Arc<MembershipView>, replica_ttl: Duration) -> Self {
        Self {
            store,
            view,
            replica_ttl,
        }
    }

    /// Handle one request, returning the reply opcode and payload.
    pub fn handle(&self, opcode: u16, payload: &[u8]) -> (Opcode, Vec<u8>) {
        match Opcode::from_u16(opcode) {
            Some(Opcode::SessionRead) => self.session_read(payload),
            Some(Opcode::SessionWrite) => self.session_write(payload),
            Some(Opcode::GetView) => self.get_view(payload),
            Some(op) => {
                debug!("Got reply opcode {} as a request", op);
                (Opcode::NoReply, Vec::new())
            }
            None => {
                debug!("Unknown opcode {}", opcode);
                (Opcode::NoReply, Vec::new())
            }
        }
    }

    fn session_read(&self, payload: &[u8]) -> (Opcode, Vec<u8>) {
        let request = match ReadRequest::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                debug!("Malformed SESSION_READ: {}", e);
                return (Opcode::NoReply, read_miss_payload(payload));
            }
        };

        match self.store.get_session(&request.id, Some(request.version)) {
            Some(record) => (Opcode::Reply, record.encode().into_bytes()),
            None => {
                debug!("SESSION_READ miss for {} v{}", request.id, request.version);
                (Opcode::NoReply, read_miss_payload(payload))
            }
        }
    }

    fn session_write(&self, payload: &[u8]) -> (Opcode, Vec<u8>) {
        let custodian = self.store.local_ip().to_string().into_bytes();
        let record = std::str::from_utf8(payload)
            .map_err(|e| e.to_string())
            .and_then(|text| SessionRecord::decode(text).map_err(|e| e.to_string()));

        match record {
            Ok(record) => {
                debug!(
                    "Accepting replica of {} v{}",
                    record.id(),
                    record.version()
                );
                self.store.add_session(record, self.replica_ttl);
                (Opcode::Reply, custodian)
            }
            Err(e) => {
                debug!("Malformed SESSION_WRITE: {}", e);
                (Opcode::NoReply, custodian)
            }
        }
    }

    fn get_view(&self, payload: &[u8]) -> (Opcode, Vec<u8>) {
        // Callers advertise their own address in the request
        self.view.merge_wire(&String::from_utf8_lossy(payload));
        (Opcode::Reply, self.view.to_wire_string().into_bytes())
    }
}
