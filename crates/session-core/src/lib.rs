//! session-core: Replicated, peer-discovered session storage.
//!
//! This crate provides the runtime-agnostic parts of the session cluster:
//! - Versioned, expiring session records and the local session table
//! - A bounded membership view maintained by gossip and a bootstrap directory
//! - The RPC frame format and the server-side request dispatch
//! - The replication protocol (local-first reads, write-to-one-peer)
//! - RpcClient and Directory trait abstractions for the network and registry

pub mod directory;
pub mod handler;
pub mod protocol;
pub mod record;
pub mod replication;
pub mod rpc;
pub mod store;
pub mod view;

pub use directory::{Directory, DirectoryEntry, DirectoryError, InMemoryDirectory};
pub use handler::RequestHandler;
pub use protocol::{Frame, Opcode, ProtocolError, ReadRequest};
pub use record::{RecordError, SessionId, SessionRecord};
pub use replication::{SessionService, SessionTtl};
pub use rpc::RpcClient;
pub use store::SessionStore;
pub use view::{MAX_VIEW_SIZE, MembershipView, NULL_ADDR};
