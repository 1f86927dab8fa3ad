//! session-daemon library: Exposes the daemon components for testing.
//!
//! The binary wires these together through `Node`; integration tests start
//! several nodes in one process on loopback addresses.

pub mod config;
pub mod directory;
pub mod gc;
pub mod listener;
pub mod maintenance;
pub mod node;
pub mod shutdown;
pub mod transport;

// Re-export key types for convenience
pub use config::Config;
pub use directory::FileDirectory;
pub use listener::Listener;
pub use maintenance::ViewMaintenance;
pub use node::{Node, NodeHandle};
pub use transport::UdpTransport;
