//! Configuration loading and management

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use session_core::{MAX_VIEW_SIZE, SessionTtl};
use tracing::{debug, warn};

/// Main configuration for one session instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// UDP port every instance listens on for RPCs (default: 5300)
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Address the listener and the outgoing RPC sockets bind to
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Address this instance is known by. Detected when absent.
    #[serde(default)]
    pub advertise_ip: Option<IpAddr>,

    /// JSON file backing the shared bootstrap directory
    #[serde(default = "default_directory_path")]
    pub directory_path: PathBuf,

    /// Per-peer RPC timeout in milliseconds (default: 2 seconds)
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Lifetime of sessions written locally, in milliseconds (default: 25 seconds)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_ms: u64,

    /// Lifetime of replicas held for other instances, in milliseconds (default: 30 seconds)
    #[serde(default = "default_replica_ttl")]
    pub replica_ttl_ms: u64,

    /// Pause between expiry sweeps in milliseconds (default: 5 seconds)
    #[serde(default = "default_gc_interval")]
    pub gc_interval_ms: u64,

    /// Base period of the directory refresh and gossip rounds (default: 5 seconds)
    #[serde(default = "default_view_refresh")]
    pub view_refresh_ms: u64,

    /// Upper bound on the membership view
    #[serde(default = "default_max_view_size")]
    pub max_view_size: usize,
}

fn default_rpc_port() -> u16 {
    5300
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_directory_path() -> PathBuf {
    PathBuf::from("session-directory.json")
}

fn default_rpc_timeout() -> u64 {
    2_000
}

fn default_session_ttl() -> u64 {
    25_000
}

fn default_replica_ttl() -> u64 {
    30_000
}

fn default_gc_interval() -> u64 {
    5_000
}

fn default_view_refresh() -> u64 {
    5_000
}

fn default_max_view_size() -> usize {
    MAX_VIEW_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_port: default_rpc_port(),
            bind_ip: default_bind_ip(),
            advertise_ip: None,
            directory_path: default_directory_path(),
            rpc_timeout_ms: default_rpc_timeout(),
            session_ttl_ms: default_session_ttl(),
            replica_ttl_ms: default_replica_ttl(),
            gc_interval_ms: default_gc_interval(),
            view_refresh_ms: default_view_refresh(),
            max_view_size: default_max_view_size(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.rpc_port)
    }

    /// The advertised address, or one detected from the routing table.
    pub fn local_ip(&self) -> IpAddr {
        match self.advertise_ip {
            Some(ip) => ip,
            None if !self.bind_ip.is_unspecified() => self.bind_ip,
            None => detect_local_ip(),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn session_ttl(&self) -> SessionTtl {
        SessionTtl {
            local: Duration::from_millis(self.session_ttl_ms),
            remote: Duration::from_millis(self.replica_ttl_ms),
        }
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn view_refresh(&self) -> Duration {
        Duration::from_millis(self.view_refresh_ms)
    }
}

/// Find the address of the interface that routes to the outside world.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel for a
/// route. Falls back to loopback on hosts without one.
pub fn detect_local_ip() -> IpAddr {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).map(|_| socket))
        .and_then(|socket| socket.local_addr());

    match probe {
        Ok(addr) if !addr.ip().is_unspecified() => {
            debug!("Detected local address {}", addr.ip());
            addr.ip()
        }
        Ok(_) => {
            warn!("No routable local address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        Err(e) => {
            warn!("Local address detection failed ({}), using loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
