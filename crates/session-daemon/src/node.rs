//! Wiring of one session instance.
//!
//! `Node::start` builds the store, view, transport and service, binds the
//! listener, and spawns the three background loops: the RPC listener, the
//! expiry sweep, and view maintenance. The returned handle exposes the
//! service to front ends and stops everything on `shutdown`.

use crate::config::Config;
use crate::gc::run_gc;
use crate::listener::Listener;
use crate::maintenance::ViewMaintenance;
use crate::shutdown::{self, ShutdownTrigger};
use crate::transport::UdpTransport;
use anyhow::Result;
use session_core::{
    Directory, MembershipView, RequestHandler, RpcClient, SessionService, SessionStore,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Node;

impl Node {
    /// Start an instance with `config`, bootstrapping through `directory`.
    pub async fn start(config: &Config, directory: Arc<dyn Directory>) -> Result<NodeHandle> {
        let local_ip = config.local_ip();
        let ttl = config.session_ttl();

        let store = Arc::new(SessionStore::new(local_ip));
        let view = Arc::new(MembershipView::with_bound(local_ip, config.max_view_size));
        let handler = RequestHandler::new(Arc::clone(&store), Arc::clone(&view), ttl.remote);

        let listener = Listener::bind(config.listen_addr(), handler, Arc::clone(&view)).await?;
        let listen_addr = listener.local_addr()?;

        let transport: Arc<dyn RpcClient> = Arc::new(UdpTransport::new(
            config.bind_ip,
            config.rpc_port,
            config.rpc_timeout(),
            Arc::clone(&view),
        ));
        let service = SessionService::new(
            Arc::clone(&store),
            Arc::clone(&view),
            Arc::clone(&transport),
            ttl,
        );

        let (trigger, signal) = shutdown::channel();
        let maintenance = ViewMaintenance::new(
            Arc::clone(&view),
            directory,
            transport,
            config.view_refresh(),
        );

        let tasks = vec![
            tokio::spawn(listener.run(signal.clone())),
            tokio::spawn(run_gc(Arc::clone(&store), config.gc_interval(), signal.clone())),
            tokio::spawn(maintenance.run(signal)),
        ];

        info!("Session node {} started on {}", local_ip, listen_addr);

        Ok(NodeHandle {
            service,
            listen_addr,
            trigger,
            tasks,
        })
    }
}

/// A running instance.
pub struct NodeHandle {
    service: SessionService,
    listen_addr: SocketAddr,
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// The session operations for front-end handlers.
    pub fn service(&self) -> &SessionService {
        &self.service
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.service.store()
    }

    pub fn view(&self) -> &Arc<MembershipView> {
        self.service.view()
    }

    pub fn local_ip(&self) -> IpAddr {
        self.service.local_ip()
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Stop the background loops and wait for them to exit.
    pub async fn shutdown(self) {
        self.trigger.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Session node {} stopped", self.service.local_ip());
    }
}
