//! session-daemon: One instance of the replicated session cluster.
//!
//! Serves session RPCs to peers over UDP and keeps its membership view fresh
//! through the shared directory file and gossip.

use anyhow::Result;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use session_daemon::{Config, FileDirectory, Node};

#[derive(Parser, Debug)]
#[command(name = "session-daemon")]
#[command(about = "Replicated session storage daemon")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RPC port shared by every instance
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind the listener and outgoing sockets to
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Address other instances reach us on (detected if not provided)
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Path of the shared directory file
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            config.rpc_port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_ip = bind;
        }
        if let Some(ip) = self.ip {
            config.advertise_ip = Some(ip);
        }
        if let Some(directory) = self.directory {
            config.directory_path = directory;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,session_daemon=debug,session_core=debug"
    } else {
        "info,session_daemon=info,session_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.into_config()?;

    info!("Starting session-daemon");
    info!("RPC address: {}", config.listen_addr());
    info!("Directory file: {:?}", config.directory_path);

    let directory = Arc::new(FileDirectory::new(config.directory_path.clone()));
    let node = Node::start(&config, directory).await?;

    info!("Node {} running. Press Ctrl+C to stop.", node.local_ip());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    node.shutdown().await;
    Ok(())
}
