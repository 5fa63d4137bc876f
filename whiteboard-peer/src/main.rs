//! Whiteboard peer.
//!
//! Serves this peer's boards over WebSocket, mirrors boards other peers
//! share through the discovery server, and reads edits from a line console.

mod console;

use clap::Parser;
use log::info;
use std::sync::Arc;
use whiteboard_collab::{EngineConfig, PeerServer, ReplicationEngine, ServerConfig, WsConnector};
use whiteboard_core::PeerAddr;

#[derive(Parser, Debug)]
#[command(name = "whiteboard-peer", about = "Shared whiteboard peer")]
struct Cli {
    /// Port to listen on for other peers
    #[arg(short, long, default_value_t = 8111)]
    port: u16,

    /// Host other peers use to reach this one; part of every board id
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Discovery server to announce shared boards to (host:port)
    #[arg(short, long)]
    discovery: Option<PeerAddr>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let local = PeerAddr::new(cli.host.clone(), cli.port);
    info!("Starting whiteboard peer {local}...");

    let engine_config = EngineConfig::default();
    let connector = WsConnector::new(engine_config.session_capacity);
    let engine = ReplicationEngine::new(local, Arc::new(connector), engine_config.clone());

    let server_config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", cli.port),
        session_capacity: engine_config.session_capacity,
    };
    let server = PeerServer::bind(server_config, engine.clone()).await?;
    let counters = server.counters();
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            log::error!("Peer server stopped: {e}");
        }
    });

    if let Some(addr) = &cli.discovery {
        if let Err(e) = engine.connect_discovery(addr).await {
            log::warn!("Discovery server {addr} unavailable: {e}");
        }
    }

    console::run(engine, counters).await?;
    info!("Peer stopped");
    Ok(())
}
