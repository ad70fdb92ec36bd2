mod cli;
mod codec;
mod config;
mod fsm;
mod listener;
mod macros;
mod peer;
mod rib;
mod timer;
mod transport;

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::Parser;

use crate::config::Config;
use crate::peer::{Coordinator, CoordinatorMsg};
use crate::rib::LocRib;
use tokio::sync::mpsc::UnboundedSender;

/// A minimal BGP-4 speaker: per-peer session FSM, framed message I/O, and
/// connection-collision handling.
#[derive(Parser, Debug)]
#[command(name = "bgpd")]
struct Args {
    /// Path to the TOML peer configuration.
    #[arg(short, long, default_value = "bgpd.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let loc_rib = LocRib::new();
    let mut peers: HashMap<Ipv4Addr, UnboundedSender<CoordinatorMsg>> = HashMap::new();
    let mut local_ports: HashSet<u16> = HashSet::new();

    for peer_config in config.peers {
        local_ports.insert(peer_config.local_port);
        let remote_id = peer_config.remote_id;
        let speaker = peer_config.speaker.clone();
        let (tx, _join) = Coordinator::spawn(peer_config, loc_rib.clone());
        crate::bgp_info!(peer = %remote_id, speaker = %speaker, "peer configured");
        peers.insert(remote_id, tx);
    }

    let peers = Arc::new(peers);
    for port in local_ports {
        let peers = peers.clone();
        tokio::spawn(async move {
            if let Err(e) = listener::serve(port, peers).await {
                crate::bgp_error!(port, error = %e, "listener exited");
            }
        });
    }

    cli::run((*peers).clone()).await;
    Ok(())
}
