//! Listener Dispatch: accepts inbound TCP connections on each configured
//! local port and routes each to the Coordinator whose configured remote
//! identifier matches the connecting address, closing anything else.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;

use crate::peer::CoordinatorMsg;

/// Maps a peer's remote identifier to its Coordinator's inbound channel.
pub type PeerTable = Arc<HashMap<Ipv4Addr, UnboundedSender<CoordinatorMsg>>>;

/// Runs the accept loop for one local port forever. Each configured local
/// port gets its own listener task; peers sharing a port share the table
/// lookup.
pub async fn serve(local_port: u16, peers: PeerTable) -> std::io::Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port);
    let listener = TcpListener::bind(addr).await?;
    crate::bgp_info!(port = local_port, "listening for inbound BGP connections");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                crate::bgp_warn!(error = %e, "accept failed");
                continue;
            }
        };
        dispatch(&peers, stream, peer_addr);
    }
}

fn dispatch(peers: &PeerTable, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
    let remote_ip = match peer_addr.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => {
            crate::bgp_warn!(peer = %peer_addr, "rejecting inbound IPv6 connection");
            drop(stream);
            return;
        }
    };
    match peers.get(&remote_ip) {
        Some(tx) => {
            if tx.send(CoordinatorMsg::Inbound(stream)).is_err() {
                crate::bgp_warn!(peer = %remote_ip, "coordinator gone; dropping inbound connection");
            }
        }
        None => {
            crate::bgp_debug!(peer = %remote_ip, "rejecting connection from unconfigured peer");
            drop(stream);
        }
    }
}
