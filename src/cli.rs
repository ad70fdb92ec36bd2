//! Operator CLI: a stdin line-command loop. Commands apply to every
//! configured peer; unknown input is silently ignored, `exit` ends the
//! loop cleanly.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::fsm::Event;
use crate::peer::CoordinatorMsg;

pub type PeerHandles = HashMap<Ipv4Addr, UnboundedSender<CoordinatorMsg>>;

pub async fn run(peers: PeerHandles) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                crate::bgp_warn!(error = %e, "stdin read failed");
                break;
            }
        };
        match line.trim() {
            "exit" => break,
            "start" => broadcast(&peers, Event::ManualStart),
            "stop" => broadcast(&peers, Event::ManualStop),
            "show fsm" => show(&peers, |tx, reply| {
                let _ = tx.send(CoordinatorMsg::ShowFsm(reply));
            })
            .await,
            "show device" => show(&peers, |tx, reply| {
                let _ = tx.send(CoordinatorMsg::ShowDevice(reply));
            })
            .await,
            "show rib" => show(&peers, |tx, reply| {
                let _ = tx.send(CoordinatorMsg::ShowRib(false, reply));
            })
            .await,
            "show rib detail" => show(&peers, |tx, reply| {
                let _ = tx.send(CoordinatorMsg::ShowRib(true, reply));
            })
            .await,
            _ => {}
        }
    }
}

fn broadcast(peers: &PeerHandles, event: Event) {
    for tx in peers.values() {
        let _ = tx.send(CoordinatorMsg::Fsm(event.clone()));
    }
}

async fn show(peers: &PeerHandles, send: impl Fn(&UnboundedSender<CoordinatorMsg>, oneshot::Sender<String>)) {
    for tx in peers.values() {
        let (reply_tx, reply_rx) = oneshot::channel();
        send(tx, reply_tx);
        if let Ok(line) = reply_rx.await {
            println!("{line}");
        }
    }
}
