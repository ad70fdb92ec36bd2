//! The Adj-RIB / Loc-RIB sink the Action Executor forwards converted
//! `UPDATE` messages to.
//!
//! Route selection and policy are an external collaborator's job; this
//! module only needs to satisfy the narrow interface the FSM's
//! `Initiate_rib`/`Process_update_msg` actions drive: somewhere to land a
//! converted update and fan it out to whatever is subscribed. Modeled on
//! the subscription shape in `adj_rib.rs`, reduced to IPv4 unicast with no
//! VPN/route-distinguisher keying or attribute interning.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::codec::UpdateMessage;

/// An `UPDATE` message converted to the RIB's own representation, tagged
/// with the peer it arrived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedUpdate {
    pub remote_id: Ipv4Addr,
    pub update: UpdateMessage,
}

/// Namespace for constructing an [`AdjRibHandle`]; mirrors the
/// `AdjRib::create(remote_id, on_converted_update)` shape external RIB
/// collaborators expose.
pub struct AdjRib;

impl AdjRib {
    pub fn create(
        remote_id: Ipv4Addr,
        on_converted_update: impl Fn(ConvertedUpdate) + Send + Sync + 'static,
    ) -> AdjRibHandle {
        AdjRibHandle {
            remote_id,
            sink: Box::new(on_converted_update),
        }
    }
}

/// A live per-peer Adj-RIB-In or Adj-RIB-Out binding. `Peer Runtime` holds
/// at most one of each behind `Option`, created together by `Initiate_rib`
/// and dropped together by `Release_rib`.
pub struct AdjRibHandle {
    pub remote_id: Ipv4Addr,
    sink: Box<dyn Fn(ConvertedUpdate) + Send + Sync>,
}

impl AdjRibHandle {
    pub fn handle_update(&self, converted: ConvertedUpdate) {
        (self.sink)(converted);
    }
}

impl std::fmt::Debug for AdjRibHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdjRibHandle")
            .field("remote_id", &self.remote_id)
            .finish()
    }
}

/// A signal delivered to the shared Loc-RIB: a converted update from some
/// peer's Adj-RIB-In, or a subscription change from a peer's Adj-RIB-Out.
pub enum Signal {
    Update(ConvertedUpdate, Ipv4Addr),
    Subscribe(Arc<AdjRibHandle>),
    Unsubscribe(Arc<AdjRibHandle>),
}

#[derive(Default)]
struct LocRibInner {
    /// Last update received per originating peer. No best-path selection:
    /// out of scope for this collaborator.
    routes: HashMap<Ipv4Addr, ConvertedUpdate>,
    subscribers: Vec<Arc<AdjRibHandle>>,
}

/// The local speaker's shared Loc-RIB: the one cross-peer resource in the
/// system, accessed only through `handle_signal`.
pub struct LocRib {
    inner: Mutex<LocRibInner>,
}

pub type LocRibHandle = Arc<LocRib>;

impl LocRib {
    pub fn new() -> LocRibHandle {
        Arc::new(LocRib {
            inner: Mutex::new(LocRibInner::default()),
        })
    }

    pub fn handle_signal(&self, signal: Signal) {
        let mut inner = self.inner.lock().expect("loc-rib mutex poisoned");
        match signal {
            Signal::Update(converted, remote_id) => {
                inner.routes.insert(remote_id, converted.clone());
                for sub in &inner.subscribers {
                    sub.handle_update(converted.clone());
                }
            }
            Signal::Subscribe(adj_out) => inner.subscribers.push(adj_out),
            Signal::Unsubscribe(adj_out) => {
                inner.subscribers.retain(|s| !Arc::ptr_eq(s, &adj_out));
            }
        }
    }

    pub fn route_count(&self) -> usize {
        self.inner.lock().expect("loc-rib mutex poisoned").routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn converted(remote_id: Ipv4Addr) -> ConvertedUpdate {
        ConvertedUpdate {
            remote_id,
            update: UpdateMessage::default(),
        }
    }

    #[test]
    fn adj_rib_forwards_updates_to_its_sink() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let handle = AdjRib::create(Ipv4Addr::new(1, 1, 1, 1), move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        handle.handle_update(converted(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loc_rib_fans_out_updates_to_subscribers() {
        let loc_rib = LocRib::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let adj_out = Arc::new(AdjRib::create(Ipv4Addr::new(9, 9, 9, 9), move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }));
        loc_rib.handle_signal(Signal::Subscribe(adj_out.clone()));
        loc_rib.handle_signal(Signal::Update(
            converted(Ipv4Addr::new(1, 1, 1, 1)),
            Ipv4Addr::new(1, 1, 1, 1),
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(loc_rib.route_count(), 1);

        loc_rib.handle_signal(Signal::Unsubscribe(adj_out));
        loc_rib.handle_signal(Signal::Update(
            converted(Ipv4Addr::new(2, 2, 2, 2)),
            Ipv4Addr::new(2, 2, 2, 2),
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 1, "unsubscribed sink must not fire again");
    }
}
