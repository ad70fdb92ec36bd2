//! The Peer Connection Coordinator: owns one neighbor's mutable runtime
//! state, translates TCP/timer events into FSM events, executes the
//! actions the FSM emits, and arbitrates connection collisions.
//!
//! One Coordinator runs as a single tokio task per configured peer; all
//! mutation of its [`PeerRuntime`] happens on that task, serialized through
//! an `mpsc` channel of [`CoordinatorMsg`] — the same shape as the
//! teacher's `Message::Event(ident, Event)` dispatch, but keyed by channel
//! ownership instead of an `ident` lookup since each peer gets its own task.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::{self, Message, OpenMessage};
use crate::config::PeerConfig;
use crate::fsm::{self, Action, Event, FsmValue, State};
use crate::rib::{AdjRib, AdjRibHandle, ConvertedUpdate, LocRibHandle, Signal};
use crate::timer::Timer;
use crate::transport::{FramedReader, FramedWriter, ReadError};

/// One configured neighbor's full mutable state, per the runtime shape the
/// Coordinator is required to maintain invariants over (`flow = None` iff
/// no reader, `state = IDLE` iff everything else is `None`, ...).
pub struct PeerRuntime {
    pub remote_id: Ipv4Addr,
    pub local_id: Ipv4Addr,
    pub local_asn: u32,
    pub remote_port: u16,
    pub local_port: u16,
    pub speaker: String,

    pub fsm: FsmValue,
    pub flow: Option<Connection>,
    pub conn_retry_timer: Option<Timer>,
    pub hold_timer: Option<Timer>,
    pub keepalive_timer: Option<Timer>,
    pub conn_starter: Option<JoinHandle<()>>,
    pub flow_reader: Option<JoinHandle<()>>,
    pub input_rib: Option<Arc<AdjRibHandle>>,
    pub output_rib: Option<Arc<AdjRibHandle>>,
    pub loc_rib: LocRibHandle,
    pub counters: PeerCounter,

    /// One independent epoch per cancellable resource. Each is bumped only
    /// when *that* resource's task is replaced or torn down — arming the
    /// hold timer must not invalidate a flow reader or the connect-retry
    /// timer that happen to still be live. Every message a resource's task
    /// sends back carries the epoch it was spawned under; the Coordinator
    /// discards anything whose epoch no longer matches the matching field
    /// here, which is how a stale callback racing a cancellation is
    /// recognized and ignored rather than re-entering the FSM.
    conn_retry_epoch: u64,
    hold_epoch: u64,
    keepalive_epoch: u64,
    connect_epoch: u64,
    flow_epoch: u64,
    /// Source of fresh epoch values, shared across all five fields above.
    next_epoch: u64,
}

/// Message counters surfaced by `show fsm`/`show device`, the one piece
/// of `zebra-rs/src/bgp/peer.rs`'s `PeerCounter` this crate carries over.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerCounter {
    pub sent: u64,
    pub rcvd: u64,
}

impl PeerRuntime {
    fn new(config: &PeerConfig, loc_rib: LocRibHandle) -> Self {
        PeerRuntime {
            remote_id: config.remote_id,
            local_id: config.local_id,
            local_asn: config.local_asn,
            remote_port: config.remote_port,
            local_port: config.local_port,
            speaker: config.speaker.clone(),
            fsm: FsmValue::new(
                config.conn_retry_time_s,
                config.hold_time_s,
                config.keepalive_time_s,
            ),
            flow: None,
            conn_retry_timer: None,
            hold_timer: None,
            keepalive_timer: None,
            conn_starter: None,
            flow_reader: None,
            input_rib: None,
            output_rib: None,
            loc_rib,
            counters: PeerCounter::default(),
            conn_retry_epoch: 0,
            hold_epoch: 0,
            keepalive_epoch: 0,
            connect_epoch: 0,
            flow_epoch: 0,
            next_epoch: 0,
        }
    }
}

/// The installed transport for an `ESTABLISHED`-bound session. Only the
/// write half is kept here: the read half is owned by the `flow_reader`
/// task.
pub struct Connection {
    writer: FramedWriter<OwnedWriteHalf>,
}

/// Messages that re-enter a Coordinator's single serialization point.
/// Everything that can race a cancellation (`Timer`, `ConnectResult`,
/// `Flow`) carries the epoch it was issued under.
pub enum CoordinatorMsg {
    Fsm(Event),
    Timer(u64, Event),
    Flow(u64, Event),
    ConnectResult(u64, std::io::Result<TcpStream>),
    Inbound(TcpStream),
    ShowFsm(oneshot::Sender<String>),
    ShowDevice(oneshot::Sender<String>),
    ShowRib(bool, oneshot::Sender<String>),
}

pub struct Coordinator {
    runtime: PeerRuntime,
    self_tx: UnboundedSender<CoordinatorMsg>,
}

impl Coordinator {
    /// Spawns the Coordinator's task and returns the handle the Listener
    /// Dispatch and operator CLI use to reach it.
    pub fn spawn(
        config: PeerConfig,
        loc_rib: LocRibHandle,
    ) -> (UnboundedSender<CoordinatorMsg>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = PeerRuntime::new(&config, loc_rib);
        let mut coordinator = Coordinator {
            runtime,
            self_tx: tx.clone(),
        };
        let join = tokio::spawn(async move {
            coordinator.run(rx).await;
        });
        (tx, join)
    }

    async fn run(&mut self, mut rx: UnboundedReceiver<CoordinatorMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                CoordinatorMsg::Fsm(event) => self.dispatch(event).await,
                CoordinatorMsg::Timer(epoch, event) => {
                    let current = match event {
                        Event::ConnRetryTimerExpired => self.runtime.conn_retry_epoch,
                        Event::HoldTimerExpired => self.runtime.hold_epoch,
                        Event::KeepaliveTimerExpired => self.runtime.keepalive_epoch,
                        _ => unreachable!("only timer-expiry events are sent as CoordinatorMsg::Timer"),
                    };
                    if epoch == current {
                        self.dispatch(event).await;
                    }
                }
                CoordinatorMsg::Flow(epoch, event) => {
                    if epoch == self.runtime.flow_epoch {
                        self.runtime.counters.rcvd += 1;
                        self.dispatch(event).await;
                    }
                }
                CoordinatorMsg::ConnectResult(epoch, result) => {
                    if epoch == self.runtime.connect_epoch {
                        self.on_outbound_result(result).await;
                    } else if let Ok(stream) = result {
                        drop(stream);
                    }
                }
                CoordinatorMsg::Inbound(stream) => self.on_inbound(stream).await,
                CoordinatorMsg::ShowFsm(reply) => {
                    let _ = reply.send(self.show_fsm());
                }
                CoordinatorMsg::ShowDevice(reply) => {
                    let _ = reply.send(self.show_device());
                }
                CoordinatorMsg::ShowRib(detail, reply) => {
                    let _ = reply.send(self.show_rib(detail));
                }
            }
        }
    }

    /// Runs the pure FSM transition then its actions, in order — the
    /// entire "Coordinator's perspective" atomic step described for event
    /// processing.
    async fn dispatch(&mut self, event: Event) {
        let (next, actions) = fsm::handle(&self.runtime.fsm, event);
        self.runtime.fsm = next;
        for action in actions {
            self.execute_action(action).await;
        }
    }

    /// Hands out a fresh, globally unique epoch value to stamp onto one
    /// resource's slot. Never compared against directly — only against the
    /// slot field it gets assigned to.
    fn next_epoch(&mut self) -> u64 {
        self.runtime.next_epoch += 1;
        self.runtime.next_epoch
    }

    async fn execute_action(&mut self, action: Action) {
        match action {
            Action::InitiateTcpConnection => self.initiate_tcp_connection(),
            Action::DropTcpConnection => self.drop_tcp_connection(),
            Action::SendOpenMsg => {
                let open = OpenMessage::new(
                    self.runtime.local_asn as u16,
                    self.runtime.fsm.hold_time_s,
                    self.runtime.local_id,
                );
                self.write_msg(Message::Open(open)).await;
            }
            Action::SendMsg(m) => self.write_msg(m).await,
            Action::StartConnRetryTimer => self.start_conn_retry_timer(),
            Action::ResetConnRetryTimer => self.reset_conn_retry_timer(),
            Action::StopConnRetryTimer => {
                if let Some(t) = self.runtime.conn_retry_timer.take() {
                    t.cancel();
                }
            }
            Action::StartHoldTimer(secs) => self.start_hold_timer(secs),
            Action::ResetHoldTimer(secs) => self.reset_hold_timer(secs),
            Action::StopHoldTimer => {
                if let Some(t) = self.runtime.hold_timer.take() {
                    t.cancel();
                }
            }
            Action::StartKeepaliveTimer => self.start_keepalive_timer(),
            Action::ResetKeepaliveTimer => self.reset_keepalive_timer(),
            Action::StopKeepaliveTimer => {
                if let Some(t) = self.runtime.keepalive_timer.take() {
                    t.cancel();
                }
            }
            Action::ProcessUpdateMsg(u) => self.process_update_msg(u),
            Action::InitiateRib => self.initiate_rib(),
            Action::ReleaseRib => self.release_rib(),
        }
    }

    fn initiate_tcp_connection(&mut self) {
        if self.runtime.conn_starter.is_some() || self.runtime.flow.is_some() {
            crate::bgp_warn!(
                remote_id = %self.runtime.remote_id,
                "Initiate_tcp_connection with a connect or flow already live; ignoring"
            );
            return;
        }
        let epoch = self.next_epoch();
        self.runtime.connect_epoch = epoch;
        let tx = self.self_tx.clone();
        let addr = SocketAddr::new(IpAddr::V4(self.runtime.remote_id), self.runtime.remote_port);
        let handle = tokio::spawn(async move {
            let result = TcpStream::connect(addr).await;
            let _ = tx.send(CoordinatorMsg::ConnectResult(epoch, result));
        });
        self.runtime.conn_starter = Some(handle);
    }

    fn drop_tcp_connection(&mut self) {
        self.runtime.connect_epoch = self.next_epoch();
        self.runtime.flow_epoch = self.next_epoch();
        if let Some(h) = self.runtime.conn_starter.take() {
            h.abort();
        }
        if let Some(h) = self.runtime.flow_reader.take() {
            h.abort();
        }
        self.runtime.flow = None;
    }

    async fn write_msg(&mut self, msg: Message) {
        if let Some(conn) = self.runtime.flow.as_mut() {
            match conn.writer.write(&msg).await {
                Ok(()) => self.runtime.counters.sent += 1,
                Err(e) => crate::bgp_warn!(
                    remote_id = %self.runtime.remote_id,
                    error = %e,
                    "write failed; waiting for the read side to notice"
                ),
            }
        }
    }

    fn start_conn_retry_timer(&mut self) {
        if let Some(old) = self.runtime.conn_retry_timer.take() {
            old.cancel();
        }
        let epoch = self.next_epoch();
        self.runtime.conn_retry_epoch = epoch;
        let tx = self.self_tx.clone();
        self.runtime.conn_retry_timer = Timer::once(self.runtime.fsm.conn_retry_time_s, move || {
            let _ = tx.send(CoordinatorMsg::Timer(epoch, Event::ConnRetryTimerExpired));
        });
    }

    /// Restarts the live conn-retry timer's countdown in place; falls back
    /// to a fresh `start` if none is currently running (e.g. the delay was
    /// previously `0` and is only now non-zero).
    fn reset_conn_retry_timer(&mut self) {
        match &self.runtime.conn_retry_timer {
            Some(t) => t.reset(),
            None => self.start_conn_retry_timer(),
        }
    }

    fn start_hold_timer(&mut self, delay_s: u16) {
        if let Some(old) = self.runtime.hold_timer.take() {
            old.cancel();
        }
        let epoch = self.next_epoch();
        self.runtime.hold_epoch = epoch;
        let tx = self.self_tx.clone();
        self.runtime.hold_timer = Timer::once(delay_s, move || {
            let _ = tx.send(CoordinatorMsg::Timer(epoch, Event::HoldTimerExpired));
        });
    }

    fn reset_hold_timer(&mut self, delay_s: u16) {
        match &self.runtime.hold_timer {
            Some(t) => t.reset(),
            None => self.start_hold_timer(delay_s),
        }
    }

    fn start_keepalive_timer(&mut self) {
        if let Some(old) = self.runtime.keepalive_timer.take() {
            old.cancel();
        }
        let epoch = self.next_epoch();
        self.runtime.keepalive_epoch = epoch;
        let tx = self.self_tx.clone();
        self.runtime.keepalive_timer = Timer::once(self.runtime.fsm.keepalive_time_s, move || {
            let _ = tx.send(CoordinatorMsg::Timer(epoch, Event::KeepaliveTimerExpired));
        });
    }

    fn reset_keepalive_timer(&mut self) {
        match &self.runtime.keepalive_timer {
            Some(t) => t.reset(),
            None => self.start_keepalive_timer(),
        }
    }

    fn process_update_msg(&mut self, u: codec::UpdateMessage) {
        let input_rib = self
            .runtime
            .input_rib
            .as_ref()
            .expect("Process_update_msg with no input RIB is a protocol invariant violation");
        let converted = ConvertedUpdate {
            remote_id: self.runtime.remote_id,
            update: u,
        };
        input_rib.handle_update(converted.clone());
        self.runtime
            .loc_rib
            .handle_signal(Signal::Update(converted, self.runtime.remote_id));
    }

    fn initiate_rib(&mut self) {
        let remote_id = self.runtime.remote_id;
        let input = AdjRib::create(remote_id, move |_converted| {
            // Adj-RIB-In landing point; process_update_msg already forwards
            // into the Loc-RIB, so there is nothing further to do here
            // without an import policy engine.
        });
        let output = Arc::new(AdjRib::create(remote_id, move |converted| {
            // Adj-RIB-Out sink: fires when the Loc-RIB fans a route out to
            // this peer. There is no outbound UPDATE writer in this build.
            let _ = converted;
        }));
        self.runtime
            .loc_rib
            .handle_signal(Signal::Subscribe(output.clone()));
        self.runtime.input_rib = Some(Arc::new(input));
        self.runtime.output_rib = Some(output);
    }

    fn release_rib(&mut self) {
        self.runtime.input_rib = None;
        if let Some(output) = self.runtime.output_rib.take() {
            self.runtime
                .loc_rib
                .handle_signal(Signal::Unsubscribe(output));
        }
    }

    /// Installs a newly won transport as `flow`, closing any previous one
    /// first, and starts the read loop that feeds decoded messages back as
    /// FSM events.
    fn install_flow(&mut self, stream: TcpStream) {
        self.drop_tcp_connection();
        let (read_half, write_half) = stream.into_split();
        let epoch = self.next_epoch();
        self.runtime.flow_epoch = epoch;
        let tx = self.self_tx.clone();
        let handle = tokio::spawn(async move {
            let mut reader = FramedReader::new(read_half);
            loop {
                let event = match reader.read().await {
                    Ok(Message::Open(o)) => Event::BgpOpen(o),
                    Ok(Message::Update(u)) => Event::UpdateMsg(u),
                    Ok(Message::Notification(n)) => Event::NotifMsg(n),
                    Ok(Message::Keepalive) => Event::KeepaliveMsg,
                    Err(ReadError::ParseError(codec::ParseError::Malformed)) => {
                        Event::BgpOpenMsgErr
                    }
                    Err(ReadError::ParseError(_)) => Event::BgpHeaderErr,
                    Err(_) => {
                        let _ = tx.send(CoordinatorMsg::Flow(epoch, Event::TcpConnectionFail));
                        return;
                    }
                };
                if tx.send(CoordinatorMsg::Flow(epoch, event)).is_err() {
                    return;
                }
            }
        });
        self.runtime.flow = Some(Connection {
            writer: FramedWriter::new(write_half),
        });
        self.runtime.flow_reader = Some(handle);
    }

    /// Performs an `Open_collision_dump` then, per the tie-break rule,
    /// resets the FSM straight to `CONNECT` (preserving `conn_retry_counter`
    /// and timer config) before installing the winning flow and delivering
    /// the confirmation event that carries it on to `OPEN_SENT`.
    async fn dump_and_install(&mut self, stream: TcpStream, confirm: Event) {
        self.dispatch(Event::OpenCollisionDump).await;
        self.runtime.fsm.state = State::Connect;
        self.install_flow(stream);
        self.dispatch(confirm).await;
    }

    async fn on_inbound(&mut self, stream: TcpStream) {
        match self.runtime.fsm.state {
            State::Idle | State::Established => drop(stream),
            State::Connect | State::Active => {
                self.install_flow(stream);
                self.dispatch(Event::TcpConnectionConfirmed).await;
            }
            State::OpenSent | State::OpenConfirmed => {
                if self.runtime.local_id > self.runtime.remote_id {
                    drop(stream);
                } else {
                    self.dump_and_install(stream, Event::TcpConnectionConfirmed)
                        .await;
                }
            }
        }
    }

    async fn on_outbound_result(&mut self, result: std::io::Result<TcpStream>) {
        self.runtime.conn_starter = None;
        let stream = match result {
            Err(_) => {
                self.dispatch(Event::TcpConnectionFail).await;
                return;
            }
            Ok(stream) => stream,
        };
        match self.runtime.fsm.state {
            State::Idle | State::Established => drop(stream),
            State::Connect | State::Active => {
                self.install_flow(stream);
                self.dispatch(Event::TcpCrAcked).await;
            }
            State::OpenSent | State::OpenConfirmed => {
                if self.runtime.local_id < self.runtime.remote_id {
                    drop(stream);
                } else {
                    self.dump_and_install(stream, Event::TcpCrAcked).await;
                }
            }
        }
    }

    fn show_fsm(&self) -> String {
        format!(
            "{:?} retries={} conn_retry={}s hold={}s keepalive={}s sent={} rcvd={}",
            self.runtime.fsm.state,
            self.runtime.fsm.conn_retry_counter,
            self.runtime.fsm.conn_retry_time_s,
            self.runtime.fsm.hold_time_s,
            self.runtime.fsm.keepalive_time_s,
            self.runtime.counters.sent,
            self.runtime.counters.rcvd,
        )
    }

    fn show_device(&self) -> String {
        format!(
            "{} local_id={} local_asn={} remote_id={} remote_port={}",
            self.runtime.speaker,
            self.runtime.local_id,
            self.runtime.local_asn,
            self.runtime.remote_id,
            self.runtime.remote_port,
        )
    }

    fn show_rib(&self, detail: bool) -> String {
        let routes = self.runtime.loc_rib.route_count();
        if detail {
            format!(
                "{}: loc-rib routes={} input_rib={} output_rib={}",
                self.runtime.speaker,
                routes,
                self.runtime.input_rib.is_some(),
                self.runtime.output_rib.is_some(),
            )
        } else {
            format!("{}: loc-rib routes={}", self.runtime.speaker, routes)
        }
    }
}
