//! The per-peer BGP session FSM (RFC 4271 §8).
//!
//! `handle` is a pure, total function: no I/O, no timers, no sockets. It
//! takes the current [`FsmValue`] and an [`Event`], and returns the next
//! [`FsmValue`] together with the ordered list of [`Action`]s the caller
//! (the Peer Connection Coordinator) must execute in sequence.

use crate::codec::{Message, NotificationMessage, OpenMessage, UpdateMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirmed,
    Established,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmValue {
    pub state: State,
    pub conn_retry_counter: u32,
    pub conn_retry_time_s: u16,
    pub hold_time_s: u16,
    pub keepalive_time_s: u16,
}

impl FsmValue {
    /// Builds an initial (Idle) value from configured timer defaults,
    /// deriving `keepalive_time_s` when the caller leaves it unspecified.
    /// Panics if the invariant `keepalive <= hold/3` (or both zero) can't
    /// be satisfied by the given pair — a configuration bug.
    pub fn new(conn_retry_time_s: u16, hold_time_s: u16, keepalive_time_s: u16) -> Self {
        let value = FsmValue {
            state: State::Idle,
            conn_retry_counter: 0,
            conn_retry_time_s,
            hold_time_s,
            keepalive_time_s,
        };
        value.check_invariant();
        value
    }

    fn check_invariant(&self) {
        if self.hold_time_s == 0 {
            debug_assert_eq!(self.keepalive_time_s, 0);
        } else {
            debug_assert!(self.keepalive_time_s <= self.hold_time_s / 3);
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    ManualStart,
    ManualStop,
    ConnRetryTimerExpired,
    HoldTimerExpired,
    KeepaliveTimerExpired,
    TcpConnectionConfirmed,
    TcpCrAcked,
    TcpConnectionFail,
    BgpOpen(OpenMessage),
    BgpHeaderErr,
    BgpOpenMsgErr,
    NotifMsg(NotificationMessage),
    KeepaliveMsg,
    UpdateMsg(UpdateMessage),
    OpenCollisionDump,
}

#[derive(Debug, Clone)]
pub enum Action {
    InitiateTcpConnection,
    DropTcpConnection,
    SendOpenMsg,
    SendMsg(Message),
    StartConnRetryTimer,
    StopConnRetryTimer,
    ResetConnRetryTimer,
    StartHoldTimer(u16),
    StopHoldTimer,
    ResetHoldTimer(u16),
    StartKeepaliveTimer,
    StopKeepaliveTimer,
    ResetKeepaliveTimer,
    ProcessUpdateMsg(UpdateMessage),
    InitiateRib,
    ReleaseRib,
}

/// Initial hold timer per RFC 4271 §8: large enough to survive a slow OPEN
/// exchange before any hold time has been negotiated.
const INITIAL_HOLD_TIME_S: u16 = 240;

/// The full "collapse to Idle" teardown: stop every timer, drop the flow,
/// release the RIBs. Shared by every non-Idle state's fallback and error
/// transitions so the cleanup can never drift out of sync across states.
fn teardown(notify: Option<NotificationMessage>) -> Vec<Action> {
    let mut actions = Vec::with_capacity(5);
    if let Some(n) = notify {
        actions.push(Action::SendMsg(Message::Notification(n)));
    }
    actions.push(Action::StopConnRetryTimer);
    actions.push(Action::StopHoldTimer);
    actions.push(Action::StopKeepaliveTimer);
    actions.push(Action::DropTcpConnection);
    actions.push(Action::ReleaseRib);
    actions
}

/// Any state + an event with no specific rule: collapse to Idle, counting
/// it as a failed attempt (RFC 4271 §8.2.2's generic "any other event"
/// fallback for Connect/Active/OpenSent/OpenConfirm/Established).
fn fallback_to_idle(fsm: &FsmValue, notify: Option<NotificationMessage>) -> (FsmValue, Vec<Action>) {
    let next = FsmValue {
        state: State::Idle,
        conn_retry_counter: fsm.conn_retry_counter + 1,
        ..fsm.clone()
    };
    (next, teardown(notify))
}

pub fn handle(fsm: &FsmValue, event: Event) -> (FsmValue, Vec<Action>) {
    use Event::*;
    use State::*;

    // Manual_stop is handled uniformly regardless of state, except that
    // Idle + Manual_stop must be a literal no-op (testable property 4):
    // no actions, no counter reset, FSM value unchanged.
    if matches!(event, ManualStop) {
        if fsm.state == Idle {
            return (fsm.clone(), Vec::new());
        }
        let next = FsmValue {
            state: Idle,
            conn_retry_counter: 0,
            ..fsm.clone()
        };
        return (next, teardown(None));
    }

    // Open_collision_dump applies uniformly in any state: send the Cease
    // notification on the losing flow and collapse to Idle. The
    // Coordinator is responsible for the subsequent Idle -> Connect step
    // that installs the replacement flow (see peer::Coordinator).
    if matches!(event, OpenCollisionDump) {
        let next = FsmValue {
            state: Idle,
            ..fsm.clone()
        };
        let mut actions = vec![Action::SendMsg(Message::Notification(
            NotificationMessage::cease_collision(),
        ))];
        actions.push(Action::DropTcpConnection);
        actions.push(Action::ReleaseRib);
        return (next, actions);
    }

    match fsm.state {
        Idle => match event {
            ManualStart => {
                let next = FsmValue {
                    state: Connect,
                    conn_retry_counter: 0,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![Action::InitiateTcpConnection, Action::StartConnRetryTimer],
                )
            }
            // RFC 4271 §8.2.2: Idle discards every other event.
            _ => (fsm.clone(), Vec::new()),
        },

        Connect => match event {
            TcpConnectionConfirmed | TcpCrAcked => {
                let next = FsmValue {
                    state: OpenSent,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![
                        Action::StopConnRetryTimer,
                        Action::SendOpenMsg,
                        Action::StartHoldTimer(INITIAL_HOLD_TIME_S),
                    ],
                )
            }
            ConnRetryTimerExpired => {
                let next = FsmValue {
                    state: Connect,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![
                        Action::DropTcpConnection,
                        Action::ResetConnRetryTimer,
                        Action::InitiateTcpConnection,
                    ],
                )
            }
            TcpConnectionFail => {
                let next = FsmValue {
                    state: Active,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![Action::ResetConnRetryTimer, Action::DropTcpConnection],
                )
            }
            ManualStart => (fsm.clone(), Vec::new()),
            _ => fallback_to_idle(fsm, None),
        },

        Active => match event {
            ConnRetryTimerExpired => {
                let next = FsmValue {
                    state: Connect,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![
                        Action::ResetConnRetryTimer,
                        Action::InitiateTcpConnection,
                    ],
                )
            }
            TcpConnectionConfirmed | TcpCrAcked => {
                let next = FsmValue {
                    state: OpenSent,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![
                        Action::StopConnRetryTimer,
                        Action::SendOpenMsg,
                        Action::StartHoldTimer(INITIAL_HOLD_TIME_S),
                    ],
                )
            }
            TcpConnectionFail => {
                let next = FsmValue {
                    state: Idle,
                    conn_retry_counter: fsm.conn_retry_counter + 1,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![
                        Action::StopConnRetryTimer,
                        Action::DropTcpConnection,
                        Action::ReleaseRib,
                    ],
                )
            }
            ManualStart => (fsm.clone(), Vec::new()),
            _ => fallback_to_idle(fsm, None),
        },

        OpenSent => match event {
            BgpOpen(open) => {
                let (hold_time_s, keepalive_time_s) = negotiate(fsm.hold_time_s, open.hold_time);
                let next = FsmValue {
                    state: OpenConfirmed,
                    hold_time_s,
                    keepalive_time_s,
                    ..fsm.clone()
                };
                let actions = vec![
                    Action::SendMsg(Message::Keepalive),
                    Action::ResetHoldTimer(hold_time_s),
                    Action::StartKeepaliveTimer,
                    Action::InitiateRib,
                ];
                (next, actions)
            }
            BgpHeaderErr => {
                fallback_to_idle(fsm, Some(NotificationMessage::new(crate::codec::ErrorCode::MessageHeaderError, 0)))
            }
            BgpOpenMsgErr => {
                fallback_to_idle(fsm, Some(NotificationMessage::new(crate::codec::ErrorCode::OpenMessageError, 0)))
            }
            TcpConnectionFail => {
                let next = FsmValue {
                    state: Active,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![Action::ResetConnRetryTimer, Action::DropTcpConnection],
                )
            }
            HoldTimerExpired => {
                fallback_to_idle(fsm, Some(NotificationMessage::hold_timer_expired()))
            }
            NotifMsg(_) => fallback_to_idle(fsm, None),
            _ => fallback_to_idle(fsm, None),
        },

        OpenConfirmed => match event {
            KeepaliveMsg => {
                let next = FsmValue {
                    state: Established,
                    ..fsm.clone()
                };
                (next, vec![Action::ResetHoldTimer(fsm.hold_time_s)])
            }
            KeepaliveTimerExpired => {
                let next = FsmValue {
                    state: OpenConfirmed,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![Action::SendMsg(Message::Keepalive), Action::StartKeepaliveTimer],
                )
            }
            HoldTimerExpired => {
                fallback_to_idle(fsm, Some(NotificationMessage::hold_timer_expired()))
            }
            NotifMsg(_) => fallback_to_idle(fsm, None),
            TcpConnectionFail => {
                let next = FsmValue {
                    state: Idle,
                    conn_retry_counter: fsm.conn_retry_counter + 1,
                    ..fsm.clone()
                };
                (next, teardown(None))
            }
            _ => fallback_to_idle(fsm, None),
        },

        Established => match event {
            UpdateMsg(u) => {
                let next = FsmValue {
                    state: Established,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![Action::ProcessUpdateMsg(u), Action::ResetHoldTimer(fsm.hold_time_s)],
                )
            }
            KeepaliveMsg => {
                let next = FsmValue {
                    state: Established,
                    ..fsm.clone()
                };
                (next, vec![Action::ResetHoldTimer(fsm.hold_time_s)])
            }
            KeepaliveTimerExpired => {
                let next = FsmValue {
                    state: Established,
                    ..fsm.clone()
                };
                (
                    next,
                    vec![Action::SendMsg(Message::Keepalive), Action::StartKeepaliveTimer],
                )
            }
            HoldTimerExpired => {
                let next = FsmValue {
                    state: Idle,
                    conn_retry_counter: fsm.conn_retry_counter + 1,
                    ..fsm.clone()
                };
                (next, teardown(Some(NotificationMessage::hold_timer_expired())))
            }
            NotifMsg(_) | TcpConnectionFail => {
                let next = FsmValue {
                    state: Idle,
                    conn_retry_counter: fsm.conn_retry_counter + 1,
                    ..fsm.clone()
                };
                (next, teardown(None))
            }
            _ => fallback_to_idle(fsm, None),
        },
    }
}

/// Hold/keepalive negotiation per RFC 4271 §4.2: the negotiated hold time
/// is the smaller of the two offers; a zero on either side disables both
/// timers. `local_hold_time_s` is the value carried in our own OPEN, i.e.
/// `fsm.hold_time_s` as configured before this exchange.
fn negotiate(local_hold_time_s: u16, remote_hold_time_s: u16) -> (u16, u16) {
    if local_hold_time_s == 0 || remote_hold_time_s == 0 {
        return (0, 0);
    }
    let hold_time_s = local_hold_time_s.min(remote_hold_time_s);
    (hold_time_s, hold_time_s / 3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn fresh() -> FsmValue {
        FsmValue::new(30, 45, 15)
    }

    #[test]
    fn handle_is_pure() {
        let fsm = fresh();
        let (a, _) = handle(&fsm, Event::ManualStart);
        let (b, _) = handle(&fsm, Event::ManualStart);
        assert_eq!(a, b);
    }

    #[test]
    fn idle_manual_stop_is_idempotent_noop() {
        let fsm = fresh();
        let (next, actions) = handle(&fsm, Event::ManualStop);
        assert_eq!(next, fsm);
        assert!(actions.is_empty());
    }

    #[test]
    fn idle_manual_start_initiates_connect() {
        let fsm = fresh();
        let (next, actions) = handle(&fsm, Event::ManualStart);
        assert_eq!(next.state, State::Connect);
        assert_eq!(next.conn_retry_counter, 0);
        assert!(matches!(actions[0], Action::InitiateTcpConnection));
        assert!(matches!(actions[1], Action::StartConnRetryTimer));
    }

    #[test]
    fn connect_tcp_cr_acked_goes_open_sent() {
        let mut fsm = fresh();
        fsm.state = State::Connect;
        let (next, actions) = handle(&fsm, Event::TcpCrAcked);
        assert_eq!(next.state, State::OpenSent);
        assert!(matches!(actions[0], Action::StopConnRetryTimer));
        assert!(matches!(actions[1], Action::SendOpenMsg));
        assert!(matches!(actions[2], Action::StartHoldTimer(INITIAL_HOLD_TIME_S)));
    }

    #[test]
    fn connect_retry_expired_recycles_connect() {
        let mut fsm = fresh();
        fsm.state = State::Connect;
        let (next, actions) = handle(&fsm, Event::ConnRetryTimerExpired);
        assert_eq!(next.state, State::Connect);
        assert!(matches!(actions[0], Action::DropTcpConnection));
        assert!(matches!(actions[1], Action::ResetConnRetryTimer));
        assert!(matches!(actions[2], Action::InitiateTcpConnection));
    }

    #[test]
    fn connect_tcp_fail_goes_active() {
        let mut fsm = fresh();
        fsm.state = State::Connect;
        let (next, actions) = handle(&fsm, Event::TcpConnectionFail);
        assert_eq!(next.state, State::Active);
        assert!(matches!(actions[0], Action::ResetConnRetryTimer));
        assert!(matches!(actions[1], Action::DropTcpConnection));
    }

    #[test]
    fn active_tcp_fail_goes_idle_and_increments_counter() {
        let mut fsm = fresh();
        fsm.state = State::Active;
        fsm.conn_retry_counter = 2;
        let (next, actions) = handle(&fsm, Event::TcpConnectionFail);
        assert_eq!(next.state, State::Idle);
        assert_eq!(next.conn_retry_counter, 3);
        assert!(matches!(actions[0], Action::StopConnRetryTimer));
        assert!(matches!(actions[1], Action::DropTcpConnection));
        assert!(matches!(actions[2], Action::ReleaseRib));
    }

    #[test]
    fn open_sent_bgp_open_negotiates_and_moves_to_open_confirmed() {
        let mut fsm = fresh();
        fsm.state = State::OpenSent;
        let open = OpenMessage::new(65001, 180, Ipv4Addr::new(1, 1, 1, 1));
        let (next, actions) = handle(&fsm, Event::BgpOpen(open));
        assert_eq!(next.state, State::OpenConfirmed);
        assert_eq!(next.hold_time_s, 45);
        assert_eq!(next.keepalive_time_s, 15);
        assert!(matches!(actions[0], Action::SendMsg(Message::Keepalive)));
        assert!(matches!(actions[1], Action::ResetHoldTimer(45)));
        assert!(matches!(actions[2], Action::StartKeepaliveTimer));
        assert!(matches!(actions[3], Action::InitiateRib));
    }

    #[test]
    fn open_sent_zero_remote_hold_disables_timers() {
        let mut fsm = fresh();
        fsm.state = State::OpenSent;
        let open = OpenMessage::new(65001, 0, Ipv4Addr::new(1, 1, 1, 1));
        let (next, _) = handle(&fsm, Event::BgpOpen(open));
        assert_eq!(next.hold_time_s, 0);
        assert_eq!(next.keepalive_time_s, 0);
    }

    #[test]
    fn open_confirmed_keepalive_establishes() {
        let mut fsm = fresh();
        fsm.state = State::OpenConfirmed;
        let (next, actions) = handle(&fsm, Event::KeepaliveMsg);
        assert_eq!(next.state, State::Established);
        assert!(matches!(actions[0], Action::ResetHoldTimer(45)));
    }

    #[test]
    fn established_update_resets_hold_timer() {
        let mut fsm = fresh();
        fsm.state = State::Established;
        let update = UpdateMessage::default();
        let (next, actions) = handle(&fsm, Event::UpdateMsg(update.clone()));
        assert_eq!(next.state, State::Established);
        assert!(matches!(&actions[0], Action::ProcessUpdateMsg(u) if *u == update));
        assert!(matches!(actions[1], Action::ResetHoldTimer(45)));
    }

    #[test]
    fn established_keepalive_timer_expired_resends() {
        let mut fsm = fresh();
        fsm.state = State::Established;
        let (next, actions) = handle(&fsm, Event::KeepaliveTimerExpired);
        assert_eq!(next.state, State::Established);
        assert!(matches!(actions[0], Action::SendMsg(Message::Keepalive)));
        assert!(matches!(actions[1], Action::StartKeepaliveTimer));
    }

    #[test]
    fn established_hold_timer_expired_tears_down() {
        let mut fsm = fresh();
        fsm.state = State::Established;
        fsm.conn_retry_counter = 0;
        let (next, actions) = handle(&fsm, Event::HoldTimerExpired);
        assert_eq!(next.state, State::Idle);
        assert_eq!(next.conn_retry_counter, 1);
        assert!(matches!(&actions[0], Action::SendMsg(Message::Notification(n)) if n.code == crate::codec::ErrorCode::HoldTimerExpired));
        assert!(matches!(actions[1], Action::StopConnRetryTimer));
        assert!(matches!(actions[4], Action::ReleaseRib));
    }

    #[test]
    fn manual_stop_from_established_resets_counter_and_tears_down() {
        let mut fsm = fresh();
        fsm.state = State::Established;
        fsm.conn_retry_counter = 5;
        let (next, actions) = handle(&fsm, Event::ManualStop);
        assert_eq!(next.state, State::Idle);
        assert_eq!(next.conn_retry_counter, 0);
        assert!(!actions.is_empty());
    }

    #[test]
    fn open_collision_dump_from_any_state_goes_idle() {
        for state in [State::Connect, State::Active, State::OpenSent, State::OpenConfirmed, State::Established] {
            let mut fsm = fresh();
            fsm.state = state;
            let (next, actions) = handle(&fsm, Event::OpenCollisionDump);
            assert_eq!(next.state, State::Idle);
            assert!(matches!(&actions[0], Action::SendMsg(Message::Notification(n)) if n.code == crate::codec::ErrorCode::Cease));
            assert!(matches!(actions[1], Action::DropTcpConnection));
            assert!(matches!(actions[2], Action::ReleaseRib));
        }
    }
}
