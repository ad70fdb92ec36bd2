//! A cancellable one-shot/repeating timer.
//!
//! Mirrors the `Timer`/`TimerType` task pattern used throughout the
//! `zebra-rs` BGP implementation: a timer is a spawned tokio task holding an
//! unbounded control channel, so `cancel`/`reset` never block the caller and
//! a timer that has already fired quietly drops a stale `cancel`.

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Once,
    Repeating,
}

enum Ctl {
    Cancel,
    Reset,
}

/// A live, cancellable timer. Dropping it does not cancel the underlying
/// task — call [`Timer::cancel`] explicitly, as the Coordinator does.
#[derive(Debug)]
pub struct Timer {
    tx: UnboundedSender<Ctl>,
}

impl Timer {
    fn spawn<F>(delay: Duration, kind: Kind, mut fire: F) -> Timer
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        fire();
                        if kind == Kind::Once {
                            break;
                        }
                    }
                    ctl = rx.recv() => {
                        match ctl {
                            Some(Ctl::Cancel) | None => break,
                            Some(Ctl::Reset) => continue,
                        }
                    }
                }
            }
        });
        Timer { tx }
    }

    /// Starts a one-shot timer that calls `fire` once after `delay_s`
    /// seconds, unless cancelled first. Returns `None` when `delay_s == 0`
    /// ("disabled" per the configured value, not "fire immediately").
    pub fn once<F>(delay_s: u16, fire: F) -> Option<Timer>
    where
        F: FnMut() + Send + 'static,
    {
        (delay_s != 0).then(|| Timer::spawn(Duration::from_secs(delay_s as u64), Kind::Once, fire))
    }

    /// Starts a timer that calls `fire` every `interval_s` seconds until
    /// cancelled. Returns `None` when `interval_s == 0`.
    pub fn repeating<F>(interval_s: u16, fire: F) -> Option<Timer>
    where
        F: FnMut() + Send + 'static,
    {
        (interval_s != 0)
            .then(|| Timer::spawn(Duration::from_secs(interval_s as u64), Kind::Repeating, fire))
    }

    /// Cancels the timer. A no-op if the timer already fired (Once) or its
    /// task otherwise exited.
    pub fn cancel(self) {
        let _ = self.tx.send(Ctl::Cancel);
    }

    /// Restarts the countdown from zero without changing the configured
    /// delay.
    pub fn reset(&self) {
        let _ = self.tx.send(Ctl::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn zero_delay_disables_the_timer() {
        assert!(Timer::once(0, || {}).is_none());
        assert!(Timer::repeating(0, || {}).is_none());
    }

    #[tokio::test]
    async fn once_fires_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let t = Timer::once(1, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(t.is_some());
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let t = Timer::once(1, move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        t.cancel();
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reset_restarts_the_countdown() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let t = Timer::once(1, move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        t.reset();
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "reset should have restarted the 1s delay");
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
