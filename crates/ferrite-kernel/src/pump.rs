//! Host event pump.
//!
//! The kernel blocks on exactly one source: a crossbeam channel of
//! [`RawEvent`]s.  External producers (terminal input threads, remote
//! bridges) hold an [`EventInjector`]; the scheduler itself queues its
//! "more work pending" self-signal through the same channel.
//!
//! At most one wake-up timer is armed at a time.  Pulling with a timer
//! armed blocks with a deadline and synthesizes [`RawEvent::Timer`] when it
//! elapses, so an idle kernel parks without busy-waiting.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::trace;

use crate::clock::Clock;
use crate::event::RawEvent;

/// Identifier of an armed wake-up timer.
pub type TimerId = u64;

/// Sending half handed to host input producers.
#[derive(Clone)]
pub struct EventInjector {
    tx: Sender<RawEvent>,
}

impl EventInjector {
    /// Deliver a raw event to the kernel.  Silently dropped if the kernel
    /// has already shut down.
    pub fn send(&self, event: RawEvent) {
        let _ = self.tx.send(event);
    }
}

/// The kernel-side event source.
pub struct EventPump {
    tx: Sender<RawEvent>,
    rx: Receiver<RawEvent>,
    clock: Arc<dyn Clock>,
    /// The single armed timer: (id, absolute wake time).
    armed: Option<(TimerId, i64)>,
    next_timer: TimerId,
}

impl EventPump {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            clock,
            armed: None,
            next_timer: 0,
        }
    }

    /// A cloneable handle for external producers.
    pub fn injector(&self) -> EventInjector {
        EventInjector {
            tx: self.tx.clone(),
        }
    }

    /// Queue an event from inside the kernel (self-signals).
    pub fn queue(&self, event: RawEvent) {
        let _ = self.tx.send(event);
    }

    /// Arm the wake-up timer `duration_ms` from now, replacing any
    /// previously armed timer.
    pub fn start_timer(&mut self, duration_ms: i64) -> TimerId {
        self.next_timer += 1;
        let id = self.next_timer;
        let wake_at = self.clock.now_millis() + duration_ms.max(0);
        trace!(timer = id, wake_at, "arming wake-up timer");
        self.armed = Some((id, wake_at));
        id
    }

    /// Disarm the timer if `id` is the one currently armed.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if self.armed.is_some_and(|(armed, _)| armed == id) {
            self.armed = None;
        }
    }

    /// Block until the next raw event.  With a timer armed, a quiet channel
    /// yields [`RawEvent::Timer`] once the deadline passes.  A disconnected
    /// channel reads as [`RawEvent::Terminate`].
    pub fn pull(&mut self) -> RawEvent {
        match self.armed {
            Some((id, wake_at)) => {
                let remaining = (wake_at - self.clock.now_millis()).max(0) as u64;
                match self.rx.recv_timeout(Duration::from_millis(remaining)) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        self.armed = None;
                        RawEvent::Timer { id }
                    }
                    Err(RecvTimeoutError::Disconnected) => RawEvent::Terminate,
                }
            }
            None => self.rx.recv().unwrap_or(RawEvent::Terminate),
        }
    }

    /// Non-blocking pull, used by tests and single-step drivers.
    pub fn try_pull(&mut self) -> Option<RawEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    #[test]
    fn injected_events_arrive_in_order() {
        let mut pump = EventPump::new(Arc::new(SystemClock));
        let injector = pump.injector();
        injector.send(RawEvent::Char { ch: 'a' });
        injector.send(RawEvent::SchedulerYield);

        assert_eq!(pump.pull(), RawEvent::Char { ch: 'a' });
        assert_eq!(pump.pull(), RawEvent::SchedulerYield);
    }

    #[test]
    fn armed_timer_fires_on_quiet_channel() {
        let mut pump = EventPump::new(Arc::new(SystemClock));
        let id = pump.start_timer(5);
        assert_eq!(pump.pull(), RawEvent::Timer { id });
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let clock = Arc::new(ManualClock::new(0));
        let mut pump = EventPump::new(clock);
        let id = pump.start_timer(1_000);
        pump.cancel_timer(id);

        pump.queue(RawEvent::Terminate);
        assert_eq!(pump.pull(), RawEvent::Terminate);
    }

    #[test]
    fn rearming_replaces_previous_timer() {
        let mut pump = EventPump::new(Arc::new(SystemClock));
        let first = pump.start_timer(60_000);
        let second = pump.start_timer(5);
        assert_ne!(first, second);
        assert_eq!(pump.pull(), RawEvent::Timer { id: second });
    }
}
