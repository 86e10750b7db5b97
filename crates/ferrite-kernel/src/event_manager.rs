//! Event classification and routing.
//!
//! Raw host input becomes a typed [`KernelEvent`] and is routed by the
//! event kind's fixed policy: broadcast kinds go to every live process's
//! queue; focused kinds go to the focused process alone and are dropped
//! (with a log line) when nothing is focused or the focused process no
//! longer exists.
//!
//! Enqueueing an event on a process first offers it to the process's
//! interceptors (registration order, skipped in raw input mode), then
//! wakes any thread parked on a matching event filter.

use tracing::{trace, warn};

use crate::event::{KernelEvent, RawEvent, RoutingType, filter_matches};
use crate::exec::{SysValue, ok_args};
use crate::kernel::Kernel;
use crate::process::{Pid, ProcessState};
use crate::thread::{ThreadState, WaitingReason};

impl Kernel {
    pub fn focused_process(&self) -> Option<Pid> {
        self.focused
    }

    /// Designate the process receiving focused (keyboard) events.
    pub fn set_focused_process(&mut self, pid: Option<Pid>) {
        trace!(?pid, "focused process changed");
        self.focused = pid;
    }

    /// Classify a raw host event and route the result.
    pub(crate) fn dispatch_raw(&mut self, raw: RawEvent) {
        let event = match raw {
            RawEvent::Key { code, held } => KernelEvent::KeyDown { code, held },
            RawEvent::KeyUp { code } => KernelEvent::KeyUp { code },
            RawEvent::Char { ch } => KernelEvent::Char { ch },
            RawEvent::ScreenResize { cols, rows } => KernelEvent::ScreenResize { cols, rows },
            RawEvent::Timer { id } => KernelEvent::Timer { id },
            RawEvent::Remote { channel, payload } => KernelEvent::Remote { channel, payload },
            // Handled by the scheduler before classification.
            RawEvent::Terminate | RawEvent::SchedulerYield => return,
        };
        self.dispatch_event(event);
    }

    /// Route a typed event per its routing policy.
    pub fn dispatch_event(&mut self, event: KernelEvent) {
        match event.routing() {
            RoutingType::Broadcast => {
                let live: Vec<Pid> = self
                    .processes
                    .iter()
                    .filter(|(_, p)| p.state == ProcessState::Alive)
                    .map(|(pid, _)| *pid)
                    .collect();
                for pid in live {
                    self.queue_event_to(pid, event.clone());
                }
            }
            RoutingType::Focused => match self.focused {
                Some(pid)
                    if self
                        .processes
                        .get(&pid)
                        .is_some_and(|p| p.state == ProcessState::Alive) =>
                {
                    self.queue_event_to(pid, event);
                }
                Some(pid) => {
                    warn!(pid, kind = ?event.kind(), "focused process gone; dropping event");
                    self.focused = None;
                }
                None => {
                    trace!(kind = ?event.kind(), "no focused process; dropping input event");
                }
            },
        }
    }

    /// Offer an event to one process: interceptors first, then the queue,
    /// then any matching event-waiters.
    pub(crate) fn queue_event_to(&mut self, pid: Pid, event: KernelEvent) {
        let now = self.clock.now_millis();
        let Some(process) = self.processes.get_mut(&pid) else {
            warn!(pid, "event target process not found");
            return;
        };
        if process.state != ProcessState::Alive {
            return;
        }

        if !process.raw_input_mode {
            for interceptor in process.interceptors.iter_mut() {
                if interceptor.on_event(&event) {
                    trace!(pid, kind = ?event.kind(), "event consumed by interceptor");
                    return;
                }
            }
        }

        process.push_event(event.clone(), now);
        let members = process.threads.clone();

        let mut woken = Vec::new();
        for tid in members {
            let Some(thread) = self.threads.get(&tid) else {
                continue;
            };
            if thread.state != ThreadState::Waiting {
                continue;
            }
            if let Some(WaitingReason::Event { filter, .. }) = &thread.waiting
                && filter_matches(filter, event.kind())
            {
                woken.push(tid);
            }
        }

        if woken.is_empty() {
            return;
        }

        let payload = serde_json::to_value(&event).unwrap_or(SysValue::Null);
        for tid in &woken {
            self.ready_thread(*tid, ok_args([payload.clone()]));
        }
        // The woken threads received this event directly; mark it consumed
        // so a later pull cannot deliver it to them twice.
        if let Some(process) = self.processes.get_mut(&pid)
            && let Some(entry) = process.event_queue.back_mut()
        {
            entry.consumed_by.extend(woken);
        }
    }
}
