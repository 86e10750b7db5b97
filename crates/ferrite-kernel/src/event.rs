//! Typed kernel events.
//!
//! Raw host input arrives as [`RawEvent`]s through the event pump.  The
//! event manager classifies them into [`KernelEvent`]s, each with a fixed
//! routing policy: keypress and character events go to the focused process
//! only; screen-resize, timer and remote events are broadcast to every live
//! process.
//!
//! Inside a process queue an event is wrapped in an [`EncasedEvent`]
//! carrying an absolute expiry and the set of threads that already consumed
//! it, so a single event reaches each interested thread at most once.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::exec::SysValue;
use crate::thread::Tid;

/// How long a queued event stays deliverable, in milliseconds.
pub const EVENT_LIFESPAN_MS: i64 = 5_000;

/// Maximum per-process event queue length; the oldest entry is evicted
/// first when exceeded.
pub const MAX_EVENT_QUEUE: usize = 64;

/// Key codes the kernel itself cares about (line discipline).
pub mod keys {
    pub const BACKSPACE: u32 = 8;
    pub const ENTER: u32 = 13;
}

/// The closed set of event classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    KeyDown,
    KeyUp,
    Char,
    ScreenResize,
    Timer,
    Remote,
}

/// Delivery policy of an event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingType {
    /// Enqueued on every live process.
    Broadcast,
    /// Enqueued only on the focused process, dropped if none is focused.
    Focused,
}

/// A classified event with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    KeyDown { code: u32, held: bool },
    KeyUp { code: u32 },
    Char { ch: char },
    ScreenResize { cols: u16, rows: u16 },
    Timer { id: u64 },
    Remote { channel: u32, payload: SysValue },
}

impl KernelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::KeyDown { .. } => EventKind::KeyDown,
            Self::KeyUp { .. } => EventKind::KeyUp,
            Self::Char { .. } => EventKind::Char,
            Self::ScreenResize { .. } => EventKind::ScreenResize,
            Self::Timer { .. } => EventKind::Timer,
            Self::Remote { .. } => EventKind::Remote,
        }
    }

    pub fn routing(&self) -> RoutingType {
        match self.kind() {
            EventKind::KeyDown | EventKind::KeyUp | EventKind::Char => RoutingType::Focused,
            EventKind::ScreenResize | EventKind::Timer | EventKind::Remote => {
                RoutingType::Broadcast
            }
        }
    }
}

/// A raw event from the host boundary, before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// External request to stop the kernel.
    Terminate,
    /// A wall-clock timer fired.
    Timer { id: u64 },
    /// The scheduler's own "more work pending" self-signal.
    SchedulerYield,
    Key { code: u32, held: bool },
    KeyUp { code: u32 },
    Char { ch: char },
    ScreenResize { cols: u16, rows: u16 },
    Remote { channel: u32, payload: SysValue },
}

/// A queued event with expiry and per-thread consumption tracking.
#[derive(Debug, Clone)]
pub struct EncasedEvent {
    pub event: KernelEvent,
    /// Absolute expiry, UTC epoch millis.
    pub expires_at: i64,
    /// Threads that already received this event.
    pub consumed_by: HashSet<Tid>,
}

impl EncasedEvent {
    pub fn new(event: KernelEvent, now: i64) -> Self {
        Self {
            event,
            expires_at: now + EVENT_LIFESPAN_MS,
            consumed_by: HashSet::new(),
        }
    }

    pub fn expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// True if `filter` accepts events of `kind`.  An empty filter accepts
/// everything.
pub fn filter_matches(filter: &[EventKind], kind: EventKind) -> bool {
    filter.is_empty() || filter.contains(&kind)
}
