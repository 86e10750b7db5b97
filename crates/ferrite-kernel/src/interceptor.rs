//! Process event interceptors.
//!
//! An interceptor registered on a process sees every event before it
//! reaches the process event queue and may consume it.  This is how the
//! keyboard line discipline absorbs raw character and key events so that a
//! cooked-mode reader never races a thread's event-wait filter.
//! Interceptors are skipped while the process is in raw input mode.

use crate::event::KernelEvent;

/// Pre-queue event hook.
pub trait EventInterceptor {
    /// Return `true` to consume the event; it will not reach the queue.
    fn on_event(&mut self, event: &KernelEvent) -> bool;
}
