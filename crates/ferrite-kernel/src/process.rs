//! Process records: handle table, event queue, lifecycle bookkeeping.
//!
//! A process owns its threads (by id), a handle table, a bounded event
//! queue with per-thread consumption tracking, credentials, and resource
//! counters.  Lifecycle only ever moves forward: Alive -> Zombie -> Dead.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use serde::Serialize;
use tracing::warn;

use ferrite_vfs::Credentials;

use crate::event::{EncasedEvent, EventKind, KernelEvent, MAX_EVENT_QUEUE, filter_matches};
use crate::handle::{Handle, HandleId, STDERR, STDIN};
use crate::interceptor::EventInterceptor;
use crate::thread::Tid;

/// Monotonic process identifier.
pub type Pid = u64;

/// Lifecycle state of a process.  Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Running normally.
    Alive,
    /// Logic finished; exit status not yet collected by the parent.
    Zombie,
    /// Fully reaped; about to leave the process table.
    Dead,
}

/// A process record.
pub struct Process {
    pub pid: Pid,
    /// Parent process id; `None` for the boot process.
    pub parent: Option<Pid>,
    pub name: String,
    pub state: ProcessState,
    /// Owned threads in creation order.
    pub threads: Vec<Tid>,
    /// The thread whose termination ends the process.
    pub main_thread: Tid,
    handles: BTreeMap<HandleId, Handle>,
    next_handle: HandleId,
    pub event_queue: VecDeque<EncasedEvent>,
    pub interceptors: Vec<Box<dyn EventInterceptor>>,
    pub working_dir: String,
    pub env: BTreeMap<String, String>,
    pub raw_input_mode: bool,
    /// Wall time spent executing this process's threads, millis.
    pub cpu_time: i64,
    /// Wall time spent inside syscalls on behalf of this process, millis.
    pub sys_time: i64,
    pub exit_code: i32,
    pub exit_reason: Option<String>,
    pub credentials: Credentials,
    pub created_at: i64,
}

impl Process {
    pub fn new(
        pid: Pid,
        parent: Option<Pid>,
        name: String,
        working_dir: String,
        credentials: Credentials,
        created_at: i64,
    ) -> Self {
        Self {
            pid,
            parent,
            name,
            state: ProcessState::Alive,
            threads: Vec::new(),
            main_thread: 0,
            handles: BTreeMap::new(),
            next_handle: STDERR + 1,
            event_queue: VecDeque::new(),
            interceptors: Vec::new(),
            working_dir,
            env: BTreeMap::new(),
            raw_input_mode: false,
            cpu_time: 0,
            sys_time: 0,
            exit_code: 0,
            exit_reason: None,
            credentials,
            created_at,
        }
    }

    // -- Handle table -------------------------------------------------------

    /// Install a handle in the next free slot and return its id.
    pub fn add_handle(&mut self, handle: Handle) -> HandleId {
        let id = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(id, handle);
        id
    }

    /// Install a handle at a specific slot (stdio wiring, overrides).
    pub fn set_handle(&mut self, id: HandleId, handle: Handle) {
        self.next_handle = self.next_handle.max(id + 1);
        self.handles.insert(id, handle);
    }

    pub fn handle_mut(&mut self, id: HandleId) -> Option<&mut Handle> {
        self.handles.get_mut(&id)
    }

    pub fn handle(&self, id: HandleId) -> Option<&Handle> {
        self.handles.get(&id)
    }

    pub fn remove_handle(&mut self, id: HandleId) -> Option<Handle> {
        self.handles.remove(&id)
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Close every handle; failures are logged, never fatal.
    pub fn close_all_handles(&mut self) {
        let handles = std::mem::take(&mut self.handles);
        for (id, mut handle) in handles {
            if let Err(e) = handle.close() {
                warn!(pid = self.pid, handle = id, error = %e, "handle close failed during teardown");
            }
        }
    }

    /// The keyboard line buffer behind stdin, if slot 0 holds one.
    pub fn stdin_line_buffer(&self) -> Option<crate::handle::SharedLineBuffer> {
        match self.handle(STDIN) {
            Some(Handle::Keyboard(kb)) => Some(kb.buffer()),
            _ => None,
        }
    }

    // -- Event queue --------------------------------------------------------

    /// Drop entries past their expiry.  Called lazily on every queue access.
    pub fn purge_expired_events(&mut self, now: i64) {
        self.event_queue.retain(|e| !e.expired(now));
    }

    /// Wrap and append an event, evicting the oldest entry beyond the queue
    /// bound.
    pub fn push_event(&mut self, event: KernelEvent, now: i64) {
        self.purge_expired_events(now);
        self.event_queue.push_back(EncasedEvent::new(event, now));
        while self.event_queue.len() > MAX_EVENT_QUEUE {
            self.event_queue.pop_front();
        }
    }

    /// First still-live queued event matching `filter` that `tid` has not
    /// yet consumed; marks it consumed.
    pub fn next_event_for(
        &mut self,
        tid: Tid,
        filter: &[EventKind],
        now: i64,
    ) -> Option<KernelEvent> {
        self.purge_expired_events(now);
        for encased in self.event_queue.iter_mut() {
            if filter_matches(filter, encased.event.kind()) && !encased.consumed_by.contains(&tid)
            {
                encased.consumed_by.insert(tid);
                return Some(encased.event.clone());
            }
        }
        None
    }
}

/// Snapshot of a process for the process-details syscall.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessDetails {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub uid: u32,
    pub gid: u32,
    pub state: ProcessState,
    pub name: String,
    pub cwd: String,
    pub cpu_time: i64,
    pub sys_time: i64,
    pub threads: usize,
    pub handles: usize,
}

impl ProcessDetails {
    pub fn of(process: &Process) -> Self {
        Self {
            pid: process.pid,
            ppid: process.parent,
            uid: process.credentials.uid,
            gid: process.credentials.gid,
            state: process.state,
            name: process.name.clone(),
            cwd: process.working_dir.clone(),
            cpu_time: process.cpu_time,
            sys_time: process.sys_time,
            threads: process.threads.len(),
            handles: process.handle_count(),
        }
    }
}
