//! The kernel arena.
//!
//! One [`Kernel`] owns every record in the system: the process and thread
//! tables, the ready queue and waiting set, the focused-process pointer,
//! the PID/TID allocators, and the collaborators (clock, console, VFS,
//! program loader, host event pump).  Threads and processes refer to each
//! other by id only; every cross-component operation goes through methods
//! on this type, implemented across the `scheduler`, `event_manager`,
//! `process_manager` and `syscall` modules.

use std::collections::BTreeMap;
use std::sync::Arc;

use ferrite_vfs::VfsManager;

use crate::clock::Clock;
use crate::console::SharedConsole;
use crate::exec::{BASE_QUANTUM_MS, ProgramLoader};
use crate::process::{Pid, Process};
use crate::pump::{EventInjector, EventPump, TimerId};
use crate::ready_queue::ReadyQueue;
use crate::thread::{Thread, Tid};

/// The single-instance FerriteOS kernel.
pub struct Kernel {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) console: SharedConsole,
    pub(crate) vfs: VfsManager,
    pub(crate) loader: Box<dyn ProgramLoader>,
    pub(crate) pump: EventPump,

    pub(crate) processes: BTreeMap<Pid, Process>,
    pub(crate) threads: BTreeMap<Tid, Thread>,
    pub(crate) ready: ReadyQueue,
    pub(crate) waiting: Vec<Tid>,
    pub(crate) focused: Option<Pid>,

    /// The scheduler's own armed wake-up timer, if any.
    pub(crate) next_sleep_timer: Option<TimerId>,
    pub(crate) quantum_ms: i64,

    next_pid: Pid,
    next_tid: Tid,
}

impl Kernel {
    pub fn new(
        vfs: VfsManager,
        loader: Box<dyn ProgramLoader>,
        console: SharedConsole,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pump = EventPump::new(Arc::clone(&clock));
        Self {
            clock,
            console,
            vfs,
            loader,
            pump,
            processes: BTreeMap::new(),
            threads: BTreeMap::new(),
            ready: ReadyQueue::new(),
            waiting: Vec::new(),
            focused: None,
            next_sleep_timer: None,
            quantum_ms: BASE_QUANTUM_MS,
            next_pid: 0,
            next_tid: 0,
        }
    }

    /// Override the burst quantum (milliseconds).
    pub fn with_quantum(mut self, quantum_ms: i64) -> Self {
        self.quantum_ms = quantum_ms;
        self
    }

    /// Handle for host input producers.
    pub fn injector(&self) -> EventInjector {
        self.pump.injector()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn vfs(&self) -> &VfsManager {
        &self.vfs
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub(crate) fn alloc_pid(&mut self) -> Pid {
        self.next_pid += 1;
        self.next_pid
    }

    pub(crate) fn alloc_tid(&mut self) -> Tid {
        self.next_tid += 1;
        self.next_tid
    }

    /// Highest TID handed out so far.
    pub(crate) fn last_tid(&self) -> Tid {
        self.next_tid
    }
}
