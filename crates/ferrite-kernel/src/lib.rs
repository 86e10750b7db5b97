//! FerriteOS kernel.
//!
//! A single-machine, single-execution-context operating-system emulation:
//! many independent scripted execution units multiplexed onto one logical
//! CPU, each with a process/thread identity, asynchronous input events
//! delivered through typed routing, and filesystem access mediated by a
//! syscall boundary.
//!
//! - **[`kernel`]** -- The arena: flat PID/TID tables, ready queue, waiting
//!   set, allocators; all cross-component calls go through [`Kernel`].
//! - **[`scheduler`]** -- Cooperative-with-preemption run loop, priority
//!   aging, the waiting-reason state machine, timer reconciliation.
//! - **[`process_manager`]** -- Process/thread factory and lifecycle:
//!   zombie/reap semantics, wait-for-exit, thread join.
//! - **[`event_manager`]** -- Classifies raw host input and routes it:
//!   broadcast kinds to every live process, focused kinds to the focused
//!   process only.
//! - **[`syscall`]** -- The dispatch table; every call resolves to a
//!   success/failure tuple or a wait registration.
//! - **[`exec`]** -- The resumable-unit contract driven by the scheduler.
//! - **[`handle`]** -- Capability-typed handle table entries (keyboard,
//!   terminal, file).
//! - **[`pump`]** / **[`clock`]** / **[`console`]** -- Host boundary:
//!   blocking event source with a single armed timer, millisecond wall
//!   clock, and console output.
//!
//! Concurrency model: strictly single-threaded cooperative interleaving.
//! Only one unit ever runs at a time, so process-local state needs no
//! locking; cross-process effects (exit wake-ups, broadcasts) are applied
//! as complete operations between bursts.

pub mod clock;
pub mod console;
pub mod error;
pub mod event;
pub mod event_manager;
pub mod exec;
pub mod handle;
pub mod interceptor;
pub mod kernel;
pub mod process;
pub mod process_manager;
pub mod pump;
pub mod ready_queue;
pub mod scheduler;
pub mod syscall;
pub mod thread;

pub use clock::{Clock, ManualClock, SystemClock};
pub use console::{BufferConsole, Console, SharedConsole};
pub use error::{KernelError, Result};
pub use event::{EventKind, KernelEvent, RawEvent, RoutingType};
pub use exec::{
    BASE_QUANTUM_MS, BurstBudget, ExecUnit, NullLoader, ProgramLoader, ScriptUnit, StepOutcome,
    SysValue, err_args, ok_args,
};
pub use handle::{Handle, HandleId, STDERR, STDIN, STDOUT};
pub use interceptor::EventInterceptor;
pub use kernel::Kernel;
pub use process::{Pid, Process, ProcessDetails, ProcessState};
pub use process_manager::ProcessSpec;
pub use pump::{EventInjector, EventPump, TimerId};
pub use syscall::{ProcessLaunch, Syscall};
pub use thread::{Thread, ThreadState, Tid, WaitTarget, WaitingReason};
