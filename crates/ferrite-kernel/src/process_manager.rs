//! Process and thread lifecycle authority.
//!
//! Creation wires up credentials, stdio handle inheritance and the main
//! thread; exit drives the Alive -> Zombie -> Dead machine: threads are
//! forcibly terminated, handles closed, waiters woken with the exit status,
//! and the zombie reaped either by the woken waiter, by a later wait
//! syscall, or immediately when no live parent exists to collect it.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info};

use ferrite_vfs::Credentials;

use crate::error::{KernelError, Result};
use crate::exec::{ExecUnit, SysValue, err_args, ok_args};
use crate::handle::{
    Handle, HandleId, KeyboardHandle, LineBuffer, LineDiscipline, STDERR, STDIN, STDOUT,
    TerminalHandle,
};
use crate::kernel::Kernel;
use crate::process::{Pid, Process, ProcessDetails, ProcessState};
use crate::thread::{Thread, ThreadState, Tid, WaitTarget};

/// Everything needed to create a process besides its executable unit.
#[derive(Default)]
pub struct ProcessSpec {
    pub name: String,
    pub working_dir: String,
    pub parent: Option<Pid>,
    pub args: Vec<SysValue>,
    pub env: BTreeMap<String, String>,
    /// Child stdio slot -> parent handle id to inherit instead of the
    /// same-numbered slot.
    pub handle_overrides: BTreeMap<HandleId, HandleId>,
    /// Explicit credentials; inherited from the parent (or root) if absent.
    pub credentials: Option<Credentials>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            working_dir: "/".to_string(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: Pid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_working_dir(mut self, cwd: impl Into<String>) -> Self {
        self.working_dir = cwd.into();
        self
    }

    pub fn with_args(mut self, args: Vec<SysValue>) -> Self {
        self.args = args;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_handle_override(mut self, child_slot: HandleId, parent_handle: HandleId) -> Self {
        self.handle_overrides.insert(child_slot, parent_handle);
        self
    }
}

impl Kernel {
    /// Create a process with its main thread and register both with the
    /// scheduler.
    pub fn create_process(&mut self, spec: ProcessSpec, unit: Box<dyn ExecUnit>) -> Pid {
        let pid = self.alloc_pid();
        let credentials = spec.credentials.clone().unwrap_or_else(|| {
            spec.parent
                .and_then(|pp| self.processes.get(&pp))
                .map(|p| p.credentials.clone())
                .unwrap_or_else(Credentials::root)
        });

        let now = self.clock.now_millis();
        let mut process = Process::new(
            pid,
            spec.parent,
            spec.name.clone(),
            spec.working_dir.clone(),
            credentials,
            now,
        );

        // Environment: inherit the parent's, overlaid with explicit entries.
        if let Some(parent) = spec.parent.and_then(|pp| self.processes.get(&pp)) {
            process.env = parent.env.clone();
        }
        process.env.extend(spec.env.clone());

        // Handle table: inherit stdio slots 0-2 (with overrides) from the
        // parent; a parentless process gets a fresh keyboard/terminal set.
        if let Some(parent) = spec.parent.and_then(|pp| self.processes.get(&pp)) {
            for slot in [STDIN, STDOUT, STDERR] {
                let source = spec.handle_overrides.get(&slot).copied().unwrap_or(slot);
                if let Some(handle) = parent.handle(source) {
                    process.set_handle(slot, handle.clone());
                }
            }
        } else {
            let buffer = LineBuffer::shared();
            process.set_handle(STDIN, Handle::Keyboard(KeyboardHandle::new(buffer)));
            process.set_handle(
                STDOUT,
                Handle::Terminal(TerminalHandle::new(Rc::clone(&self.console))),
            );
            process.set_handle(
                STDERR,
                Handle::Terminal(TerminalHandle::new(Rc::clone(&self.console))),
            );
        }

        // Cooked-mode input: a keyboard stdin brings its line discipline.
        if let Some(buffer) = process.stdin_line_buffer() {
            process
                .interceptors
                .push(Box::new(LineDiscipline::new(buffer, Rc::clone(&self.console))));
        }

        let tid = self.alloc_tid();
        process.threads.push(tid);
        process.main_thread = tid;
        let thread = Thread::new(tid, pid, unit, spec.args);

        self.processes.insert(pid, process);
        self.add_thread(thread);

        info!(pid, name = %spec.name, main_tid = tid, "process created");
        pid
    }

    /// Add a secondary thread to an existing process.
    pub fn create_thread(
        &mut self,
        pid: Pid,
        unit: Box<dyn ExecUnit>,
        args: Vec<SysValue>,
    ) -> Result<Tid> {
        {
            let process = self
                .processes
                .get_mut(&pid)
                .ok_or(KernelError::ProcessNotFound { pid })?;
            if process.state != ProcessState::Alive {
                return Err(KernelError::ProcessNotFound { pid });
            }
        }

        let tid = self.alloc_tid();
        let process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound { pid })?;
        process.threads.push(tid);
        let thread = Thread::new(tid, pid, unit, args);
        self.add_thread(thread);
        debug!(pid, tid, "thread created");
        Ok(tid)
    }

    /// Drive a process into Zombie: terminate its threads, close its
    /// handles, wake its waiters, and reap immediately when nobody is left
    /// to collect the status.
    pub fn exit_process(&mut self, pid: Pid, exit_code: i32, exit_reason: Option<String>) {
        let Some(process) = self.processes.get_mut(&pid) else {
            return;
        };
        // Never age an already-dead process.
        if process.state != ProcessState::Alive {
            return;
        }

        let reason = exit_reason.unwrap_or_else(|| "no reason provided".to_string());
        process.state = ProcessState::Zombie;
        process.exit_code = exit_code;
        process.exit_reason = Some(reason.clone());
        process.close_all_handles();
        let parent = process.parent;

        info!(pid, exit_code, reason = %reason, "process exited");

        self.kill_process_threads(pid);
        let woken = self.on_process_exit(pid, exit_code, &reason, parent);

        if self.focused == Some(pid) {
            self.focused = None;
        }

        // Reap-on-wake, and orphan auto-reap when no live parent exists.
        let parent_alive = parent
            .and_then(|pp| self.processes.get(&pp))
            .is_some_and(|p| p.state == ProcessState::Alive);
        if woken > 0 || !parent_alive {
            self.delete_process(pid);
        }
    }

    /// Remove a process from the table entirely.  Terminal.
    pub(crate) fn delete_process(&mut self, pid: Pid) {
        if let Some(mut process) = self.processes.remove(&pid) {
            process.state = ProcessState::Dead;
            debug!(pid, "process removed from table");
        }
    }

    /// Resolve a wait-for-exit request for `waiting_tid`.
    ///
    /// Returns `true` if the request resolved immediately (failure tuple or
    /// synchronous reap) and `false` if the thread was parked.
    pub fn wait_for_process_exit(&mut self, target: WaitTarget, waiting_tid: Tid) -> bool {
        let Some(waiter_pid) = self.threads.get(&waiting_tid).map(|t| t.pid) else {
            return true;
        };

        match target {
            WaitTarget::Pid(pid) => {
                let Some(process) = self.processes.get(&pid) else {
                    self.ready_thread(waiting_tid, err_args(KernelError::ProcessNotFound { pid }.to_string()));
                    return true;
                };
                if process.parent != Some(waiter_pid) {
                    self.ready_thread(
                        waiting_tid,
                        err_args(KernelError::NotAChild { pid }.to_string()),
                    );
                    return true;
                }
                if process.state == ProcessState::Zombie {
                    self.reap_into(pid, waiting_tid);
                    return true;
                }
                self.wait_for_process(waiting_tid, WaitTarget::Pid(pid));
                false
            }
            WaitTarget::AnyChild => {
                let mut children = self
                    .processes
                    .values()
                    .filter(|p| p.parent == Some(waiter_pid));
                let Some(first) = children.next() else {
                    drop(children);
                    self.ready_thread(waiting_tid, err_args(KernelError::NoChildren.to_string()));
                    return true;
                };
                // Oldest zombie first; the process table iterates in pid
                // order.
                let zombie = std::iter::once(first)
                    .chain(children)
                    .find(|p| p.state == ProcessState::Zombie)
                    .map(|p| p.pid);
                match zombie {
                    Some(pid) => {
                        self.reap_into(pid, waiting_tid);
                        true
                    }
                    None => {
                        self.wait_for_process(waiting_tid, WaitTarget::AnyChild);
                        false
                    }
                }
            }
        }
    }

    /// Synchronously reap a zombie: deliver its status to the waiter and
    /// drop it from the table.
    fn reap_into(&mut self, pid: Pid, waiting_tid: Tid) {
        let (code, reason) = self
            .processes
            .get(&pid)
            .map(|p| {
                (
                    p.exit_code,
                    p.exit_reason.clone().unwrap_or_default(),
                )
            })
            .unwrap_or((0, String::new()));
        self.delete_process(pid);
        self.ready_thread(
            waiting_tid,
            ok_args([
                SysValue::from(pid),
                SysValue::from(code),
                SysValue::from(reason),
            ]),
        );
    }

    /// Register `joiner_tid` on a target thread's termination.
    pub fn join_thread(&mut self, target_tid: Tid, joiner_tid: Tid) {
        if target_tid == joiner_tid {
            self.ready_thread(joiner_tid, err_args("a thread cannot join itself"));
            return;
        }
        if target_tid > self.last_tid() || target_tid == 0 {
            self.ready_thread(joiner_tid, err_args(KernelError::ThreadNotFound { tid: target_tid }.to_string()));
            return;
        }
        // Terminated threads are pruned from the registry, so a known but
        // absent tid means the join completes immediately.
        let target_state = self.threads.get(&target_tid).map(|t| t.state);
        match target_state {
            None | Some(ThreadState::Terminated) => {
                self.ready_thread(joiner_tid, ok_args([]));
            }
            Some(_) => {
                if let Some(target) = self.threads.get_mut(&target_tid) {
                    target.joiners.push(joiner_tid);
                }
                self.wait_for_thread(joiner_tid, target_tid);
            }
        }
    }

    /// All pids currently in the table (zombies included).
    pub fn process_list(&self) -> Vec<Pid> {
        self.processes.keys().copied().collect()
    }

    pub fn process_details(&self, pid: Pid) -> Option<ProcessDetails> {
        self.processes.get(&pid).map(ProcessDetails::of)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ferrite_vfs::VfsManager;

    use super::*;
    use crate::clock::ManualClock;
    use crate::console::BufferConsole;
    use crate::event::RawEvent;
    use crate::exec::{NullLoader, ScriptUnit, StepOutcome};
    use crate::syscall::Syscall;

    fn kernel() -> Kernel {
        Kernel::new(
            VfsManager::new(),
            Box::new(NullLoader),
            BufferConsole::shared(),
            Arc::new(ManualClock::new(0)),
        )
    }

    fn idle_unit() -> Box<dyn ExecUnit> {
        Box::new(ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: i64::MAX }))
    }

    fn pass(kernel: &mut Kernel) {
        kernel.step(RawEvent::SchedulerYield);
    }

    #[test]
    fn wait_for_unknown_pid_fails_immediately() {
        let mut k = kernel();
        let pid = k.create_process(ProcessSpec::new("waiter"), idle_unit());
        let tid = k.process(pid).expect("process").main_thread;

        assert!(k.wait_for_process_exit(WaitTarget::Pid(999), tid));
        let thread = k.thread(tid).expect("thread");
        assert_eq!(thread.state, ThreadState::Ready);
        assert_eq!(thread.next_resume_args[0], SysValue::Bool(false));
    }

    #[test]
    fn wait_for_non_child_fails_immediately() {
        let mut k = kernel();
        let a = k.create_process(ProcessSpec::new("a"), idle_unit());
        let b = k.create_process(ProcessSpec::new("b"), idle_unit());
        let tid_a = k.process(a).expect("a").main_thread;

        assert!(k.wait_for_process_exit(WaitTarget::Pid(b), tid_a));
        let thread = k.thread(tid_a).expect("thread");
        assert_eq!(thread.next_resume_args[0], SysValue::Bool(false));
    }

    #[test]
    fn wait_for_zombie_reaps_synchronously() {
        let mut k = kernel();
        let parent = k.create_process(ProcessSpec::new("parent"), idle_unit());
        let child_unit = ScriptUnit::new().then(|_, _| StepOutcome::Finished);
        let child = k.create_process(
            ProcessSpec::new("child").with_parent(parent),
            Box::new(child_unit),
        );

        // Child finishes; parent is alive and not waiting, so the child
        // stays a zombie.
        pass(&mut k);
        assert_eq!(k.process(child).expect("child").state, ProcessState::Zombie);

        let tid = k.process(parent).expect("parent").main_thread;
        assert!(k.wait_for_process_exit(WaitTarget::Pid(child), tid));

        assert!(k.process(child).is_none(), "zombie reaped from the table");
        let thread = k.thread(tid).expect("thread");
        assert_eq!(
            thread.next_resume_args,
            ok_args([
                SysValue::from(child),
                SysValue::from(0),
                SysValue::from("no reason provided"),
            ])
        );
    }

    #[test]
    fn parked_waiter_is_woken_by_exit_and_child_reaped() {
        let mut k = kernel();
        let parent_unit = ScriptUnit::new()
            .then_syscall(|| Syscall::WaitForChildExit {
                target: WaitTarget::Pid(2),
            })
            .then(|args, _| {
                assert_eq!(args[0], SysValue::Bool(true));
                assert_eq!(args[1], SysValue::from(2));
                assert_eq!(args[2], SysValue::from(33));
                StepOutcome::Finished
            });
        let parent = k.create_process(ProcessSpec::new("parent"), Box::new(parent_unit));
        let child_unit = ScriptUnit::new().then_syscall(|| Syscall::Exit {
            code: 33,
            reason: None,
        });
        let child = k.create_process(
            ProcessSpec::new("child").with_parent(parent),
            Box::new(child_unit),
        );
        assert_eq!(child, 2);

        // Pass 1: parent parks on the child; child exits, waking the
        // parent and reaping the zombie in the same operation.
        pass(&mut k);
        assert!(k.process(child).is_none(), "reap-on-wake removed the child");
        // Pass 2: parent consumes the exit tuple and finishes.
        pass(&mut k);
        assert!(k.process(parent).is_none());
    }

    #[test]
    fn wildcard_wait_with_no_children_fails() {
        let mut k = kernel();
        let pid = k.create_process(ProcessSpec::new("lonely"), idle_unit());
        let tid = k.process(pid).expect("process").main_thread;

        assert!(k.wait_for_process_exit(WaitTarget::AnyChild, tid));
        let thread = k.thread(tid).expect("thread");
        assert_eq!(thread.next_resume_args[0], SysValue::Bool(false));
    }

    #[test]
    fn orphan_zombie_is_auto_reaped() {
        let mut k = kernel();
        let parent = k.create_process(ProcessSpec::new("parent"), idle_unit());
        let child = k.create_process(ProcessSpec::new("child").with_parent(parent), idle_unit());

        // Parent dies first (no grandparent: removed outright).
        k.exit_process(parent, 0, None);
        assert!(k.process(parent).is_none());

        // Child exits with its parent already gone: no permanent zombie.
        k.exit_process(child, 0, None);
        assert!(k.process(child).is_none());
    }

    #[test]
    fn exit_is_idempotent_and_never_moves_backward() {
        let mut k = kernel();
        let parent = k.create_process(ProcessSpec::new("parent"), idle_unit());
        let child = k.create_process(ProcessSpec::new("child").with_parent(parent), idle_unit());

        k.exit_process(child, 7, Some("first".into()));
        let snapshot = k.process(child).expect("zombie").exit_code;
        // A second exit must not overwrite the recorded status.
        k.exit_process(child, 9, Some("second".into()));
        assert_eq!(k.process(child).expect("zombie").exit_code, snapshot);
        assert_eq!(k.process(child).expect("zombie").state, ProcessState::Zombie);
    }

    #[test]
    fn join_on_live_thread_parks_until_termination() {
        let mut k = kernel();
        let pid = k.create_process(ProcessSpec::new("joiner"), {
            Box::new(
                ScriptUnit::new()
                    .then_syscall(|| Syscall::JoinThread { tid: 2 })
                    .then(|args, _| {
                        assert_eq!(args[0], SysValue::Bool(true));
                        StepOutcome::Finished
                    }),
            )
        });
        let worker = ScriptUnit::new()
            .then_syscall(|| Syscall::GetPid)
            .then(|_, _| StepOutcome::Finished);
        let worker_tid = k
            .create_thread(pid, Box::new(worker), Vec::new())
            .expect("worker");
        assert_eq!(worker_tid, 2);

        let main_tid = k.process(pid).expect("process").main_thread;
        // Pass 1: main parks on the worker; worker yields via syscall.
        pass(&mut k);
        assert_eq!(
            k.thread(main_tid).expect("main").state,
            ThreadState::Waiting
        );
        // Pass 2: worker finishes, waking the joiner.
        pass(&mut k);
        assert_eq!(k.thread(main_tid).expect("main").state, ThreadState::Ready);
    }

    #[test]
    fn join_on_terminated_thread_completes_immediately() {
        let mut k = kernel();
        let pid = k.create_process(ProcessSpec::new("p"), idle_unit());
        let worker = ScriptUnit::new().then(|_, _| StepOutcome::Finished);
        let worker_tid = k
            .create_thread(pid, Box::new(worker), Vec::new())
            .expect("worker");

        pass(&mut k); // worker finishes and is pruned
        assert!(k.thread(worker_tid).is_none());

        let main_tid = k.process(pid).expect("process").main_thread;
        k.join_thread(worker_tid, main_tid);
        let main = k.thread(main_tid).expect("main");
        assert_eq!(main.next_resume_args[0], SysValue::Bool(true));
    }

    #[test]
    fn child_inherits_stdio_and_credentials() {
        let mut k = kernel();
        let parent = k.create_process(
            ProcessSpec::new("parent").with_credentials(Credentials::user(1000, 100)),
            idle_unit(),
        );
        let child = k.create_process(ProcessSpec::new("child").with_parent(parent), idle_unit());

        let child_process = k.process(child).expect("child");
        assert_eq!(child_process.credentials.uid, 1000);
        assert!(child_process.handle(STDIN).is_some());
        assert!(child_process.handle(STDOUT).is_some());
        assert!(child_process.handle(STDERR).is_some());
    }
}
