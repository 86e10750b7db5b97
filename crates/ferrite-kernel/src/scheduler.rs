//! The scheduler run loop.
//!
//! One iteration: pull the next raw event (blocking, with the armed wake-up
//! timer as the only deadline), hand it to the event manager unless it is
//! the terminate signal, the scheduler's own timer, or the internal
//! self-signal; re-evaluate the waiting set; then drain a snapshot of the
//! ready queue, giving each thread exactly one burst.  A thread re-queued
//! during the pass (preemption) runs again only in the next pass, so a
//! CPU-bound thread can never starve the others within one iteration.
//!
//! Priority aging happens here: a burst ending in a syscall improves the
//! thread's priority, a burst ending in preemption worsens it.

use tracing::{debug, error, info, trace};

use crate::event::RawEvent;
use crate::exec::{BurstBudget, StepOutcome, SysValue, ok_args};
use crate::kernel::Kernel;
use crate::process::Pid;
use crate::thread::{Thread, ThreadExitStatus, ThreadState, Tid, WaitTarget, WaitingReason};

impl Kernel {
    /// Block on the host event source until the terminate signal arrives.
    pub fn run(&mut self) {
        info!("scheduler running");
        loop {
            let raw = self.pump.pull();
            if !self.step(raw) {
                break;
            }
        }
        info!("scheduler stopped");
    }

    /// Handle one raw event and run one scheduler pass.  Returns `false`
    /// when the kernel should stop.
    pub fn step(&mut self, raw: RawEvent) -> bool {
        match raw {
            RawEvent::Terminate => {
                info!("terminate signal received");
                return false;
            }
            RawEvent::Timer { id } if self.next_sleep_timer == Some(id) => {
                // Our own wake-up timer; the waiting-set sweep below does
                // the actual waking.
                self.next_sleep_timer = None;
            }
            RawEvent::SchedulerYield => {}
            other => self.dispatch_raw(other),
        }

        self.check_waiting_threads();

        // Drain the snapshot: threads re-queued during this pass wait for
        // the next one.
        let mut run_count = self.ready.count();
        while run_count > 0 {
            if let Some(tid) = self.ready.pop() {
                match self.threads.get(&tid).map(|t| t.state) {
                    Some(ThreadState::Ready) => self.execute_thread(tid),
                    _ => trace!(tid, "dropping stale ready-queue entry"),
                }
            }
            run_count -= 1;
        }

        if self.ready.has_work() {
            self.pump.queue(RawEvent::SchedulerYield);
        } else {
            self.schedule_next_sleep();
        }
        true
    }

    /// Register a thread with the scheduler, queueing it if runnable.
    pub(crate) fn add_thread(&mut self, thread: Thread) {
        let (tid, pid, priority, runnable) = (
            thread.tid,
            thread.pid,
            thread.priority(),
            thread.state == ThreadState::Ready,
        );
        self.threads.insert(tid, thread);
        if runnable {
            self.ready.push(tid, pid, priority);
        }
    }

    // -- Burst execution ----------------------------------------------------

    fn execute_thread(&mut self, tid: Tid) {
        let Some(mut thread) = self.threads.remove(&tid) else {
            return;
        };
        let pid = thread.pid;
        let is_main = self
            .processes
            .get(&pid)
            .is_some_and(|p| p.main_thread == tid);

        let started = self.clock.now_millis();
        let budget = BurstBudget::new(self.clock(), started + self.quantum_ms);
        let args = std::mem::take(&mut thread.next_resume_args);
        let outcome = thread.unit.resume(&args, &budget);

        let burst = self.clock.now_millis() - started;
        if let Some(process) = self.processes.get_mut(&pid) {
            process.cpu_time += burst;
        }

        match outcome {
            StepOutcome::Syscall(call) => {
                // Reward the cooperative thread, then let the syscall layer
                // re-ready or park it.
                thread.improve_priority();
                thread.state = ThreadState::Waiting;
                self.threads.insert(tid, thread);
                self.execute_syscall(tid, call);
            }
            StepOutcome::Preempted => {
                thread.worsen_priority();
                thread.state = ThreadState::Ready;
                let priority = thread.priority();
                self.threads.insert(tid, thread);
                self.ready.push(tid, pid, priority);
                debug!(tid, priority, "thread preempted");
            }
            StepOutcome::Finished => {
                info!(tid, "thread finished execution (0)");
                thread.state = ThreadState::Terminated;
                thread.exit_status = Some(ThreadExitStatus::Finished);
                self.threads.insert(tid, thread);
                self.finish_thread(tid);
                if is_main {
                    self.exit_process(pid, 0, None);
                }
            }
            StepOutcome::Errored(message) => {
                error!(tid, %message, "thread finished execution due to error (1)");
                thread.state = ThreadState::Terminated;
                thread.exit_status = Some(ThreadExitStatus::Errored);
                self.threads.insert(tid, thread);
                self.finish_thread(tid);
                if is_main {
                    self.exit_process(pid, 1, Some(message));
                }
            }
        }
    }

    /// Wake joiners of a terminated thread and prune it from the
    /// registries.
    fn finish_thread(&mut self, tid: Tid) {
        let Some(thread) = self.threads.get_mut(&tid) else {
            return;
        };
        let pid = thread.pid;
        let joiners = std::mem::take(&mut thread.joiners);
        for joiner in joiners {
            let parked_on_us = matches!(
                self.threads.get(&joiner),
                Some(t) if t.state == ThreadState::Waiting
                    && matches!(&t.waiting, Some(WaitingReason::ThreadJoin { target }) if *target == tid)
            );
            if parked_on_us {
                self.ready_thread(joiner, ok_args([]));
            }
        }

        self.threads.remove(&tid);
        if let Some(process) = self.processes.get_mut(&pid) {
            process.threads.retain(|t| *t != tid);
        }
    }

    // -- Wake/park primitives -----------------------------------------------

    /// Clear all waiting state and queue the thread with the given resume
    /// arguments.
    pub(crate) fn ready_thread(&mut self, tid: Tid, args: Vec<SysValue>) {
        let Some(thread) = self.threads.get_mut(&tid) else {
            return;
        };
        if thread.state == ThreadState::Terminated {
            return;
        }
        thread.waiting = None;
        thread.next_resume_args = args;
        thread.state = ThreadState::Ready;
        let (pid, priority) = (thread.pid, thread.priority());
        self.ready.push(tid, pid, priority);
    }

    fn park(&mut self, tid: Tid, reason: WaitingReason) {
        let Some(thread) = self.threads.get_mut(&tid) else {
            return;
        };
        thread.state = ThreadState::Waiting;
        thread.waiting = Some(reason);
        thread.next_resume_args = Vec::new();
        if !self.waiting.contains(&tid) {
            self.waiting.push(tid);
        }
    }

    pub(crate) fn put_thread_to_sleep(&mut self, tid: Tid, wake_at: i64) {
        self.park(tid, WaitingReason::Sleep { wake_at });
    }

    pub(crate) fn wait_for_event(
        &mut self,
        tid: Tid,
        filter: Vec<crate::event::EventKind>,
        timeout_ms: i64,
    ) {
        let timeout_at = self
            .clock
            .now_millis()
            .saturating_add(timeout_ms.max(0));
        self.park(tid, WaitingReason::Event { filter, timeout_at });
    }

    pub(crate) fn wait_for_process(&mut self, tid: Tid, target: WaitTarget) {
        self.park(tid, WaitingReason::ProcessExit { target });
    }

    pub(crate) fn wait_for_thread(&mut self, tid: Tid, target: Tid) {
        self.park(tid, WaitingReason::ThreadJoin { target });
    }

    // -- Waiting-set maintenance --------------------------------------------

    /// Move every thread whose sleep deadline or event-wait timeout has
    /// elapsed back to the ready queue.  A timed-out event wait resumes
    /// with a null event.
    pub(crate) fn check_waiting_threads(&mut self) {
        let now = self.clock.now_millis();
        let current = std::mem::take(&mut self.waiting);
        let mut still_waiting = Vec::new();
        let mut wake: Vec<(Tid, Vec<SysValue>)> = Vec::new();

        for tid in current {
            let Some(thread) = self.threads.get(&tid) else {
                continue;
            };
            if thread.state != ThreadState::Waiting {
                continue;
            }
            match &thread.waiting {
                Some(WaitingReason::Sleep { wake_at }) if *wake_at <= now => {
                    wake.push((tid, ok_args([])));
                }
                Some(WaitingReason::Event { timeout_at, .. }) if *timeout_at <= now => {
                    wake.push((tid, ok_args([SysValue::Null])));
                }
                Some(_) => still_waiting.push(tid),
                None => {}
            }
        }

        self.waiting = still_waiting;
        for (tid, args) in wake {
            self.ready_thread(tid, args);
        }
    }

    /// Wake every thread parked on this pid, or on "any child" of its
    /// parent.  Returns how many threads were woken.
    pub(crate) fn on_process_exit(
        &mut self,
        pid: Pid,
        code: i32,
        reason: &str,
        parent: Option<Pid>,
    ) -> usize {
        let snapshot = self.waiting.clone();
        let mut woken = 0;
        for tid in snapshot {
            let Some(thread) = self.threads.get(&tid) else {
                continue;
            };
            if thread.state != ThreadState::Waiting {
                continue;
            }
            let matches = match &thread.waiting {
                Some(WaitingReason::ProcessExit {
                    target: WaitTarget::Pid(p),
                }) => *p == pid,
                Some(WaitingReason::ProcessExit {
                    target: WaitTarget::AnyChild,
                }) => parent == Some(thread.pid),
                _ => false,
            };
            if matches {
                self.ready_thread(
                    tid,
                    ok_args([
                        SysValue::from(pid),
                        SysValue::from(code),
                        SysValue::from(reason),
                    ]),
                );
                woken += 1;
            }
        }
        woken
    }

    /// Purge every thread of a dying process from the ready and waiting
    /// collections and mark them terminated; none of them runs again.
    pub(crate) fn kill_process_threads(&mut self, pid: Pid) {
        let removed_ready = self.ready.remove_for_pid(pid);
        let threads = &self.threads;
        self.waiting
            .retain(|tid| threads.get(tid).is_some_and(|t| t.pid != pid));

        let tids = self
            .processes
            .get(&pid)
            .map(|p| p.threads.clone())
            .unwrap_or_default();
        for tid in tids {
            if let Some(mut thread) = self.threads.remove(&tid) {
                thread.state = ThreadState::Terminated;
                if thread.exit_status.is_none() {
                    thread.exit_status = Some(ThreadExitStatus::Killed);
                }
                for joiner in std::mem::take(&mut thread.joiners) {
                    let parked_on_us = matches!(
                        self.threads.get(&joiner),
                        Some(t) if t.state == ThreadState::Waiting
                            && matches!(&t.waiting, Some(WaitingReason::ThreadJoin { target }) if *target == tid)
                    );
                    if parked_on_us {
                        self.ready_thread(joiner, ok_args([]));
                    }
                }
            }
        }
        if let Some(process) = self.processes.get_mut(&pid) {
            process.threads.clear();
        }
        debug!(pid, removed_ready, "process threads purged");
    }

    /// Arm a single wake-up timer for the earliest pending deadline among
    /// sleeping and timeout-waiting threads, replacing any armed timer.
    fn schedule_next_sleep(&mut self) {
        let mut earliest: Option<i64> = None;
        for tid in &self.waiting {
            let Some(thread) = self.threads.get(tid) else {
                continue;
            };
            let deadline = match &thread.waiting {
                Some(WaitingReason::Sleep { wake_at }) => Some(*wake_at),
                Some(WaitingReason::Event { timeout_at, .. }) if *timeout_at < i64::MAX => {
                    Some(*timeout_at)
                }
                _ => None,
            };
            if let Some(d) = deadline {
                earliest = Some(earliest.map_or(d, |e| e.min(d)));
            }
        }

        let Some(wake_at) = earliest else {
            return;
        };
        let duration = (wake_at - self.clock.now_millis()).max(0);
        if let Some(old) = self.next_sleep_timer.take() {
            self.pump.cancel_timer(old);
        }
        self.next_sleep_timer = Some(self.pump.start_timer(duration));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ferrite_vfs::VfsManager;

    use super::*;
    use crate::clock::ManualClock;
    use crate::console::BufferConsole;
    use crate::exec::{NullLoader, ScriptUnit};
    use crate::process::ProcessState;
    use crate::process_manager::ProcessSpec;
    use crate::syscall::Syscall;

    fn kernel_with_clock() -> (Kernel, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let kernel = Kernel::new(
            VfsManager::new(),
            Box::new(NullLoader),
            BufferConsole::shared(),
            Arc::clone(&clock) as Arc<dyn crate::clock::Clock>,
        );
        (kernel, clock)
    }

    fn pass(kernel: &mut Kernel) {
        kernel.step(RawEvent::SchedulerYield);
    }

    #[test]
    fn sleeping_thread_wakes_after_deadline() {
        let (mut kernel, clock) = kernel_with_clock();
        let unit = ScriptUnit::new()
            .then_syscall(|| Syscall::Sleep { millis: 1_000 })
            .then(|args, _| {
                assert_eq!(args[0], SysValue::Bool(true));
                StepOutcome::Finished
            });
        let pid = kernel.create_process(ProcessSpec::new("sleeper"), Box::new(unit));
        let tid = kernel.process(pid).expect("process").main_thread;
        assert_eq!(kernel.thread(tid).expect("thread").state, ThreadState::Ready);

        // First pass: the thread issues the sleep syscall and parks.
        pass(&mut kernel);
        {
            let thread = kernel.thread(tid).expect("thread");
            assert_eq!(thread.state, ThreadState::Waiting);
            assert_eq!(
                thread.waiting,
                Some(WaitingReason::Sleep { wake_at: 1_000 })
            );
        }

        // Not yet: deadline hasn't elapsed.
        clock.set(999);
        pass(&mut kernel);
        assert_eq!(
            kernel.thread(tid).expect("thread").state,
            ThreadState::Waiting
        );

        // Deadline reached: the thread wakes, runs to completion, and the
        // process becomes a zombie with exit code 0 (boot process, no
        // parent, so it is auto-reaped to Dead and leaves the table).
        clock.set(1_000);
        pass(&mut kernel);
        pass(&mut kernel);
        assert!(kernel.thread(tid).is_none());
        assert!(kernel.process(pid).is_none());
    }

    #[test]
    fn priority_aging_rewards_yielders_and_penalizes_spinners() {
        let (mut kernel, _clock) = kernel_with_clock();

        // A: issues a syscall every burst.
        let mut a = ScriptUnit::new();
        for _ in 0..6 {
            a = a.then_syscall(|| Syscall::GetPid);
        }
        // B: never yields; every burst ends preempted.
        let b = ScriptUnit::new().then(|_, _| StepOutcome::Preempted);

        let pid = kernel.create_process(ProcessSpec::new("aging"), Box::new(a));
        let tid_a = kernel.process(pid).expect("process").main_thread;
        let tid_b = kernel
            .create_thread(pid, Box::new(b), Vec::new())
            .expect("thread b");

        for _ in 0..6 {
            pass(&mut kernel);
        }

        assert_eq!(kernel.thread(tid_a).expect("a").priority(), 0);
        assert_eq!(kernel.thread(tid_b).expect("b").priority(), 4);
    }

    #[test]
    fn preempted_thread_defers_to_next_pass() {
        let (mut kernel, _clock) = kernel_with_clock();

        // One spinner, one one-shot syscall thread at the same priority.
        let spinner = ScriptUnit::new().then(|_, _| StepOutcome::Preempted);
        let pid = kernel.create_process(ProcessSpec::new("fairness"), Box::new(spinner));
        let friend = ScriptUnit::new().then_syscall(|| Syscall::GetPid);
        let tid_friend = kernel
            .create_thread(pid, Box::new(friend), Vec::new())
            .expect("thread");

        // Single pass: both run exactly once; the spinner's re-queue does
        // not run again within the pass.
        pass(&mut kernel);
        // The friend got its syscall resolved: it is Ready again with the
        // success tuple, not starved.
        assert_eq!(
            kernel.thread(tid_friend).expect("friend").state,
            ThreadState::Ready
        );
    }

    #[test]
    fn event_wait_timeout_resumes_with_null() {
        let (mut kernel, clock) = kernel_with_clock();
        let unit = ScriptUnit::new()
            .then_syscall(|| Syscall::PullEvent {
                filter: vec![crate::event::EventKind::Char],
                timeout_millis: 500,
            })
            .then(|args, _| {
                assert_eq!(args[0], SysValue::Bool(true));
                assert_eq!(args[1], SysValue::Null);
                StepOutcome::Finished
            });
        let pid = kernel.create_process(ProcessSpec::new("waiter"), Box::new(unit));
        let tid = kernel.process(pid).expect("process").main_thread;

        pass(&mut kernel);
        assert_eq!(
            kernel.thread(tid).expect("thread").state,
            ThreadState::Waiting
        );

        clock.set(500);
        pass(&mut kernel);
        pass(&mut kernel);
        // The closure above asserted the null event; the thread is gone.
        assert!(kernel.thread(tid).is_none());
    }

    #[test]
    fn kill_process_threads_removes_from_both_collections() {
        let (mut kernel, _clock) = kernel_with_clock();

        let sleeper = ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: 60_000 });
        let pid = kernel.create_process(ProcessSpec::new("victim"), Box::new(sleeper));
        let spinner = ScriptUnit::new().then(|_, _| StepOutcome::Preempted);
        kernel
            .create_thread(pid, Box::new(spinner), Vec::new())
            .expect("thread");

        // One pass: the sleeper parks, the spinner re-queues.
        pass(&mut kernel);
        assert!(kernel.ready.has_work());
        assert!(!kernel.waiting.is_empty());

        kernel.kill_process_threads(pid);
        assert!(!kernel.ready.has_work());
        assert!(kernel.waiting.is_empty());
        assert!(kernel.process(pid).expect("process").threads.is_empty());

        // Nothing left to schedule.
        pass(&mut kernel);
        assert!(!kernel.ready.has_work());
    }

    #[test]
    fn main_thread_error_escalates_to_process_exit() {
        let (mut kernel, _clock) = kernel_with_clock();
        let parent_unit = ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: 60_000 });
        let parent = kernel.create_process(ProcessSpec::new("parent"), Box::new(parent_unit));

        let faulty = ScriptUnit::new().then(|_, _| StepOutcome::Errored("stack overflow".into()));
        let child = kernel.create_process(
            ProcessSpec::new("faulty").with_parent(parent),
            Box::new(faulty),
        );

        pass(&mut kernel);
        let process = kernel.process(child).expect("zombie stays for parent");
        assert_eq!(process.state, ProcessState::Zombie);
        assert_eq!(process.exit_code, 1);
        assert_eq!(process.exit_reason.as_deref(), Some("stack overflow"));
    }

    #[test]
    fn scheduler_arms_timer_for_earliest_deadline() {
        let (mut kernel, _clock) = kernel_with_clock();
        let far = ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: 5_000 });
        let near = ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: 1_000 });
        let pid = kernel.create_process(ProcessSpec::new("timers"), Box::new(far));
        kernel
            .create_thread(pid, Box::new(near), Vec::new())
            .expect("thread");

        pass(&mut kernel);
        assert!(kernel.next_sleep_timer.is_some());
    }
}
