//! Resumable execution units.
//!
//! A guest "program" is an [`ExecUnit`]: an opaque state machine the
//! scheduler drives forward one burst at a time.  Each resume receives the
//! pending resume arguments (the result tuple of the previous syscall, an
//! awaited event, or the initial program arguments) and returns how the
//! burst ended: a syscall request, a voluntary preemption acknowledgment,
//! normal completion, or an unrecoverable error.
//!
//! Units are expected to check [`BurstBudget::exceeded`] at bounded
//! intervals (see [`CHECKPOINT_STEPS`]) so that tight loops remain
//! preemptible; the kernel cannot interrupt a burst that never checks.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::Result;
use crate::syscall::Syscall;

/// Dynamic value crossing the syscall boundary.
///
/// Success tuples are `[true, ...results]`, failures `[false, message]`.
pub type SysValue = serde_json::Value;

/// Default burst quantum in milliseconds.
pub const BASE_QUANTUM_MS: i64 = 30;

/// Advisory checkpoint interval: a well-behaved unit re-checks its budget
/// at least every this many logical steps.  Host-specific tunable, not a
/// hard requirement.
pub const CHECKPOINT_STEPS: u32 = 15_000;

/// Build a success resume tuple.
pub fn ok_args<I>(values: I) -> Vec<SysValue>
where
    I: IntoIterator<Item = SysValue>,
{
    let mut args = vec![SysValue::Bool(true)];
    args.extend(values);
    args
}

/// Build a failure resume tuple.
pub fn err_args(message: impl Into<String>) -> Vec<SysValue> {
    vec![SysValue::Bool(false), SysValue::String(message.into())]
}

/// How a burst ended.
pub enum StepOutcome {
    /// The unit suspended voluntarily with a kernel request.
    Syscall(Syscall),
    /// The unit observed its budget expiring and suspended.
    Preempted,
    /// The unit ran to completion.
    Finished,
    /// The unit raised an unrecoverable error.
    Errored(String),
}

/// Wall-clock execution budget for one burst.
pub struct BurstBudget {
    clock: Arc<dyn Clock>,
    deadline: i64,
}

impl BurstBudget {
    pub fn new(clock: Arc<dyn Clock>, deadline: i64) -> Self {
        Self { clock, deadline }
    }

    /// True once the burst deadline has passed.
    pub fn exceeded(&self) -> bool {
        self.clock.now_millis() > self.deadline
    }
}

/// A suspendable guest program.
pub trait ExecUnit {
    /// Drive the unit forward by one burst.
    fn resume(&mut self, args: &[SysValue], budget: &BurstBudget) -> StepOutcome;
}

/// Binds guest code into an executable unit.
///
/// The `CreateProcess` syscall resolves a path through the VFS (honoring the
/// execute bit), reads the source, and hands both to the loader.  The shell
/// registers its built-in programs here; tests plug in closures.
pub trait ProgramLoader {
    fn load(&self, path: &str, source: &str) -> Result<Box<dyn ExecUnit>>;
}

/// A loader that knows no programs.  Useful for kernels whose processes are
/// all spawned directly.
pub struct NullLoader;

impl ProgramLoader for NullLoader {
    fn load(&self, path: &str, _source: &str) -> Result<Box<dyn ExecUnit>> {
        Err(crate::error::KernelError::ProgramNotFound {
            path: path.to_string(),
        })
    }
}

type Step = Box<dyn FnMut(&[SysValue], &BurstBudget) -> StepOutcome>;

/// A linear script of burst steps.
///
/// Each resume runs the next step; a step that returns
/// [`StepOutcome::Preempted`] is retried on the following resume (it was
/// interrupted, not completed).  When the script is exhausted the unit
/// reports [`StepOutcome::Finished`].  Used by built-in programs and
/// throughout the scheduler tests.
#[derive(Default)]
pub struct ScriptUnit {
    steps: VecDeque<Step>,
}

impl ScriptUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a burst step.
    pub fn then<F>(mut self, step: F) -> Self
    where
        F: FnMut(&[SysValue], &BurstBudget) -> StepOutcome + 'static,
    {
        self.steps.push_back(Box::new(step));
        self
    }

    /// Append a step that issues a syscall, ignoring its resume arguments.
    pub fn then_syscall<F>(self, mut make: F) -> Self
    where
        F: FnMut() -> Syscall + 'static,
    {
        self.then(move |_, _| StepOutcome::Syscall(make()))
    }
}

impl ExecUnit for ScriptUnit {
    fn resume(&mut self, args: &[SysValue], budget: &BurstBudget) -> StepOutcome {
        let Some(step) = self.steps.front_mut() else {
            return StepOutcome::Finished;
        };
        let outcome = step(args, budget);
        match outcome {
            StepOutcome::Preempted => outcome,
            other => {
                self.steps.pop_front();
                other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn budget_at(now: i64, deadline: i64) -> BurstBudget {
        BurstBudget::new(Arc::new(ManualClock::new(now)), deadline)
    }

    #[test]
    fn budget_expires_after_deadline() {
        let clock = Arc::new(ManualClock::new(0));
        let budget = BurstBudget::new(Arc::clone(&clock) as Arc<dyn Clock>, 30);
        assert!(!budget.exceeded());
        clock.advance(31);
        assert!(budget.exceeded());
    }

    #[test]
    fn script_unit_runs_steps_in_order_and_finishes() {
        let mut unit = ScriptUnit::new()
            .then(|_, _| StepOutcome::Syscall(Syscall::GetPid))
            .then(|args, _| {
                assert_eq!(args[0], SysValue::Bool(true));
                StepOutcome::Finished
            });

        let budget = budget_at(0, 30);
        assert!(matches!(
            unit.resume(&[], &budget),
            StepOutcome::Syscall(Syscall::GetPid)
        ));
        assert!(matches!(
            unit.resume(&ok_args([]), &budget),
            StepOutcome::Finished
        ));
        // Exhausted scripts stay finished.
        assert!(matches!(unit.resume(&[], &budget), StepOutcome::Finished));
    }

    #[test]
    fn preempted_step_is_retried() {
        let mut unit = ScriptUnit::new()
            .then(|_, _| StepOutcome::Preempted)
            .then(|_, _| StepOutcome::Finished);

        let budget = budget_at(0, 30);
        assert!(matches!(unit.resume(&[], &budget), StepOutcome::Preempted));
        // Same step again: still preempted before the script can advance.
        assert!(matches!(unit.resume(&[], &budget), StepOutcome::Preempted));
    }

    #[test]
    fn tuple_helpers_shape_resume_args() {
        assert_eq!(ok_args([SysValue::from(7)]), vec![SysValue::Bool(true), SysValue::from(7)]);
        let err = err_args("boom");
        assert_eq!(err[0], SysValue::Bool(false));
        assert_eq!(err[1], SysValue::String("boom".into()));
    }
}
