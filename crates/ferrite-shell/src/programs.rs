//! Built-in guest programs.
//!
//! Programs live on the ROM image as `builtin:<name>` stubs; the
//! [`BuiltinLoader`] resolves a stub (after the kernel has honored the
//! execute bit and read the file) to the matching execution unit.  `init`
//! and `sh` are hand-written state machines driven by the scheduler one
//! burst at a time; the small utilities are linear scripts.

use std::collections::BTreeMap;

use anyhow::Context;
use serde_json::json;
use tracing::info;

use ferrite_kernel::{
    BurstBudget, EventKind, ExecUnit, HandleId, Kernel, KernelError, Pid, ProcessLaunch,
    ProcessSpec, ProgramLoader, STDIN, STDOUT, ScriptUnit, StepOutcome, Syscall, SysValue,
};
use ferrite_vfs::{Credentials, FsDriver, MemFsDriver, MetadataPatch, OpenMode};

/// How often the shell re-checks its cooked input buffer, milliseconds.
const SHELL_POLL_MS: i64 = 200;

type Factory = fn() -> Box<dyn ExecUnit>;

/// Resolves `builtin:<name>` program stubs to execution units.
pub struct BuiltinLoader {
    factories: BTreeMap<&'static str, Factory>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        let mut factories: BTreeMap<&'static str, Factory> = BTreeMap::new();
        factories.insert("init", || Box::new(InitProgram::new()));
        factories.insert("sh", || Box::new(ShellProgram::new()));
        factories.insert("echo", echo_unit);
        factories.insert("uptime", uptime_unit);
        Self { factories }
    }
}

impl Default for BuiltinLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramLoader for BuiltinLoader {
    fn load(&self, path: &str, source: &str) -> ferrite_kernel::Result<Box<dyn ExecUnit>> {
        let name = source
            .trim()
            .strip_prefix("builtin:")
            .ok_or_else(|| KernelError::ProgramNotFound {
                path: path.to_string(),
            })?;
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| KernelError::ProgramNotFound {
                path: path.to_string(),
            })
    }
}

/// Seed the ROM image with the program table and a message of the day.
pub fn seed_rom(rom: &MemFsDriver) {
    for name in ["init", "sh", "echo", "uptime"] {
        let path = format!("/bin/{name}");
        rom.seed_file(&path, &format!("builtin:{name}"));
        rom.set_metadata(&path, &MetadataPatch::mode(0o755))
            .expect("rom program metadata");
    }
    rom.seed_file("/motd", "Welcome to FerriteOS.\n");
}

/// Load and spawn the boot program.
pub fn boot(kernel: &mut Kernel, loader: &BuiltinLoader, path: &str) -> anyhow::Result<Pid> {
    let creds = Credentials::root();
    let mut stream = kernel
        .vfs()
        .open(path, OpenMode::Execute, &creds)
        .with_context(|| format!("opening boot program {path}"))?;
    let source = stream.read_all()?.unwrap_or_default();
    let _ = stream.close();
    let unit = loader
        .load(path, &source)
        .with_context(|| format!("loading boot program {path}"))?;
    let pid = kernel.create_process(ProcessSpec::new("init"), unit);
    info!(pid, path, "boot program spawned");
    Ok(pid)
}

fn truthy(args: &[SysValue]) -> bool {
    args.first().and_then(SysValue::as_bool).unwrap_or(false)
}

fn failure_message(args: &[SysValue]) -> String {
    args.get(1)
        .and_then(SysValue::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

enum InitState {
    Banner,
    SpawnShell,
    AwaitShell,
    ShellExited,
}

/// Boot program: prints the banner, keeps a shell running.
struct InitProgram {
    state: InitState,
}

impl InitProgram {
    fn new() -> Self {
        Self {
            state: InitState::Banner,
        }
    }
}

impl ExecUnit for InitProgram {
    fn resume(&mut self, args: &[SysValue], _budget: &BurstBudget) -> StepOutcome {
        match self.state {
            InitState::Banner => {
                self.state = InitState::SpawnShell;
                StepOutcome::Syscall(Syscall::Print {
                    text: "FerriteOS booting".to_string(),
                })
            }
            InitState::SpawnShell => {
                self.state = InitState::AwaitShell;
                StepOutcome::Syscall(Syscall::CreateProcess(ProcessLaunch::new(
                    "/rom/bin/sh",
                    "sh",
                )))
            }
            InitState::AwaitShell => {
                if !truthy(args) {
                    return StepOutcome::Errored(format!(
                        "init: failed to spawn shell: {}",
                        failure_message(args)
                    ));
                }
                let shell = args[1].as_u64().unwrap_or_default();
                self.state = InitState::ShellExited;
                StepOutcome::Syscall(Syscall::WaitForChildExit {
                    target: ferrite_kernel::WaitTarget::Pid(shell),
                })
            }
            InitState::ShellExited => {
                self.state = InitState::SpawnShell;
                StepOutcome::Syscall(Syscall::Print {
                    text: "init: shell exited, restarting".to_string(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// sh
// ---------------------------------------------------------------------------

enum Report {
    Silent,
    Pwd,
    Ls,
    Ps,
    Time,
    CatOpen,
    CatRead { handle: HandleId },
    CatClose { content: String },
    Spawned,
    ChildDone,
}

enum ShellState {
    Boot,
    Prompt,
    Read,
    Dispatch,
    Report(Report),
}

/// Interactive line shell: one burst per syscall, cooked-mode input polled
/// through the stdin line buffer.
struct ShellProgram {
    state: ShellState,
}

impl ShellProgram {
    fn new() -> Self {
        Self {
            state: ShellState::Boot,
        }
    }

    fn prompt(&mut self) -> StepOutcome {
        self.state = ShellState::Read;
        StepOutcome::Syscall(Syscall::HandleWrite {
            handle: STDOUT,
            text: "$ ".to_string(),
        })
    }

    fn print_then_prompt(&mut self, text: String) -> StepOutcome {
        self.state = ShellState::Report(Report::Silent);
        StepOutcome::Syscall(Syscall::Print { text })
    }

    fn command(&mut self, line: &str) -> StepOutcome {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return self.prompt();
        };
        let rest: Vec<&str> = words.collect();

        match command {
            "exit" => StepOutcome::Syscall(Syscall::Exit {
                code: 0,
                reason: None,
            }),
            "help" => self.print_then_prompt(
                "commands: cat cd echo exit help ls ps pwd time, or a program path".to_string(),
            ),
            "echo" => self.print_then_prompt(rest.join(" ")),
            "pwd" => {
                self.state = ShellState::Report(Report::Pwd);
                StepOutcome::Syscall(Syscall::GetCwd)
            }
            "cd" => {
                self.state = ShellState::Report(Report::Silent);
                StepOutcome::Syscall(Syscall::SetCwd {
                    path: rest.first().unwrap_or(&"/").to_string(),
                })
            }
            "ls" => {
                self.state = ShellState::Report(Report::Ls);
                StepOutcome::Syscall(Syscall::FsList {
                    path: rest.first().unwrap_or(&".").to_string(),
                })
            }
            "ps" => {
                self.state = ShellState::Report(Report::Ps);
                StepOutcome::Syscall(Syscall::GetProcessList)
            }
            "time" => {
                self.state = ShellState::Report(Report::Time);
                StepOutcome::Syscall(Syscall::Epoch {
                    locale: "utc".to_string(),
                })
            }
            "cat" => match rest.first() {
                Some(path) => {
                    self.state = ShellState::Report(Report::CatOpen);
                    StepOutcome::Syscall(Syscall::FsOpen {
                        path: path.to_string(),
                        mode: "r".to_string(),
                    })
                }
                None => self.print_then_prompt("usage: cat <file>".to_string()),
            },
            program => {
                self.state = ShellState::Report(Report::Spawned);
                let mut launch = ProcessLaunch::new(program, program);
                launch.args = rest.iter().map(|a| json!(a)).collect();
                StepOutcome::Syscall(Syscall::CreateProcess(launch))
            }
        }
    }

    fn report(&mut self, report: Report, args: &[SysValue]) -> StepOutcome {
        if !truthy(args) {
            return self.print_then_prompt(format!("error: {}", failure_message(args)));
        }
        match report {
            Report::Silent => self.prompt(),
            Report::Pwd => {
                let cwd = args
                    .get(1)
                    .and_then(SysValue::as_str)
                    .unwrap_or("/")
                    .to_string();
                self.print_then_prompt(cwd)
            }
            Report::Ls => {
                let names: Vec<String> = args
                    .get(1)
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                self.print_then_prompt(names.join("  "))
            }
            Report::Ps => {
                let pids: Vec<String> = args
                    .get(1)
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|v| v.as_u64().map(|p| p.to_string()))
                    .collect();
                self.print_then_prompt(pids.join(" "))
            }
            Report::Time => {
                let millis = args.get(1).and_then(SysValue::as_i64).unwrap_or_default();
                self.print_then_prompt(format!("epoch: {millis} ms"))
            }
            Report::CatOpen => {
                let handle = args.get(1).and_then(SysValue::as_u64).unwrap_or_default() as HandleId;
                self.state = ShellState::Report(Report::CatRead { handle });
                StepOutcome::Syscall(Syscall::HandleReadAll { handle })
            }
            Report::CatRead { handle } => {
                let content = args
                    .get(1)
                    .and_then(SysValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.state = ShellState::Report(Report::CatClose { content });
                StepOutcome::Syscall(Syscall::HandleClose { handle })
            }
            Report::CatClose { content } => self.print_then_prompt(content),
            Report::Spawned => {
                let child = args.get(1).and_then(SysValue::as_u64).unwrap_or_default();
                self.state = ShellState::Report(Report::ChildDone);
                StepOutcome::Syscall(Syscall::WaitForChildExit {
                    target: ferrite_kernel::WaitTarget::Pid(child),
                })
            }
            Report::ChildDone => {
                let code = args.get(2).and_then(SysValue::as_i64).unwrap_or_default();
                if code == 0 {
                    self.prompt()
                } else {
                    let reason = args
                        .get(3)
                        .and_then(SysValue::as_str)
                        .unwrap_or_default()
                        .to_string();
                    self.print_then_prompt(format!("[exit {code}] {reason}"))
                }
            }
        }
    }
}

impl ExecUnit for ShellProgram {
    fn resume(&mut self, args: &[SysValue], _budget: &BurstBudget) -> StepOutcome {
        match std::mem::replace(&mut self.state, ShellState::Boot) {
            ShellState::Boot => {
                self.state = ShellState::Prompt;
                StepOutcome::Syscall(Syscall::SetForegroundProcess)
            }
            ShellState::Prompt => self.prompt(),
            ShellState::Read => {
                self.state = ShellState::Dispatch;
                StepOutcome::Syscall(Syscall::HandleReadLine { handle: STDIN })
            }
            ShellState::Dispatch => {
                if !truthy(args) {
                    return self.print_then_prompt(format!(
                        "error: {}",
                        failure_message(args)
                    ));
                }
                match args.get(1).and_then(SysValue::as_str) {
                    // No complete line yet: poll again shortly.
                    None => {
                        self.state = ShellState::Read;
                        StepOutcome::Syscall(Syscall::PullEvent {
                            filter: vec![EventKind::Timer],
                            timeout_millis: SHELL_POLL_MS,
                        })
                    }
                    Some(line) => {
                        let line = line.to_string();
                        self.command(&line)
                    }
                }
            }
            ShellState::Report(report) => self.report(report, args),
        }
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// Print the program arguments and exit.
fn echo_unit() -> Box<dyn ExecUnit> {
    Box::new(
        ScriptUnit::new()
            .then(|args, _| {
                let text: Vec<String> = args
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                StepOutcome::Syscall(Syscall::Print {
                    text: text.join(" "),
                })
            })
            .then(|_, _| StepOutcome::Finished),
    )
}

/// Print the current UTC epoch and this process's time accounting.
fn uptime_unit() -> Box<dyn ExecUnit> {
    Box::new(
        ScriptUnit::new()
            .then_syscall(|| Syscall::Epoch {
                locale: "utc".to_string(),
            })
            .then(|args, _| {
                let millis = args.get(1).and_then(SysValue::as_i64).unwrap_or_default();
                StepOutcome::Syscall(Syscall::Print {
                    text: format!("epoch: {millis} ms"),
                })
            })
            .then_syscall(|| Syscall::GetProcessTime)
            .then(|args, _| {
                let cpu = args.get(1).and_then(SysValue::as_i64).unwrap_or_default();
                let sys = args.get(2).and_then(SysValue::as_i64).unwrap_or_default();
                StepOutcome::Syscall(Syscall::Print {
                    text: format!("cpu: {cpu} ms, sys: {sys} ms"),
                })
            })
            .then(|_, _| StepOutcome::Finished),
    )
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use super::*;
    use ferrite_kernel::{
        BufferConsole, Clock, ManualClock, ProcessState, RawEvent, ThreadState,
    };
    use ferrite_vfs::VfsManager;

    struct Harness {
        kernel: Kernel,
        init_pid: Pid,
        clock: Arc<ManualClock>,
        console: Rc<RefCell<BufferConsole>>,
    }

    fn boot_kernel() -> Harness {
        let mut vfs = VfsManager::new();
        let rom = MemFsDriver::new(1 << 20);
        seed_rom(&rom);
        rom.freeze();
        vfs.mount("/", Box::new(MemFsDriver::new(1 << 20)));
        vfs.mount("/rom", Box::new(rom));

        let clock = Arc::new(ManualClock::new(0));
        let console = BufferConsole::shared();
        let mut kernel = Kernel::new(
            vfs,
            Box::new(BuiltinLoader::new()),
            console.clone(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let loader = BuiltinLoader::new();
        let init_pid = boot(&mut kernel, &loader, "/rom/bin/init").expect("boot");
        Harness {
            kernel,
            init_pid,
            clock,
            console,
        }
    }

    fn pass(kernel: &mut Kernel) {
        kernel.step(RawEvent::SchedulerYield);
    }

    #[test]
    fn loader_rejects_non_builtin_sources() {
        let loader = BuiltinLoader::new();
        assert!(loader.load("/x", "#!/bin/sh").is_err());
        assert!(loader.load("/x", "builtin:missing").is_err());
        assert!(loader.load("/x", "builtin:echo").is_ok());
    }

    #[test]
    fn init_spawns_the_shell_and_waits() {
        let mut h = boot_kernel();

        // Banner, spawn, wait: three bursts for init, plus the shell's own
        // early bursts interleaved.
        for _ in 0..6 {
            pass(&mut h.kernel);
        }

        let init = h.kernel.process(h.init_pid).expect("init alive");
        assert_eq!(init.state, ProcessState::Alive);
        let init_main = init.main_thread;
        assert_eq!(
            h.kernel.thread(init_main).expect("init thread").state,
            ThreadState::Waiting,
            "init is parked waiting on the shell"
        );

        // The shell took the foreground.
        let shell_pid = h.kernel.focused_process().expect("shell focused");
        assert_ne!(shell_pid, h.init_pid);
        assert_eq!(h.kernel.process(shell_pid).expect("shell").name, "sh");
        assert!(
            h.console
                .borrow()
                .lines()
                .iter()
                .any(|l| l.contains("FerriteOS booting"))
        );
    }

    #[test]
    fn shell_runs_a_typed_command() {
        let mut h = boot_kernel();
        for _ in 0..6 {
            pass(&mut h.kernel);
        }
        let shell_pid = h.kernel.focused_process().expect("shell focused");

        // Type `echo hello` at the cooked prompt.
        for ch in "echo hello".chars() {
            h.kernel.step(RawEvent::Char { ch });
        }
        h.kernel.step(RawEvent::Key {
            code: ferrite_kernel::event::keys::ENTER,
            held: false,
        });

        // The shell is parked on its input poll; let the timeout fire,
        // then give it bursts to read, execute and print.
        h.clock.advance(SHELL_POLL_MS + 50);
        for _ in 0..6 {
            pass(&mut h.kernel);
        }

        assert_eq!(
            h.kernel.process(shell_pid).expect("shell").state,
            ProcessState::Alive
        );
        assert!(
            h.console
                .borrow()
                .lines()
                .iter()
                .any(|l| l == "hello"),
            "echo output reached the console: {:?}",
            h.console.borrow().lines()
        );
    }
}
