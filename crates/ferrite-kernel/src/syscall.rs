//! Syscall dispatch.
//!
//! Every syscall reads its process-scoped context from the calling thread,
//! performs its side effect against the process manager, the handle table
//! or the VFS, and resolves the thread in exactly one way: a success tuple,
//! a failure tuple, or a wait registration for the calls that legitimately
//! block (sleep, event pull, process wait, thread join).  Syscall-level
//! errors never terminate the kernel.
//!
//! Wall-clock time spent in here is accumulated into the owning process's
//! system time, separate from the CPU time of the thread's own logic.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::trace;

use ferrite_vfs::{Credentials, MetadataPatch, OpenMode, perms};

use crate::error::KernelError;
use crate::event::EventKind;
use crate::exec::{ExecUnit, SysValue, err_args, ok_args};
use crate::handle::{FileHandle, Handle, HandleId, ReadHandle, WriteHandle};
use crate::kernel::Kernel;
use crate::process::Pid;
use crate::process_manager::ProcessSpec;
use crate::thread::{Tid, WaitTarget};

/// Parameters of the process-spawning syscall.
pub struct ProcessLaunch {
    /// Program path, resolved against the caller's working directory.
    pub path: String,
    pub name: String,
    pub args: Vec<SysValue>,
    pub env: BTreeMap<String, String>,
    /// Working directory for the child; the caller's if absent.
    pub cwd: Option<String>,
    pub handle_overrides: BTreeMap<HandleId, HandleId>,
}

impl ProcessLaunch {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            handle_overrides: BTreeMap::new(),
        }
    }
}

/// The closed set of kernel calls.
pub enum Syscall {
    // Default syscalls
    Print { text: String },
    Sleep { millis: i64 },
    PullEvent { filter: Vec<EventKind>, timeout_millis: i64 },
    Epoch { locale: String },

    // Process and identity
    GetPid,
    GetUid,
    GetGid,
    GetGroups,
    SetUid { uid: u32 },
    SetGid { gid: u32 },
    SetGroups { groups: Vec<u32> },
    GetCwd,
    SetCwd { path: String },
    GetProcessTime,
    SetForegroundProcess,
    SetRawInputMode { enabled: bool },
    Exit { code: i32, reason: Option<String> },
    WaitForChildExit { target: WaitTarget },
    CreateProcess(ProcessLaunch),
    CreateThread { unit: Box<dyn ExecUnit>, args: Vec<SysValue> },
    JoinThread { tid: Tid },
    GetProcessList,
    GetProcessDetails { pid: Pid },

    // Filesystem
    FsExists { path: String },
    FsOpen { path: String, mode: String },
    FsList { path: String },
    FsMakeDir { path: String },
    FsIsDir { path: String },
    FsDelete { path: String },
    FsMove { from: String, to: String },
    FsCopy { from: String, to: String },
    FsGetSize { path: String },
    FsGetCapacity { path: String },
    FsGetFreeSpace { path: String },
    FsGetMetadata { path: String },
    FsSetMetadata { path: String, patch: MetadataPatch },
    FsChmod { path: String, mode: u32 },
    FsChown { path: String, owner: Option<u32>, group: Option<u32> },

    // Handles
    HandleIsEmpty { handle: HandleId },
    HandleRead { handle: HandleId, count: usize },
    HandleReadLine { handle: HandleId },
    HandleReadAll { handle: HandleId },
    HandleWrite { handle: HandleId, text: String },
    HandleWriteLine { handle: HandleId, text: String },
    HandleFlush { handle: HandleId },
    HandleClose { handle: HandleId },
}

impl Syscall {
    /// Stable identifier used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::Print { .. } => "print",
            Syscall::Sleep { .. } => "os.sleep",
            Syscall::PullEvent { .. } => "os.pullEvent",
            Syscall::Epoch { .. } => "os.epoch",
            Syscall::GetPid => "os.getPid",
            Syscall::GetUid => "os.getUid",
            Syscall::GetGid => "os.getGid",
            Syscall::GetGroups => "os.getGroups",
            Syscall::SetUid { .. } => "os.setUid",
            Syscall::SetGid { .. } => "os.setGid",
            Syscall::SetGroups { .. } => "os.setGroups",
            Syscall::GetCwd => "os.getWorkingDirectory",
            Syscall::SetCwd { .. } => "os.setWorkingDirectory",
            Syscall::GetProcessTime => "os.getProcessTime",
            Syscall::SetForegroundProcess => "os.setForegroundProcess",
            Syscall::SetRawInputMode { .. } => "os.setRawInputMode",
            Syscall::Exit { .. } => "os.exit",
            Syscall::WaitForChildExit { .. } => "os.waitForChildExit",
            Syscall::CreateProcess(_) => "os.createProcess",
            Syscall::CreateThread { .. } => "os.createThread",
            Syscall::JoinThread { .. } => "os.joinThread",
            Syscall::GetProcessList => "os.getProcessList",
            Syscall::GetProcessDetails { .. } => "os.getProcessDetails",
            Syscall::FsExists { .. } => "fs.exists",
            Syscall::FsOpen { .. } => "fs.open",
            Syscall::FsList { .. } => "fs.list",
            Syscall::FsMakeDir { .. } => "fs.makeDir",
            Syscall::FsIsDir { .. } => "fs.isDir",
            Syscall::FsDelete { .. } => "fs.delete",
            Syscall::FsMove { .. } => "fs.move",
            Syscall::FsCopy { .. } => "fs.copy",
            Syscall::FsGetSize { .. } => "fs.getSize",
            Syscall::FsGetCapacity { .. } => "fs.getCapacity",
            Syscall::FsGetFreeSpace { .. } => "fs.getFreeSpace",
            Syscall::FsGetMetadata { .. } => "fs.getMetadata",
            Syscall::FsSetMetadata { .. } => "fs.setMetadata",
            Syscall::FsChmod { .. } => "fs.chmod",
            Syscall::FsChown { .. } => "fs.chown",
            Syscall::HandleIsEmpty { .. } => "handle.isEmpty",
            Syscall::HandleRead { .. } => "handle.read",
            Syscall::HandleReadLine { .. } => "handle.readLine",
            Syscall::HandleReadAll { .. } => "handle.readAll",
            Syscall::HandleWrite { .. } => "handle.write",
            Syscall::HandleWriteLine { .. } => "handle.writeLine",
            Syscall::HandleFlush { .. } => "handle.flush",
            Syscall::HandleClose { .. } => "handle.close",
        }
    }
}

/// How a syscall resolved.
enum SysReply {
    Success(Vec<SysValue>),
    Failure(String),
    /// The thread was parked (or terminated); nothing to deliver now.
    Parked,
}

impl Kernel {
    /// Execute one syscall on behalf of `tid`.
    pub(crate) fn execute_syscall(&mut self, tid: Tid, call: Syscall) {
        let started = self.clock.now_millis();
        let Some(pid) = self.threads.get(&tid).map(|t| t.pid) else {
            return;
        };
        let name = call.name();

        let reply = self.dispatch(tid, pid, call);
        match reply {
            SysReply::Success(values) => self.ready_thread(tid, ok_args(values)),
            SysReply::Failure(message) => self.ready_thread(tid, err_args(message)),
            SysReply::Parked => {}
        }

        let elapsed = self.clock.now_millis() - started;
        if let Some(process) = self.processes.get_mut(&pid) {
            process.sys_time += elapsed;
        }
        trace!(tid, pid, syscall = name, "syscall resolved");
    }

    fn dispatch(&mut self, tid: Tid, pid: Pid, call: Syscall) -> SysReply {
        match call {
            // -- Default syscalls -------------------------------------------
            Syscall::Print { text } => {
                let lines = text.split('\n').count();
                self.console.borrow_mut().write_line(&text);
                SysReply::Success(vec![json!(lines)])
            }
            Syscall::Sleep { millis } => {
                let wake_at = self.clock.now_millis().saturating_add(millis.max(0));
                self.put_thread_to_sleep(tid, wake_at);
                SysReply::Parked
            }
            Syscall::PullEvent {
                filter,
                timeout_millis,
            } => {
                let now = self.clock.now_millis();
                let found = self
                    .processes
                    .get_mut(&pid)
                    .and_then(|p| p.next_event_for(tid, &filter, now));
                match found {
                    Some(event) => SysReply::Success(vec![
                        serde_json::to_value(&event).unwrap_or(SysValue::Null),
                    ]),
                    None => {
                        self.wait_for_event(tid, filter, timeout_millis);
                        SysReply::Parked
                    }
                }
            }
            Syscall::Epoch { locale } => match locale.as_str() {
                "utc" => SysReply::Success(vec![json!(self.clock.now_millis())]),
                "local" => {
                    let offset_ms =
                        chrono::Local::now().offset().local_minus_utc() as i64 * 1000;
                    SysReply::Success(vec![json!(self.clock.now_millis() + offset_ms)])
                }
                other => SysReply::Failure(
                    KernelError::InvalidArgument {
                        reason: format!("unknown epoch locale: {other}"),
                    }
                    .to_string(),
                ),
            },

            // -- Process and identity ---------------------------------------
            Syscall::GetPid => SysReply::Success(vec![json!(pid)]),
            Syscall::GetUid => SysReply::Success(vec![json!(self.creds(pid).uid)]),
            Syscall::GetGid => SysReply::Success(vec![json!(self.creds(pid).gid)]),
            Syscall::GetGroups => SysReply::Success(vec![json!(self.creds(pid).groups)]),
            Syscall::SetUid { uid } => self.set_identity(pid, move |c| c.uid = uid),
            Syscall::SetGid { gid } => self.set_identity(pid, move |c| c.gid = gid),
            Syscall::SetGroups { groups } => {
                self.set_identity(pid, move |c| c.groups = groups)
            }
            Syscall::GetCwd => {
                let cwd = self
                    .processes
                    .get(&pid)
                    .map(|p| p.working_dir.clone())
                    .unwrap_or_default();
                SysReply::Success(vec![json!(cwd)])
            }
            Syscall::SetCwd { path } => {
                let resolved = self.resolve_path(pid, &path);
                let creds = self.creds(pid);
                if !self.vfs.exists(&resolved, &creds) {
                    return SysReply::Failure("directory does not exist".into());
                }
                if !self.vfs.can_access_dir(&resolved, &creds) {
                    return SysReply::Failure("no permission".into());
                }
                match self.processes.get_mut(&pid) {
                    Some(process) => {
                        process.working_dir = resolved;
                        SysReply::Success(Vec::new())
                    }
                    None => SysReply::Failure(no_process(pid)),
                }
            }
            Syscall::GetProcessTime => {
                let (cpu, sys) = self
                    .processes
                    .get(&pid)
                    .map(|p| (p.cpu_time, p.sys_time))
                    .unwrap_or((0, 0));
                SysReply::Success(vec![json!(cpu), json!(sys)])
            }
            Syscall::SetForegroundProcess => {
                self.set_focused_process(Some(pid));
                SysReply::Success(Vec::new())
            }
            Syscall::SetRawInputMode { enabled } => match self.processes.get_mut(&pid) {
                Some(process) => {
                    process.raw_input_mode = enabled;
                    SysReply::Success(Vec::new())
                }
                None => SysReply::Failure(no_process(pid)),
            },
            Syscall::Exit { code, reason } => {
                self.exit_process(pid, code, reason);
                SysReply::Parked
            }
            Syscall::WaitForChildExit { target } => {
                self.wait_for_process_exit(target, tid);
                SysReply::Parked
            }
            Syscall::CreateProcess(launch) => self.spawn_from_path(pid, launch),
            Syscall::CreateThread { unit, args } => match self.create_thread(pid, unit, args) {
                Ok(new_tid) => SysReply::Success(vec![json!(new_tid)]),
                Err(e) => SysReply::Failure(e.to_string()),
            },
            Syscall::JoinThread { tid: target } => {
                self.join_thread(target, tid);
                SysReply::Parked
            }
            Syscall::GetProcessList => SysReply::Success(vec![json!(self.process_list())]),
            Syscall::GetProcessDetails { pid: target } => match self.process_details(target) {
                Some(details) => SysReply::Success(vec![
                    serde_json::to_value(&details).unwrap_or(SysValue::Null),
                ]),
                None => SysReply::Failure(no_process(target)),
            },

            // -- Filesystem -------------------------------------------------
            Syscall::FsExists { path } => {
                let resolved = self.resolve_path(pid, &path);
                let exists = self.vfs.exists(&resolved, &self.creds(pid));
                SysReply::Success(vec![json!(exists)])
            }
            Syscall::FsOpen { path, mode } => {
                let Some(mode) = OpenMode::parse(&mode) else {
                    return SysReply::Failure(
                        KernelError::InvalidArgument {
                            reason: format!("unsupported fs.open mode: {mode}"),
                        }
                        .to_string(),
                    );
                };
                let resolved = self.resolve_path(pid, &path);
                match self.vfs.open(&resolved, mode, &self.creds(pid)) {
                    Ok(stream) => {
                        let handle = Handle::File(FileHandle::new(stream, mode));
                        match self.processes.get_mut(&pid) {
                            Some(process) => {
                                let id = process.add_handle(handle);
                                SysReply::Success(vec![json!(id)])
                            }
                            None => SysReply::Failure(no_process(pid)),
                        }
                    }
                    Err(e) => SysReply::Failure(e.to_string()),
                }
            }
            Syscall::FsList { path } => {
                let resolved = self.resolve_path(pid, &path);
                match self.vfs.list(&resolved, &self.creds(pid)) {
                    Ok(names) => SysReply::Success(vec![json!(names)]),
                    Err(e) => SysReply::Failure(e.to_string()),
                }
            }
            Syscall::FsMakeDir { path } => {
                let resolved = self.resolve_path(pid, &path);
                self.unit_fs_op(|k| k.vfs.mkdir(&resolved, &k.creds(pid)))
            }
            Syscall::FsIsDir { path } => {
                let resolved = self.resolve_path(pid, &path);
                match self.vfs.metadata(&resolved, &self.creds(pid)) {
                    Ok(meta) => SysReply::Success(vec![json!(meta.is_directory)]),
                    Err(e) => SysReply::Failure(e.to_string()),
                }
            }
            Syscall::FsDelete { path } => {
                let resolved = self.resolve_path(pid, &path);
                self.unit_fs_op(|k| k.vfs.delete(&resolved, &k.creds(pid)))
            }
            Syscall::FsMove { from, to } => {
                let from = self.resolve_path(pid, &from);
                let to = self.resolve_path(pid, &to);
                self.unit_fs_op(|k| k.vfs.rename(&from, &to, &k.creds(pid)))
            }
            Syscall::FsCopy { from, to } => {
                let from = self.resolve_path(pid, &from);
                let to = self.resolve_path(pid, &to);
                self.unit_fs_op(|k| k.vfs.copy(&from, &to, &k.creds(pid)))
            }
            Syscall::FsGetSize { path } => {
                let resolved = self.resolve_path(pid, &path);
                match self.vfs.size(&resolved, &self.creds(pid)) {
                    Ok(size) => SysReply::Success(vec![json!(size)]),
                    Err(e) => SysReply::Failure(e.to_string()),
                }
            }
            Syscall::FsGetCapacity { path } => {
                let resolved = self.resolve_path(pid, &path);
                match self.vfs.capacity(&resolved, &self.creds(pid)) {
                    Ok(capacity) => SysReply::Success(vec![json!(capacity)]),
                    Err(e) => SysReply::Failure(e.to_string()),
                }
            }
            Syscall::FsGetFreeSpace { path } => {
                let resolved = self.resolve_path(pid, &path);
                match self.vfs.free_space(&resolved, &self.creds(pid)) {
                    Ok(free) => SysReply::Success(vec![json!(free)]),
                    Err(e) => SysReply::Failure(e.to_string()),
                }
            }
            Syscall::FsGetMetadata { path } => {
                let resolved = self.resolve_path(pid, &path);
                match self.vfs.metadata(&resolved, &self.creds(pid)) {
                    Ok(meta) => SysReply::Success(vec![
                        serde_json::to_value(&meta).unwrap_or(SysValue::Null),
                    ]),
                    Err(e) => SysReply::Failure(e.to_string()),
                }
            }
            Syscall::FsSetMetadata { path, patch } => {
                let resolved = self.resolve_path(pid, &path);
                self.unit_fs_op(|k| k.vfs.set_metadata(&resolved, &patch, &k.creds(pid)))
            }
            Syscall::FsChmod { path, mode } => {
                let resolved = self.resolve_path(pid, &path);
                self.unit_fs_op(|k| k.vfs.chmod(&resolved, mode, &k.creds(pid)))
            }
            Syscall::FsChown { path, owner, group } => {
                let resolved = self.resolve_path(pid, &path);
                self.unit_fs_op(|k| k.vfs.chown(&resolved, owner, group, &k.creds(pid)))
            }

            // -- Handles ----------------------------------------------------
            Syscall::HandleIsEmpty { handle } => {
                let Some(process) = self.processes.get_mut(&pid) else {
                    return SysReply::Failure(no_process(pid));
                };
                match process.handle_mut(handle).and_then(|h| h.as_read()) {
                    Some(reader) => SysReply::Success(vec![json!(reader.is_empty())]),
                    None => SysReply::Failure(bad_fd(handle)),
                }
            }
            Syscall::HandleRead { handle, count } => {
                self.read_op(pid, handle, |r| r.read(count))
            }
            Syscall::HandleReadLine { handle } => self.read_op(pid, handle, |r| r.read_line()),
            Syscall::HandleReadAll { handle } => self.read_op(pid, handle, |r| r.read_all()),
            Syscall::HandleWrite { handle, text } => {
                self.write_op(pid, handle, move |w| w.write(&text))
            }
            Syscall::HandleWriteLine { handle, text } => {
                self.write_op(pid, handle, move |w| w.write_line(&text))
            }
            Syscall::HandleFlush { handle } => self.write_op(pid, handle, |w| w.flush()),
            Syscall::HandleClose { handle } => {
                let Some(process) = self.processes.get_mut(&pid) else {
                    return SysReply::Failure(no_process(pid));
                };
                match process.remove_handle(handle) {
                    Some(mut removed) => match removed.close() {
                        Ok(()) => SysReply::Success(Vec::new()),
                        Err(e) => SysReply::Failure(e.to_string()),
                    },
                    None => SysReply::Failure(bad_fd(handle)),
                }
            }
        }
    }

    // -- Helpers ------------------------------------------------------------

    fn resolve_path(&self, pid: Pid, path: &str) -> String {
        let cwd = self
            .processes
            .get(&pid)
            .map(|p| p.working_dir.as_str())
            .unwrap_or("/");
        ferrite_vfs::path::join(cwd, path)
    }

    fn creds(&self, pid: Pid) -> Credentials {
        self.processes
            .get(&pid)
            .map(|p| p.credentials.clone())
            .unwrap_or_else(Credentials::root)
    }

    /// Identity changes are superuser-only.
    fn set_identity(&mut self, pid: Pid, apply: impl FnOnce(&mut Credentials)) -> SysReply {
        if !self.creds(pid).is_superuser() {
            return SysReply::Failure(KernelError::NotPermitted.to_string());
        }
        match self.processes.get_mut(&pid) {
            Some(process) => {
                apply(&mut process.credentials);
                SysReply::Success(Vec::new())
            }
            None => SysReply::Failure(no_process(pid)),
        }
    }

    /// A filesystem operation with no interesting result value.
    fn unit_fs_op(
        &mut self,
        op: impl FnOnce(&Self) -> ferrite_vfs::Result<()>,
    ) -> SysReply {
        match op(self) {
            Ok(()) => SysReply::Success(Vec::new()),
            Err(e) => SysReply::Failure(e.to_string()),
        }
    }

    fn read_op(
        &mut self,
        pid: Pid,
        handle: HandleId,
        op: impl FnOnce(&mut dyn ReadHandle) -> crate::error::Result<Option<String>>,
    ) -> SysReply {
        let Some(process) = self.processes.get_mut(&pid) else {
            return SysReply::Failure(no_process(pid));
        };
        match process.handle_mut(handle).and_then(|h| h.as_read()) {
            Some(reader) => match op(reader) {
                Ok(Some(text)) => SysReply::Success(vec![json!(text)]),
                Ok(None) => SysReply::Success(vec![SysValue::Null]),
                Err(e) => SysReply::Failure(e.to_string()),
            },
            None => SysReply::Failure(bad_fd(handle)),
        }
    }

    fn write_op(
        &mut self,
        pid: Pid,
        handle: HandleId,
        op: impl FnOnce(&mut dyn WriteHandle) -> crate::error::Result<()>,
    ) -> SysReply {
        let Some(process) = self.processes.get_mut(&pid) else {
            return SysReply::Failure(no_process(pid));
        };
        match process.handle_mut(handle).and_then(|h| h.as_write()) {
            Some(writer) => match op(writer) {
                Ok(()) => SysReply::Success(Vec::new()),
                Err(e) => SysReply::Failure(e.to_string()),
            },
            None => SysReply::Failure(bad_fd(handle)),
        }
    }

    /// Load a program from the VFS and spawn it as a child of `pid`,
    /// honoring the execute bit and setuid/setgid.
    fn spawn_from_path(&mut self, pid: Pid, launch: ProcessLaunch) -> SysReply {
        let creds = self.creds(pid);
        let path = self.resolve_path(pid, &launch.path);

        let meta = match self.vfs.metadata(&path, &creds) {
            Ok(meta) => meta,
            Err(e) => return SysReply::Failure(e.to_string()),
        };
        let source = match self.vfs.open(&path, OpenMode::Execute, &creds) {
            Ok(mut stream) => {
                let content = stream.read_all();
                let _ = stream.close();
                match content {
                    Ok(text) => text.unwrap_or_default(),
                    Err(e) => return SysReply::Failure(e.to_string()),
                }
            }
            Err(e) => return SysReply::Failure(e.to_string()),
        };
        let unit = match self.loader.load(&path, &source) {
            Ok(unit) => unit,
            Err(e) => return SysReply::Failure(e.to_string()),
        };

        let mut child_creds = creds;
        let parsed = perms::parse(meta.mode);
        if parsed.setuid {
            child_creds.uid = meta.owner;
        }
        if parsed.setgid {
            child_creds.gid = meta.group;
        }

        let parent_cwd = self
            .processes
            .get(&pid)
            .map(|p| p.working_dir.clone())
            .unwrap_or_else(|| "/".to_string());
        let working_dir = launch
            .cwd
            .map(|c| ferrite_vfs::path::join(&parent_cwd, &c))
            .unwrap_or(parent_cwd);

        let spec = ProcessSpec {
            name: launch.name,
            working_dir,
            parent: Some(pid),
            args: launch.args,
            env: launch.env,
            handle_overrides: launch.handle_overrides,
            credentials: Some(child_creds),
        };
        let child = self.create_process(spec, unit);
        SysReply::Success(vec![json!(child)])
    }
}

fn bad_fd(handle: HandleId) -> String {
    KernelError::BadFileDescriptor { handle }.to_string()
}

fn no_process(pid: Pid) -> String {
    KernelError::ProcessNotFound { pid }.to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ferrite_vfs::{MemFsDriver, VfsManager};

    use super::*;
    use crate::clock::ManualClock;
    use crate::console::BufferConsole;
    use crate::error::KernelError;
    use crate::exec::{NullLoader, ProgramLoader, ScriptUnit, StepOutcome};
    use crate::handle::{STDIN, STDOUT};
    use crate::process_manager::ProcessSpec;

    fn kernel_with_fs() -> Kernel {
        let mut vfs = VfsManager::new();
        vfs.mount("/", Box::new(MemFsDriver::new(1 << 20)));
        Kernel::new(
            vfs,
            Box::new(NullLoader),
            BufferConsole::shared(),
            Arc::new(ManualClock::new(0)),
        )
    }

    fn spawn(kernel: &mut Kernel, name: &str) -> (Pid, Tid) {
        let unit = ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: i64::MAX });
        let pid = kernel.create_process(ProcessSpec::new(name), Box::new(unit));
        let tid = kernel.process(pid).expect("process").main_thread;
        (pid, tid)
    }

    fn resume_args(kernel: &Kernel, tid: Tid) -> Vec<SysValue> {
        kernel
            .thread(tid)
            .expect("thread")
            .next_resume_args
            .clone()
    }

    #[test]
    fn print_reports_line_count() {
        let mut k = kernel_with_fs();
        let (_pid, tid) = spawn(&mut k, "printer");

        k.execute_syscall(
            tid,
            Syscall::Print {
                text: "one\ntwo".into(),
            },
        );
        assert_eq!(resume_args(&k, tid), ok_args([json!(2)]));
    }

    #[test]
    fn epoch_rejects_unknown_locale() {
        let mut k = kernel_with_fs();
        let (_pid, tid) = spawn(&mut k, "clock");

        k.execute_syscall(
            tid,
            Syscall::Epoch {
                locale: "ingame".into(),
            },
        );
        let args = resume_args(&k, tid);
        assert_eq!(args[0], SysValue::Bool(false));

        k.execute_syscall(
            tid,
            Syscall::Epoch {
                locale: "utc".into(),
            },
        );
        assert_eq!(resume_args(&k, tid), ok_args([json!(0)]));
    }

    #[test]
    fn fs_open_write_read_round_trip_through_handles() {
        let mut k = kernel_with_fs();
        let (_pid, tid) = spawn(&mut k, "writer");

        k.execute_syscall(
            tid,
            Syscall::FsOpen {
                path: "/notes.txt".into(),
                mode: "w".into(),
            },
        );
        let args = resume_args(&k, tid);
        assert_eq!(args[0], SysValue::Bool(true));
        let handle = args[1].as_u64().expect("handle id") as HandleId;

        k.execute_syscall(
            tid,
            Syscall::HandleWriteLine {
                handle,
                text: "hello".into(),
            },
        );
        assert_eq!(resume_args(&k, tid)[0], SysValue::Bool(true));

        k.execute_syscall(tid, Syscall::HandleClose { handle });
        assert_eq!(resume_args(&k, tid)[0], SysValue::Bool(true));

        // Closed: the slot is gone.
        k.execute_syscall(tid, Syscall::HandleClose { handle });
        assert_eq!(resume_args(&k, tid)[0], SysValue::Bool(false));

        k.execute_syscall(
            tid,
            Syscall::FsOpen {
                path: "/notes.txt".into(),
                mode: "r".into(),
            },
        );
        let handle = resume_args(&k, tid)[1].as_u64().expect("handle") as HandleId;
        k.execute_syscall(tid, Syscall::HandleReadLine { handle });
        assert_eq!(resume_args(&k, tid), ok_args([json!("hello")]));
    }

    #[test]
    fn capability_mismatch_is_bad_file_descriptor() {
        let mut k = kernel_with_fs();
        let (_pid, tid) = spawn(&mut k, "confused");

        // stdout is write-only.
        k.execute_syscall(
            tid,
            Syscall::HandleRead {
                handle: STDOUT,
                count: 1,
            },
        );
        let args = resume_args(&k, tid);
        assert_eq!(args[0], SysValue::Bool(false));
        assert!(
            args[1]
                .as_str()
                .expect("message")
                .contains("bad file descriptor")
        );

        // stdin is read-only.
        k.execute_syscall(
            tid,
            Syscall::HandleWrite {
                handle: STDIN,
                text: "nope".into(),
            },
        );
        assert_eq!(resume_args(&k, tid)[0], SysValue::Bool(false));

        // Unknown ids fail the same way.
        k.execute_syscall(tid, Syscall::HandleFlush { handle: 99 });
        assert_eq!(resume_args(&k, tid)[0], SysValue::Bool(false));
    }

    #[test]
    fn empty_stdin_reads_as_null_not_blocking() {
        let mut k = kernel_with_fs();
        let (_pid, tid) = spawn(&mut k, "reader");

        k.execute_syscall(tid, Syscall::HandleIsEmpty { handle: STDIN });
        assert_eq!(resume_args(&k, tid), ok_args([json!(true)]));

        k.execute_syscall(tid, Syscall::HandleReadLine { handle: STDIN });
        assert_eq!(resume_args(&k, tid), ok_args([SysValue::Null]));
    }

    #[test]
    fn chmod_0600_write_denied_for_stranger_allowed_for_root() {
        let mut k = kernel_with_fs();
        let (root_pid, root_tid) = spawn(&mut k, "root");

        k.execute_syscall(
            root_tid,
            Syscall::FsOpen {
                path: "/secret".into(),
                mode: "w".into(),
            },
        );
        let handle = resume_args(&k, root_tid)[1].as_u64().expect("handle") as HandleId;
        k.execute_syscall(root_tid, Syscall::HandleClose { handle });
        k.execute_syscall(
            root_tid,
            Syscall::FsChown {
                path: "/secret".into(),
                owner: Some(1000),
                group: Some(100),
            },
        );
        k.execute_syscall(
            root_tid,
            Syscall::FsChmod {
                path: "/secret".into(),
                mode: 0o600,
            },
        );
        assert_eq!(resume_args(&k, root_tid)[0], SysValue::Bool(true));

        // A non-owning, non-group user cannot open for write.
        let stranger_unit =
            ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: i64::MAX });
        let stranger = k.create_process(
            ProcessSpec::new("stranger").with_credentials(Credentials::user(2000, 200)),
            Box::new(stranger_unit),
        );
        let stranger_tid = k.process(stranger).expect("process").main_thread;
        k.execute_syscall(
            stranger_tid,
            Syscall::FsOpen {
                path: "/secret".into(),
                mode: "w".into(),
            },
        );
        let args = resume_args(&k, stranger_tid);
        assert_eq!(args[0], SysValue::Bool(false));
        assert!(args[1].as_str().expect("message").contains("permission"));

        // The superuser succeeds regardless of mode.
        assert_eq!(k.creds(root_pid).uid, 0);
        k.execute_syscall(
            root_tid,
            Syscall::FsOpen {
                path: "/secret".into(),
                mode: "w".into(),
            },
        );
        assert_eq!(resume_args(&k, root_tid)[0], SysValue::Bool(true));
    }

    #[test]
    fn identity_changes_are_superuser_only() {
        let mut k = kernel_with_fs();
        let unit = ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: i64::MAX });
        let pid = k.create_process(
            ProcessSpec::new("user").with_credentials(Credentials::user(1000, 100)),
            Box::new(unit),
        );
        let tid = k.process(pid).expect("process").main_thread;

        k.execute_syscall(tid, Syscall::SetUid { uid: 0 });
        assert_eq!(resume_args(&k, tid)[0], SysValue::Bool(false));
        assert_eq!(k.creds(pid).uid, 1000);

        let (_root_pid, root_tid) = spawn(&mut k, "root");
        k.execute_syscall(root_tid, Syscall::SetGroups { groups: vec![5, 6] });
        assert_eq!(resume_args(&k, root_tid)[0], SysValue::Bool(true));
    }

    #[test]
    fn set_cwd_validates_directory_and_access() {
        let mut k = kernel_with_fs();
        let (pid, tid) = spawn(&mut k, "wanderer");

        k.execute_syscall(
            tid,
            Syscall::FsMakeDir {
                path: "/home/user".into(),
            },
        );
        k.execute_syscall(
            tid,
            Syscall::SetCwd {
                path: "/home/user".into(),
            },
        );
        assert_eq!(resume_args(&k, tid)[0], SysValue::Bool(true));
        assert_eq!(k.process(pid).expect("process").working_dir, "/home/user");

        // Relative resolution against the new cwd.
        k.execute_syscall(
            tid,
            Syscall::SetCwd {
                path: "missing".into(),
            },
        );
        let args = resume_args(&k, tid);
        assert_eq!(args[0], SysValue::Bool(false));
        assert_eq!(args[1], json!("directory does not exist"));
    }

    #[test]
    fn create_process_loads_program_and_applies_setuid() {
        struct StubLoader;
        impl ProgramLoader for StubLoader {
            fn load(
                &self,
                path: &str,
                source: &str,
            ) -> crate::error::Result<Box<dyn ExecUnit>> {
                if source.is_empty() {
                    return Err(KernelError::ProgramNotFound {
                        path: path.to_string(),
                    });
                }
                Ok(Box::new(
                    ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: i64::MAX }),
                ))
            }
        }

        let mut vfs = VfsManager::new();
        let fs = MemFsDriver::new(1 << 20);
        fs.seed_file("/bin/daemon", "daemon body");
        vfs.mount("/", Box::new(fs));
        let mut k = Kernel::new(
            vfs,
            Box::new(StubLoader),
            BufferConsole::shared(),
            Arc::new(ManualClock::new(0)),
        );
        k.vfs
            .chown("/bin/daemon", Some(777), None, &Credentials::root())
            .expect("chown");
        k.vfs
            .chmod("/bin/daemon", 0o4755, &Credentials::root())
            .expect("chmod setuid");

        let (_pid, tid) = spawn(&mut k, "launcher");
        k.execute_syscall(
            tid,
            Syscall::CreateProcess(ProcessLaunch::new("/bin/daemon", "daemon")),
        );
        let args = resume_args(&k, tid);
        assert_eq!(args[0], SysValue::Bool(true));
        let child = args[1].as_u64().expect("child pid");

        let child_process = k.process(child).expect("child");
        assert_eq!(child_process.credentials.uid, 777, "setuid bit applied");
        assert_eq!(child_process.name, "daemon");
    }

    #[test]
    fn create_process_fails_without_execute_bit() {
        let mut k = kernel_with_fs();
        let (_pid, tid) = spawn(&mut k, "launcher");

        k.execute_syscall(
            tid,
            Syscall::FsOpen {
                path: "/plain.txt".into(),
                mode: "w".into(),
            },
        );
        let handle = resume_args(&k, tid)[1].as_u64().expect("handle") as HandleId;
        k.execute_syscall(tid, Syscall::HandleClose { handle });
        k.execute_syscall(
            tid,
            Syscall::FsChmod {
                path: "/plain.txt".into(),
                mode: 0o644,
            },
        );

        // Drop to a non-root identity: root bypasses the execute check.
        let unit = ScriptUnit::new().then_syscall(|| Syscall::Sleep { millis: i64::MAX });
        let user = k.create_process(
            ProcessSpec::new("user").with_credentials(Credentials::user(1000, 100)),
            Box::new(unit),
        );
        let user_tid = k.process(user).expect("process").main_thread;
        k.execute_syscall(
            user_tid,
            Syscall::CreateProcess(ProcessLaunch::new("/plain.txt", "nope")),
        );
        assert_eq!(resume_args(&k, user_tid)[0], SysValue::Bool(false));
    }

    #[test]
    fn process_details_snapshot_via_syscall() {
        let mut k = kernel_with_fs();
        let (pid, tid) = spawn(&mut k, "self-aware");

        k.execute_syscall(tid, Syscall::GetProcessDetails { pid });
        let args = resume_args(&k, tid);
        assert_eq!(args[0], SysValue::Bool(true));
        assert_eq!(args[1]["pid"], json!(pid));
        assert_eq!(args[1]["name"], json!("self-aware"));
        assert_eq!(args[1]["threads"], json!(1));
    }
}
