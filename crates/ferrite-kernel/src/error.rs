//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`].  Syscall
//! dispatch converts these into failure tuples delivered to the calling
//! thread; nothing in this taxonomy is ever fatal to the kernel itself.

use crate::process::Pid;
use crate::thread::Tid;

/// Unified error type for the FerriteOS kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The handle id is absent from the table or lacks the required
    /// capability (readable vs. writable).
    #[error("bad file descriptor: {handle}")]
    BadFileDescriptor { handle: u32 },

    /// The referenced process does not exist in the process table.
    #[error("no such process: {pid}")]
    ProcessNotFound { pid: Pid },

    /// The referenced thread does not exist.
    #[error("no such thread: {tid}")]
    ThreadNotFound { tid: Tid },

    /// A wait was issued for a process that is not a child of the caller.
    #[error("process {pid} is not a child of this process")]
    NotAChild { pid: Pid },

    /// A wildcard child-wait was issued by a process with no children.
    #[error("process has no children")]
    NoChildren,

    /// A caller-supplied argument was malformed (unsupported open mode,
    /// unknown epoch locale, ...).
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The caller lacks the privilege for the requested operation.
    #[error("operation not permitted")]
    NotPermitted,

    /// An executing unit raised an unhandled error.
    #[error("execution fault: {message}")]
    ExecutionFault { message: String },

    /// The program loader could not produce an executable unit for a path.
    #[error("program not found: {path}")]
    ProgramNotFound { path: String },

    /// Filesystem-side failure, passed through from the VFS collaborator.
    #[error(transparent)]
    Vfs(#[from] ferrite_vfs::VfsError),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
