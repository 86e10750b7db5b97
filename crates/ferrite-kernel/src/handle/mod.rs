//! Capability-typed handles.
//!
//! A process handle table maps small integer ids to [`Handle`]s.  Slots
//! 0/1/2 conventionally hold stdin/stdout/stderr.  Capabilities are a small
//! closed set: [`ReadHandle`] and [`WriteHandle`]; concrete kinds live in a
//! tagged enum, and the syscall layer asks for the capability it needs,
//! failing with a bad-file-descriptor condition on a mismatch.
//!
//! Handles are cheap to clone: the underlying endpoint (line buffer,
//! console, file stream) is shared, which is exactly what inheriting a
//! parent's stdio slots means.

mod file;
mod keyboard;
mod terminal;

pub use file::FileHandle;
pub use keyboard::{KeyboardHandle, LineBuffer, LineDiscipline, SharedLineBuffer};
pub use terminal::TerminalHandle;

use crate::error::Result;

/// Index into a process handle table.
pub type HandleId = u32;

/// Conventional stdio slots.
pub const STDIN: HandleId = 0;
pub const STDOUT: HandleId = 1;
pub const STDERR: HandleId = 2;

/// The readable capability.
pub trait ReadHandle {
    /// True if a read right now would return nothing.
    fn is_empty(&mut self) -> bool;

    /// Read up to `count` characters; `None` when nothing is available.
    fn read(&mut self, count: usize) -> Result<Option<String>>;

    /// Read one line; `None` when nothing is available.
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Read everything available; `None` when nothing is.
    fn read_all(&mut self) -> Result<Option<String>>;
}

/// The writable capability.
pub trait WriteHandle {
    fn write(&mut self, text: &str) -> Result<()>;
    fn write_line(&mut self, text: &str) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// A handle table entry: one of the concrete endpoint kinds.
#[derive(Clone)]
pub enum Handle {
    Keyboard(KeyboardHandle),
    Terminal(TerminalHandle),
    File(FileHandle),
}

impl Handle {
    /// The readable view, if this handle has the capability.
    pub fn as_read(&mut self) -> Option<&mut dyn ReadHandle> {
        match self {
            Handle::Keyboard(h) => Some(h),
            Handle::File(h) if h.readable() => Some(h),
            _ => None,
        }
    }

    /// The writable view, if this handle has the capability.
    pub fn as_write(&mut self) -> Option<&mut dyn WriteHandle> {
        match self {
            Handle::Terminal(h) => Some(h),
            Handle::File(h) if h.writable() => Some(h),
            _ => None,
        }
    }

    /// Release the underlying endpoint.
    pub fn close(&mut self) -> Result<()> {
        match self {
            Handle::Keyboard(_) | Handle::Terminal(_) => Ok(()),
            Handle::File(h) => h.close(),
        }
    }

    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Handle::Keyboard(_) => "keyboard",
            Handle::Terminal(_) => "terminal",
            Handle::File(_) => "file",
        }
    }
}
