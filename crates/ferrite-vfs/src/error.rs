//! VFS error types.
//!
//! All filesystem subsystems surface errors through [`VfsError`], the single
//! error type returned by every public API in this crate.  Syscall-level
//! callers convert these into failure tuples; nothing here is fatal.

/// Unified error type for the FerriteOS virtual filesystem.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// The path does not exist on any mounted filesystem.
    #[error("no such file or directory: {path}")]
    PathNotFound { path: String },

    /// The destination of a create/move/copy already exists.
    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    /// A permission, traversal, or sticky-bit check failed.
    #[error("permission denied: {path}")]
    NoPermission { path: String },

    /// The operation expected a directory but found a file.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// The operation expected a file but found a directory.
    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    /// A write-class operation was attempted on a read-only filesystem.
    #[error("read-only filesystem: {path}")]
    ReadOnlyFilesystem { path: String },

    /// The path does not resolve to any mount point.
    #[error("no filesystem mounted for: {path}")]
    NoSuchMount { path: String },

    /// A caller-supplied argument was malformed (e.g. an unsupported open
    /// mode string).
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Host I/O failure from the disk-backed driver.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal vfs error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the VFS crate.
pub type Result<T> = std::result::Result<T, VfsError>;
