//! Filesystem driver contract.
//!
//! A driver serves one mounted subtree.  Paths handed to a driver are
//! normalized and relative to its mount point (`""` addresses the mount
//! root).  Permission enforcement happens above the driver, in the
//! [`crate::manager::VfsManager`]; drivers only store and retrieve.

use crate::error::Result;
use crate::metadata::{FileMetadata, MetadataPatch};
use crate::stream::FileStream;

/// How a file is being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read from the start.
    Read,
    /// Truncate and write.
    Write,
    /// Write starting at the end.
    Append,
    /// Read, for loading as a program (requires the execute bit).
    Execute,
}

impl OpenMode {
    /// Parse the guest-facing mode string (`"r"`, `"w"`, `"a"`, `"x"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "r" => Some(Self::Read),
            "w" => Some(Self::Write),
            "a" => Some(Self::Append),
            "x" => Some(Self::Execute),
            _ => None,
        }
    }

    /// Whether the resulting stream is readable.
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::Execute)
    }

    /// Whether the resulting stream is writable.
    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::Append)
    }
}

/// One mounted filesystem implementation.
pub trait FsDriver {
    /// Short identifier used in logs (e.g. `"memfs"`, `"diskfs"`).
    fn id(&self) -> &str;

    /// True if every write-class operation should be rejected.
    fn read_only(&self) -> bool;

    fn exists(&self, path: &str) -> bool;

    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn FileStream>>;

    /// Child entry names of a directory, sorted.
    fn list(&self, path: &str) -> Result<Vec<String>>;

    fn mkdir(&self, path: &str) -> Result<()>;

    /// Remove a file or a directory tree.
    fn delete(&self, path: &str) -> Result<()>;

    /// Rename within this driver.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Copy within this driver.
    fn copy(&self, from: &str, to: &str) -> Result<()>;

    fn metadata(&self, path: &str) -> Result<FileMetadata>;

    fn set_metadata(&self, path: &str, patch: &MetadataPatch) -> Result<()>;

    /// File size in bytes (directories report 0).
    fn size(&self, path: &str) -> Result<u64>;

    /// Total bytes this filesystem can hold.
    fn capacity(&self) -> u64;

    /// Remaining bytes.
    fn free_space(&self) -> u64;
}
