//! FerriteOS virtual filesystem.
//!
//! This crate provides the storage side of the FerriteOS kernel emulation:
//!
//! - **[`manager`]** -- Mount table with longest-prefix path resolution and
//!   unix-style permission enforcement over every operation.
//! - **[`driver`]** / **[`stream`]** -- The contracts a mounted filesystem
//!   implements: path-scoped operations plus stateful file cursors.
//! - **[`memfs`]** -- Heap-backed driver for ROM images and tests.
//! - **[`diskfs`]** -- Driver persisting under a host directory, with
//!   FerriteOS metadata kept in per-directory sidecar files.
//! - **[`perms`]** -- Octal mode parsing and access decisions
//!   (user/group/other plus setuid/setgid/sticky, uid 0 bypass).
//! - **[`metadata`]** / **[`path`]** / **[`error`]** -- Shared records,
//!   path normalization, and the crate-wide [`VfsError`].
//!
//! The scheduling core only ever calls through [`manager::VfsManager`]; it
//! has no knowledge of the storage format behind a mount.

pub mod diskfs;
pub mod driver;
pub mod error;
pub mod manager;
pub mod memfs;
pub mod metadata;
pub mod path;
pub mod perms;
pub mod stream;

pub use diskfs::DiskFsDriver;
pub use driver::{FsDriver, OpenMode};
pub use error::{Result, VfsError};
pub use manager::VfsManager;
pub use memfs::MemFsDriver;
pub use metadata::{FileMetadata, MetadataPatch};
pub use perms::{AccessClass, Credentials};
pub use stream::{FileStream, SeekWhence};
