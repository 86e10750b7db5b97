//! File metadata records.
//!
//! Every entry on a mounted filesystem carries a [`FileMetadata`] record:
//! ownership, an octal permission mode, timestamps, and a flag word.  The
//! disk-backed driver persists these in per-directory sidecar files; the
//! in-memory driver keeps them on the nodes.

use serde::{Deserialize, Serialize};

/// Flag bit marking a system entry that user tooling should not touch.
pub const FLAG_SYSTEM: u32 = 0x1;

/// Default mode for newly created files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default mode for newly created directories.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Metadata attached to a single filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Owning user id.
    pub owner: u32,
    /// Owning group id.
    pub group: u32,
    /// Octal permission mode: special bits (setuid/setgid/sticky) plus
    /// user/group/other rwx triples.
    pub mode: u32,
    /// Creation time, UTC epoch millis.
    pub created: i64,
    /// Last modification time, UTC epoch millis.
    pub modified: i64,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Flag word, see [`FLAG_SYSTEM`].
    pub flags: u32,
}

impl FileMetadata {
    /// Metadata for a newly created file owned by root.
    pub fn new_file(now: i64) -> Self {
        Self {
            owner: 0,
            group: 0,
            mode: DEFAULT_FILE_MODE,
            created: now,
            modified: now,
            is_directory: false,
            size: 0,
            flags: 0,
        }
    }

    /// Metadata for a newly created directory owned by root.
    pub fn new_directory(now: i64) -> Self {
        Self {
            owner: 0,
            group: 0,
            mode: DEFAULT_DIR_MODE,
            created: now,
            modified: now,
            is_directory: true,
            size: 0,
            flags: 0,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &MetadataPatch) {
        if let Some(owner) = patch.owner {
            self.owner = owner;
        }
        if let Some(group) = patch.group {
            self.group = group;
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(modified) = patch.modified {
            self.modified = modified;
        }
        if let Some(flags) = patch.flags {
            self.flags = flags;
        }
    }
}

/// Partial metadata update for `set_metadata`.  `None` fields are left
/// untouched.  Structural fields (`is_directory`, `size`, `created`) cannot
/// be patched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub owner: Option<u32>,
    pub group: Option<u32>,
    pub mode: Option<u32>,
    pub modified: Option<i64>,
    pub flags: Option<u32>,
}

impl MetadataPatch {
    /// A patch that only changes the permission mode.
    pub fn mode(mode: u32) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    /// A patch that only changes ownership.  Pass `None` to leave either
    /// side untouched.
    pub fn ownership(owner: Option<u32>, group: Option<u32>) -> Self {
        Self {
            owner,
            group,
            ..Self::default()
        }
    }

    /// True if the patch touches the `owner` or `group` fields.
    pub fn changes_ownership(&self) -> bool {
        self.owner.is_some() || self.group.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_patches_selected_fields() {
        let mut meta = FileMetadata::new_file(1_000);
        meta.apply(&MetadataPatch::mode(0o600));
        assert_eq!(meta.mode, 0o600);
        assert_eq!(meta.owner, 0);

        meta.apply(&MetadataPatch::ownership(Some(1000), None));
        assert_eq!(meta.owner, 1000);
        assert_eq!(meta.group, 0);
    }
}
