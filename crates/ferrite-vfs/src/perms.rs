//! Unix-style permission checks.
//!
//! Modes are octal words: special bits (setuid `0o4000`, setgid `0o2000`,
//! sticky `0o1000`) followed by rwx triples for user, group and other.
//! Access decisions take the caller's [`Credentials`]; uid 0 bypasses every
//! check.

use serde::{Deserialize, Serialize};

use crate::metadata::FileMetadata;

/// Effective identity of a calling process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
}

impl Credentials {
    /// The superuser identity.
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            groups: Vec::new(),
        }
    }

    /// An ordinary user with a single primary group.
    pub fn user(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            groups: Vec::new(),
        }
    }

    pub fn is_superuser(&self) -> bool {
        self.uid == 0
    }

    /// True if `gid` is the primary group or any supplementary group.
    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

/// One rwx triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSet {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

/// A fully parsed permission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedMode {
    pub user: PermissionSet,
    pub group: PermissionSet,
    pub other: PermissionSet,
    pub setuid: bool,
    pub setgid: bool,
    pub sticky: bool,
}

/// The access class being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessClass {
    Read,
    Write,
    Execute,
}

/// Split an octal mode word into its permission sets and special bits.
pub fn parse(mode: u32) -> ParsedMode {
    ParsedMode {
        setuid: mode & 0o4000 != 0,
        setgid: mode & 0o2000 != 0,
        sticky: mode & 0o1000 != 0,
        user: PermissionSet {
            read: mode & 0o0400 != 0,
            write: mode & 0o0200 != 0,
            execute: mode & 0o0100 != 0,
        },
        group: PermissionSet {
            read: mode & 0o0040 != 0,
            write: mode & 0o0020 != 0,
            execute: mode & 0o0010 != 0,
        },
        other: PermissionSet {
            read: mode & 0o0004 != 0,
            write: mode & 0o0002 != 0,
            execute: mode & 0o0001 != 0,
        },
    }
}

/// Reassemble a [`ParsedMode`] into its octal word.
pub fn serialize(p: &ParsedMode) -> u32 {
    let mut mode = 0;
    if p.setuid {
        mode |= 0o4000;
    }
    if p.setgid {
        mode |= 0o2000;
    }
    if p.sticky {
        mode |= 0o1000;
    }
    if p.user.read {
        mode |= 0o0400;
    }
    if p.user.write {
        mode |= 0o0200;
    }
    if p.user.execute {
        mode |= 0o0100;
    }
    if p.group.read {
        mode |= 0o0040;
    }
    if p.group.write {
        mode |= 0o0020;
    }
    if p.group.execute {
        mode |= 0o0010;
    }
    if p.other.read {
        mode |= 0o0004;
    }
    if p.other.write {
        mode |= 0o0002;
    }
    if p.other.execute {
        mode |= 0o0001;
    }
    mode
}

/// Decide whether `cred` may perform `class` access on an entry with the
/// given metadata.  Owner is checked before group, group before other; the
/// first matching identity class is authoritative.
pub fn access_allowed(meta: &FileMetadata, cred: &Credentials, class: AccessClass) -> bool {
    if cred.is_superuser() {
        return true;
    }

    let parsed = parse(meta.mode);
    let set = if cred.uid == meta.owner {
        parsed.user
    } else if cred.in_group(meta.group) {
        parsed.group
    } else {
        parsed.other
    };

    match class {
        AccessClass::Read => set.read,
        AccessClass::Write => set.write,
        AccessClass::Execute => set.execute,
    }
}

/// Sticky-directory deletion rule: removing an entry from a sticky directory
/// requires owning the entry or the directory (or being root).
pub fn may_remove_from(dir: &FileMetadata, victim: &FileMetadata, cred: &Credentials) -> bool {
    if cred.is_superuser() {
        return true;
    }
    if !parse(dir.mode).sticky {
        return true;
    }
    cred.uid == victim.owner || cred.uid == dir.owner
}
