//! Mount table and permission-checked filesystem operations.
//!
//! The [`VfsManager`] resolves virtual paths to mounted drivers by
//! longest-prefix match and enforces the unix-style permission model before
//! delegating.  Drivers never see credentials; every check lives here.

use tracing::{debug, warn};

use crate::driver::{FsDriver, OpenMode};
use crate::error::{Result, VfsError};
use crate::metadata::{FileMetadata, MetadataPatch};
use crate::path;
use crate::perms::{self, AccessClass, Credentials};
use crate::stream::FileStream;

struct MountPoint {
    path: String,
    driver: Box<dyn FsDriver>,
}

/// The virtual filesystem root: a stack of mounted drivers.
pub struct VfsManager {
    mounts: Vec<MountPoint>,
}

impl VfsManager {
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    /// Mount a driver at `path`.  Longer mount paths shadow shorter ones.
    pub fn mount(&mut self, mount_path: &str, driver: Box<dyn FsDriver>) {
        let clean = path::normalize(mount_path);
        debug!(mount = %clean, driver = driver.id(), "mounting filesystem");
        self.mounts.push(MountPoint {
            path: clean,
            driver,
        });
        self.mounts.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
    }

    /// Unmount the driver at exactly `path`.  Returns whether one existed.
    pub fn unmount(&mut self, mount_path: &str) -> bool {
        let clean = path::normalize(mount_path);
        let before = self.mounts.len();
        self.mounts.retain(|m| m.path != clean);
        self.mounts.len() != before
    }

    /// Resolve a virtual path to (mount index, driver-relative path).
    fn resolve(&self, virtual_path: &str) -> Option<(usize, String)> {
        let clean = path::normalize(virtual_path);
        for (idx, mount) in self.mounts.iter().enumerate() {
            if clean == mount.path {
                return Some((idx, String::new()));
            }
            if mount.path == "/" {
                return Some((idx, clean[1..].to_string()));
            }
            if let Some(rest) = clean.strip_prefix(&format!("{}/", mount.path)) {
                return Some((idx, rest.to_string()));
            }
        }
        None
    }

    fn driver_for(&self, virtual_path: &str) -> Result<(&dyn FsDriver, String)> {
        self.resolve(virtual_path)
            .map(|(idx, rel)| (&*self.mounts[idx].driver, rel))
            .ok_or_else(|| VfsError::NoSuchMount {
                path: virtual_path.to_string(),
            })
    }

    fn metadata_unchecked(&self, virtual_path: &str) -> Result<FileMetadata> {
        let (driver, rel) = self.driver_for(virtual_path)?;
        driver.metadata(&rel)
    }

    /// Every existing ancestor directory must grant execute.
    fn check_traversal(&self, virtual_path: &str, cred: &Credentials) -> Result<()> {
        if cred.is_superuser() {
            return Ok(());
        }
        for ancestor in path::ancestors(virtual_path) {
            let Ok(meta) = self.metadata_unchecked(&ancestor) else {
                continue;
            };
            if !meta.is_directory {
                return Err(VfsError::NotADirectory { path: ancestor });
            }
            if !perms::access_allowed(&meta, cred, AccessClass::Execute) {
                return Err(VfsError::NoPermission { path: ancestor });
            }
        }
        Ok(())
    }

    fn check_access(
        &self,
        virtual_path: &str,
        cred: &Credentials,
        class: AccessClass,
    ) -> Result<()> {
        let meta = self.metadata_unchecked(virtual_path)?;
        if perms::access_allowed(&meta, cred, class) {
            Ok(())
        } else {
            Err(VfsError::NoPermission {
                path: path::normalize(virtual_path),
            })
        }
    }

    /// Deepest ancestor (or the path's parent itself) that currently exists.
    fn deepest_existing_dir(&self, virtual_path: &str) -> String {
        let mut current = path::parent(virtual_path).unwrap_or_else(|| "/".to_string());
        loop {
            if let Some((idx, rel)) = self.resolve(&current)
                && self.mounts[idx].driver.exists(&rel)
            {
                return current;
            }
            match path::parent(&current) {
                Some(p) => current = p,
                None => return "/".to_string(),
            }
        }
    }

    /// Permission to create an entry at `virtual_path`: write on the deepest
    /// existing ancestor directory.
    fn check_create(&self, virtual_path: &str, cred: &Credentials) -> Result<()> {
        self.check_traversal(virtual_path, cred)?;
        let dir = self.deepest_existing_dir(virtual_path);
        self.check_access(&dir, cred, AccessClass::Write)
    }

    /// Permission to remove the entry at `virtual_path`: write on the parent
    /// plus the sticky-directory rule.
    fn check_remove(&self, virtual_path: &str, cred: &Credentials) -> Result<()> {
        self.check_traversal(virtual_path, cred)?;
        let parent = path::parent(virtual_path).ok_or_else(|| VfsError::InvalidArgument {
            reason: "cannot remove the filesystem root".to_string(),
        })?;
        self.check_access(&parent, cred, AccessClass::Write)?;

        let dir_meta = self.metadata_unchecked(&parent)?;
        let victim_meta = self.metadata_unchecked(virtual_path)?;
        if !perms::may_remove_from(&dir_meta, &victim_meta, cred) {
            return Err(VfsError::NoPermission {
                path: path::normalize(virtual_path),
            });
        }
        Ok(())
    }

    // -- Path-scoped operations ---------------------------------------------

    /// Whether the path exists.  Permission failures along the way read as
    /// "does not exist" rather than erroring.
    pub fn exists(&self, virtual_path: &str, cred: &Credentials) -> bool {
        if self.check_traversal(virtual_path, cred).is_err() {
            return false;
        }
        match self.resolve(virtual_path) {
            Some((idx, rel)) => self.mounts[idx].driver.exists(&rel),
            None => false,
        }
    }

    /// Whether `cred` may use the directory as a working directory.
    pub fn can_access_dir(&self, virtual_path: &str, cred: &Credentials) -> bool {
        if self.check_traversal(virtual_path, cred).is_err() {
            return false;
        }
        match self.metadata_unchecked(virtual_path) {
            Ok(meta) => {
                meta.is_directory
                    && perms::access_allowed(&meta, cred, AccessClass::Execute)
            }
            Err(_) => false,
        }
    }

    pub fn open(
        &self,
        virtual_path: &str,
        mode: OpenMode,
        cred: &Credentials,
    ) -> Result<Box<dyn FileStream>> {
        self.check_traversal(virtual_path, cred)?;
        let (driver, rel) = self.driver_for(virtual_path)?;

        if mode.writable() && driver.read_only() {
            return Err(VfsError::ReadOnlyFilesystem {
                path: path::normalize(virtual_path),
            });
        }

        if driver.exists(&rel) {
            match mode {
                OpenMode::Read => self.check_access(virtual_path, cred, AccessClass::Read)?,
                OpenMode::Execute => {
                    self.check_access(virtual_path, cred, AccessClass::Read)?;
                    self.check_access(virtual_path, cred, AccessClass::Execute)?;
                }
                OpenMode::Write | OpenMode::Append => {
                    self.check_access(virtual_path, cred, AccessClass::Write)?;
                }
            }
        } else if mode.writable() {
            self.check_create(virtual_path, cred)?;
        } else {
            return Err(VfsError::PathNotFound {
                path: path::normalize(virtual_path),
            });
        }

        driver.open(&rel, mode)
    }

    pub fn list(&self, virtual_path: &str, cred: &Credentials) -> Result<Vec<String>> {
        self.check_traversal(virtual_path, cred)?;
        self.check_access(virtual_path, cred, AccessClass::Read)?;
        let (driver, rel) = self.driver_for(virtual_path)?;
        driver.list(&rel)
    }

    pub fn mkdir(&self, virtual_path: &str, cred: &Credentials) -> Result<()> {
        self.check_create(virtual_path, cred)?;
        let (driver, rel) = self.driver_for(virtual_path)?;
        if driver.read_only() {
            return Err(VfsError::ReadOnlyFilesystem {
                path: path::normalize(virtual_path),
            });
        }
        driver.mkdir(&rel)
    }

    pub fn delete(&self, virtual_path: &str, cred: &Credentials) -> Result<()> {
        self.check_remove(virtual_path, cred)?;
        let (driver, rel) = self.driver_for(virtual_path)?;
        driver.delete(&rel)
    }

    /// Move an entry, falling back to copy+delete across drivers.
    pub fn rename(&self, from: &str, to: &str, cred: &Credentials) -> Result<()> {
        self.check_remove(from, cred)?;
        self.check_create(to, cred)?;

        let (from_idx, from_rel) = self.resolve(from).ok_or_else(|| VfsError::NoSuchMount {
            path: from.to_string(),
        })?;
        let (to_idx, to_rel) = self.resolve(to).ok_or_else(|| VfsError::NoSuchMount {
            path: to.to_string(),
        })?;

        if self.mounts[to_idx].driver.exists(&to_rel) {
            return Err(VfsError::AlreadyExists {
                path: path::normalize(to),
            });
        }

        if from_idx == to_idx {
            return self.mounts[from_idx].driver.rename(&from_rel, &to_rel);
        }

        self.stream_copy(from_idx, &from_rel, to_idx, &to_rel)?;
        if let Err(e) = self.mounts[from_idx].driver.delete(&from_rel) {
            warn!(from, error = %e, "cross-mount move copied but source delete failed");
            return Err(e);
        }
        Ok(())
    }

    /// Copy an entry, falling back to a stream copy across drivers.
    pub fn copy(&self, from: &str, to: &str, cred: &Credentials) -> Result<()> {
        self.check_traversal(from, cred)?;
        self.check_access(from, cred, AccessClass::Read)?;
        self.check_create(to, cred)?;

        let (from_idx, from_rel) = self.resolve(from).ok_or_else(|| VfsError::NoSuchMount {
            path: from.to_string(),
        })?;
        let (to_idx, to_rel) = self.resolve(to).ok_or_else(|| VfsError::NoSuchMount {
            path: to.to_string(),
        })?;

        if self.mounts[to_idx].driver.exists(&to_rel) {
            return Err(VfsError::AlreadyExists {
                path: path::normalize(to),
            });
        }

        if from_idx == to_idx {
            return self.mounts[from_idx].driver.copy(&from_rel, &to_rel);
        }
        self.stream_copy(from_idx, &from_rel, to_idx, &to_rel)
    }

    pub fn size(&self, virtual_path: &str, cred: &Credentials) -> Result<u64> {
        self.check_traversal(virtual_path, cred)?;
        let (driver, rel) = self.driver_for(virtual_path)?;
        driver.size(&rel)
    }

    pub fn capacity(&self, virtual_path: &str, cred: &Credentials) -> Result<u64> {
        self.check_traversal(virtual_path, cred)?;
        let (driver, _) = self.driver_for(virtual_path)?;
        Ok(driver.capacity())
    }

    pub fn free_space(&self, virtual_path: &str, cred: &Credentials) -> Result<u64> {
        self.check_traversal(virtual_path, cred)?;
        let (driver, _) = self.driver_for(virtual_path)?;
        Ok(driver.free_space())
    }

    pub fn metadata(&self, virtual_path: &str, cred: &Credentials) -> Result<FileMetadata> {
        self.check_traversal(virtual_path, cred)?;
        self.metadata_unchecked(virtual_path)
    }

    /// Apply a metadata patch.  Owner or root may patch; ownership changes
    /// are root-only.
    pub fn set_metadata(
        &self,
        virtual_path: &str,
        patch: &MetadataPatch,
        cred: &Credentials,
    ) -> Result<()> {
        self.check_traversal(virtual_path, cred)?;
        let meta = self.metadata_unchecked(virtual_path)?;
        if !cred.is_superuser() {
            if patch.changes_ownership() {
                return Err(VfsError::NoPermission {
                    path: path::normalize(virtual_path),
                });
            }
            if cred.uid != meta.owner {
                return Err(VfsError::NoPermission {
                    path: path::normalize(virtual_path),
                });
            }
        }
        let (driver, rel) = self.driver_for(virtual_path)?;
        driver.set_metadata(&rel, patch)
    }

    pub fn chmod(&self, virtual_path: &str, mode: u32, cred: &Credentials) -> Result<()> {
        self.set_metadata(virtual_path, &MetadataPatch::mode(mode), cred)
    }

    /// Change ownership.  `None` leaves the corresponding side untouched.
    pub fn chown(
        &self,
        virtual_path: &str,
        owner: Option<u32>,
        group: Option<u32>,
        cred: &Credentials,
    ) -> Result<()> {
        self.set_metadata(virtual_path, &MetadataPatch::ownership(owner, group), cred)
    }

    /// Copy file content between two mounts through the stream interface.
    fn stream_copy(
        &self,
        from_idx: usize,
        from_rel: &str,
        to_idx: usize,
        to_rel: &str,
    ) -> Result<()> {
        let from_driver = &*self.mounts[from_idx].driver;
        let to_driver = &*self.mounts[to_idx].driver;

        let mut source = from_driver.open(from_rel, OpenMode::Read)?;
        let mut dest = match to_driver.open(to_rel, OpenMode::Write) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = source.close();
                return Err(e);
            }
        };

        let result = (|| {
            if let Some(content) = source.read_all()? {
                dest.write(&content)?;
            }
            Ok(())
        })();

        let _ = source.close();
        let _ = dest.close();

        if result.is_err() {
            let _ = to_driver.delete(to_rel);
        }
        result
    }
}

impl Default for VfsManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemFsDriver;

    fn manager() -> VfsManager {
        let mut vfs = VfsManager::new();
        vfs.mount("/", Box::new(MemFsDriver::new(1 << 20)));
        vfs
    }

    fn root() -> Credentials {
        Credentials::root()
    }

    #[test]
    fn longest_prefix_mount_wins() {
        let mut vfs = manager();
        let rom = MemFsDriver::new(1 << 20);
        rom.seed_file("/boot.cfg", "rom image");
        rom.freeze();
        vfs.mount("/rom", Box::new(rom));

        assert!(vfs.exists("/rom/boot.cfg", &root()));
        assert!(!vfs.exists("/boot.cfg", &root()));

        let mut stream = vfs
            .open("/rom/boot.cfg", OpenMode::Read, &root())
            .expect("open rom file");
        assert_eq!(stream.read_all().expect("read").as_deref(), Some("rom image"));
    }

    #[test]
    fn write_to_read_only_mount_fails() {
        let mut vfs = manager();
        let rom = MemFsDriver::new(1 << 20);
        rom.freeze();
        vfs.mount("/rom", Box::new(rom));

        assert!(matches!(
            vfs.open("/rom/new", OpenMode::Write, &root()),
            Err(VfsError::ReadOnlyFilesystem { .. })
        ));
    }

    #[test]
    fn chmod_0600_denies_other_write_but_not_root() {
        let vfs = manager();
        vfs.open("/secret", OpenMode::Write, &root())
            .expect("create")
            .close()
            .expect("close");
        vfs.chown("/secret", Some(1000), Some(100), &root())
            .expect("chown");
        vfs.chmod("/secret", 0o600, &Credentials::user(1000, 100))
            .expect("chmod by owner");

        let stranger = Credentials::user(2000, 200);
        assert!(matches!(
            vfs.open("/secret", OpenMode::Write, &stranger),
            Err(VfsError::NoPermission { .. })
        ));
        assert!(matches!(
            vfs.open("/secret", OpenMode::Read, &stranger),
            Err(VfsError::NoPermission { .. })
        ));

        assert!(vfs.open("/secret", OpenMode::Write, &root()).is_ok());
        assert!(
            vfs.open("/secret", OpenMode::Read, &Credentials::user(1000, 100))
                .is_ok()
        );
    }

    #[test]
    fn chmod_requires_ownership() {
        let vfs = manager();
        vfs.open("/f", OpenMode::Write, &root())
            .expect("create")
            .close()
            .expect("close");

        assert!(matches!(
            vfs.chmod("/f", 0o777, &Credentials::user(1000, 100)),
            Err(VfsError::NoPermission { .. })
        ));
    }

    #[test]
    fn chown_is_root_only() {
        let vfs = manager();
        vfs.open("/f", OpenMode::Write, &root())
            .expect("create")
            .close()
            .expect("close");
        vfs.chown("/f", Some(1000), None, &root()).expect("chown");

        // Even the new owner cannot give the file away.
        assert!(matches!(
            vfs.chown("/f", Some(2000), None, &Credentials::user(1000, 100)),
            Err(VfsError::NoPermission { .. })
        ));
    }

    #[test]
    fn traversal_requires_execute_on_ancestors() {
        let vfs = manager();
        vfs.mkdir("/locked", &root()).expect("mkdir");
        vfs.open("/locked/file", OpenMode::Write, &root())
            .expect("create")
            .close()
            .expect("close");
        vfs.chmod("/locked", 0o600, &root()).expect("chmod dir");

        let user = Credentials::user(1000, 100);
        assert!(matches!(
            vfs.open("/locked/file", OpenMode::Read, &user),
            Err(VfsError::NoPermission { .. })
        ));
        assert!(!vfs.exists("/locked/file", &user));
        // Root traverses regardless.
        assert!(vfs.exists("/locked/file", &root()));
    }

    #[test]
    fn sticky_directory_protects_entries() {
        let vfs = manager();
        vfs.mkdir("/shared", &root()).expect("mkdir");
        vfs.chmod("/shared", 0o1777, &root()).expect("chmod");
        vfs.open("/shared/mine", OpenMode::Write, &Credentials::user(1000, 100))
            .expect("create")
            .close()
            .expect("close");
        vfs.chown("/shared/mine", Some(1000), Some(100), &root())
            .expect("chown");

        assert!(matches!(
            vfs.delete("/shared/mine", &Credentials::user(2000, 200)),
            Err(VfsError::NoPermission { .. })
        ));
        assert!(
            vfs.delete("/shared/mine", &Credentials::user(1000, 100))
                .is_ok()
        );
    }

    #[test]
    fn cross_mount_copy_streams_content() {
        let mut vfs = manager();
        let scratch = MemFsDriver::new(1 << 20);
        vfs.mount("/scratch", Box::new(scratch));

        let mut s = vfs
            .open("/origin.txt", OpenMode::Write, &root())
            .expect("create");
        s.write("payload").expect("write");
        s.close().expect("close");

        vfs.copy("/origin.txt", "/scratch/copy.txt", &root())
            .expect("copy");
        let mut stream = vfs
            .open("/scratch/copy.txt", OpenMode::Read, &root())
            .expect("open copy");
        assert_eq!(stream.read_all().expect("read").as_deref(), Some("payload"));
    }

    #[test]
    fn rename_rejects_existing_destination() {
        let vfs = manager();
        for name in ["/a", "/b"] {
            vfs.open(name, OpenMode::Write, &root())
                .expect("create")
                .close()
                .expect("close");
        }
        assert!(matches!(
            vfs.rename("/a", "/b", &root()),
            Err(VfsError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn execute_mode_requires_execute_bit() {
        let vfs = manager();
        vfs.open("/prog", OpenMode::Write, &root())
            .expect("create")
            .close()
            .expect("close");
        vfs.chmod("/prog", 0o644, &root()).expect("chmod");

        let user = Credentials::user(1000, 100);
        assert!(matches!(
            vfs.open("/prog", OpenMode::Execute, &user),
            Err(VfsError::NoPermission { .. })
        ));

        vfs.chmod("/prog", 0o755, &root()).expect("chmod +x");
        assert!(vfs.open("/prog", OpenMode::Execute, &user).is_ok());
    }
}
