//! Disk-backed filesystem driver.
//!
//! Persists the mounted subtree under a host directory via `std::fs`.
//! FerriteOS metadata (ownership, modes, timestamps) lives in per-directory
//! sidecar files managed by [`meta::MetaStore`] and reconciled against the
//! physical tree on mount.

mod meta;

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::driver::{FsDriver, OpenMode};
use crate::error::{Result, VfsError};
use crate::metadata::{FileMetadata, MetadataPatch};
use crate::stream::{FileStream, SeekWhence};
use meta::{META_FILE, MetaStore};

/// Driver persisting to a host directory.
pub struct DiskFsDriver {
    root: PathBuf,
    store: MetaStore,
    capacity: u64,
}

impl DiskFsDriver {
    /// Mount (and create if needed) a host directory as a FerriteOS
    /// filesystem, reconciling sidecar metadata with the physical tree.
    pub fn mount(root: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = MetaStore::new(&root);
        store.reconcile("")?;
        info!(root = %root.display(), "disk filesystem mounted");
        Ok(Self {
            root,
            store,
            capacity,
        })
    }

    fn physical(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn used_space(dir: &Path) -> u64 {
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        let mut total = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total += Self::used_space(&path);
            } else if path.file_name().is_some_and(|n| n != META_FILE) {
                total += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            }
        }
        total
    }

    fn copy_tree(from: &Path, to: &Path) -> Result<()> {
        if from.is_dir() {
            fs::create_dir_all(to)?;
            for entry in fs::read_dir(from)? {
                let entry = entry?;
                Self::copy_tree(&entry.path(), &to.join(entry.file_name()))?;
            }
        } else {
            fs::copy(from, to)?;
        }
        Ok(())
    }
}

impl FsDriver for DiskFsDriver {
    fn id(&self) -> &str {
        "diskfs"
    }

    fn read_only(&self) -> bool {
        false
    }

    fn exists(&self, path: &str) -> bool {
        self.physical(path).exists()
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn FileStream>> {
        let physical = self.physical(path);
        if physical.is_dir() {
            return Err(VfsError::IsADirectory {
                path: path.to_string(),
            });
        }

        let inner = match mode {
            OpenMode::Read | OpenMode::Execute => {
                let file = fs::File::open(&physical).map_err(|_| VfsError::PathNotFound {
                    path: path.to_string(),
                })?;
                StreamInner::Reader(BufReader::new(file))
            }
            OpenMode::Write => {
                let created = !physical.exists();
                let file = fs::File::create(&physical)?;
                if created {
                    self.store
                        .put(path, FileMetadata::new_file(now_millis()))?;
                }
                StreamInner::Writer(BufWriter::new(file))
            }
            OpenMode::Append => {
                let created = !physical.exists();
                let file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&physical)?;
                if created {
                    self.store
                        .put(path, FileMetadata::new_file(now_millis()))?;
                }
                StreamInner::Writer(BufWriter::new(file))
            }
        };

        Ok(Box::new(DiskFsStream {
            inner: Some(inner),
            rel: path.to_string(),
            physical,
            store: self.store.clone(),
            mode,
        }))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let physical = self.physical(path);
        if !physical.exists() {
            return Err(VfsError::PathNotFound {
                path: path.to_string(),
            });
        }
        if !physical.is_dir() {
            return Err(VfsError::NotADirectory {
                path: path.to_string(),
            });
        }
        let mut names: Vec<String> = fs::read_dir(&physical)?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n != META_FILE)
            .collect();
        names.sort();
        Ok(names)
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.physical(path))?;
        // Materialize metadata for each newly visible level.
        let mut rel = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !rel.is_empty() {
                rel.push('/');
            }
            rel.push_str(part);
            self.store.get(&rel)?;
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let physical = self.physical(path);
        if !physical.exists() {
            return Err(VfsError::PathNotFound {
                path: path.to_string(),
            });
        }
        if physical.is_dir() {
            fs::remove_dir_all(&physical)?;
        } else {
            fs::remove_file(&physical)?;
        }
        self.store.remove(path)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        if self.exists(to) {
            return Err(VfsError::AlreadyExists {
                path: to.to_string(),
            });
        }
        fs::rename(self.physical(from), self.physical(to))?;
        self.store.move_entry(from, to)
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        if self.exists(to) {
            return Err(VfsError::AlreadyExists {
                path: to.to_string(),
            });
        }
        let src = self.physical(from);
        if !src.exists() {
            return Err(VfsError::PathNotFound {
                path: from.to_string(),
            });
        }
        Self::copy_tree(&src, &self.physical(to))?;
        self.store.copy_entry(from, to)
    }

    fn metadata(&self, path: &str) -> Result<FileMetadata> {
        if !self.exists(path) {
            return Err(VfsError::PathNotFound {
                path: path.to_string(),
            });
        }
        self.store.get(path)
    }

    fn set_metadata(&self, path: &str, patch: &MetadataPatch) -> Result<()> {
        if !self.exists(path) {
            return Err(VfsError::PathNotFound {
                path: path.to_string(),
            });
        }
        self.store.patch(path, patch)
    }

    fn size(&self, path: &str) -> Result<u64> {
        let physical = self.physical(path);
        if !physical.exists() {
            return Err(VfsError::PathNotFound {
                path: path.to_string(),
            });
        }
        if physical.is_dir() {
            return Ok(0);
        }
        Ok(fs::metadata(&physical)?.len())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn free_space(&self) -> u64 {
        self.capacity.saturating_sub(Self::used_space(&self.root))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

enum StreamInner {
    Reader(BufReader<fs::File>),
    Writer(BufWriter<fs::File>),
}

struct DiskFsStream {
    /// `None` after close.
    inner: Option<StreamInner>,
    rel: String,
    physical: PathBuf,
    store: MetaStore,
    mode: OpenMode,
}

impl DiskFsStream {
    fn reader(&mut self) -> Result<&mut BufReader<fs::File>> {
        match self.inner.as_mut() {
            Some(StreamInner::Reader(r)) => Ok(r),
            Some(StreamInner::Writer(_)) => Err(VfsError::InvalidArgument {
                reason: "stream not opened for reading".to_string(),
            }),
            None => Err(closed()),
        }
    }

    fn writer(&mut self) -> Result<&mut BufWriter<fs::File>> {
        match self.inner.as_mut() {
            Some(StreamInner::Writer(w)) => Ok(w),
            Some(StreamInner::Reader(_)) => Err(VfsError::InvalidArgument {
                reason: "stream not opened for writing".to_string(),
            }),
            None => Err(closed()),
        }
    }
}

fn closed() -> VfsError {
    VfsError::InvalidArgument {
        reason: "stream is closed".to_string(),
    }
}

impl FileStream for DiskFsStream {
    fn read(&mut self, count: usize) -> Result<Option<String>> {
        let reader = self.reader()?;
        let mut buf = vec![0u8; count];
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let reader = self.reader()?;
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn read_all(&mut self) -> Result<Option<String>> {
        let reader = self.reader()?;
        let mut rest = String::new();
        let n = reader.read_to_string(&mut rest)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(rest))
    }

    fn write(&mut self, data: &str) -> Result<()> {
        self.writer()?.write_all(data.as_bytes())?;
        Ok(())
    }

    fn write_line(&mut self, data: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.write_all(data.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn seek(&mut self, whence: SeekWhence, offset: i64) -> Result<u64> {
        let from = match whence {
            SeekWhence::Set => SeekFrom::Start(offset.max(0) as u64),
            SeekWhence::Cur => SeekFrom::Current(offset),
            SeekWhence::End => SeekFrom::End(offset),
        };
        let pos = match self.inner.as_mut() {
            Some(StreamInner::Reader(r)) => r.seek(from)?,
            Some(StreamInner::Writer(w)) => w.seek(from)?,
            None => return Err(closed()),
        };
        Ok(pos)
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(StreamInner::Writer(w)) = self.inner.as_mut() {
            w.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(StreamInner::Writer(mut w)) => {
                w.flush()?;
                drop(w);
                let size = fs::metadata(&self.physical).map(|m| m.len()).unwrap_or(0);
                self.store.touch(&self.rel, size)?;
                Ok(())
            }
            Some(StreamInner::Reader(_)) => Ok(()),
            None => Err(closed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mount(dir: &TempDir) -> DiskFsDriver {
        DiskFsDriver::mount(dir.path().join("fsroot"), 1 << 30).expect("mount")
    }

    #[test]
    fn write_read_round_trip_on_disk() {
        let dir = TempDir::new().expect("tempdir");
        let fs = mount(&dir);

        let mut s = fs.open("notes.txt", OpenMode::Write).expect("open w");
        s.write_line("alpha").expect("write");
        s.write("beta").expect("write");
        s.close().expect("close");

        let mut s = fs.open("notes.txt", OpenMode::Read).expect("open r");
        assert_eq!(s.read_line().expect("l1").as_deref(), Some("alpha"));
        assert_eq!(s.read_all().expect("rest").as_deref(), Some("beta"));
    }

    #[test]
    fn list_hides_sidecar_files() {
        let dir = TempDir::new().expect("tempdir");
        let fs = mount(&dir);
        fs.open("a.txt", OpenMode::Write)
            .expect("open")
            .close()
            .expect("close");
        fs.metadata("a.txt").expect("meta");

        let names = fs.list("").expect("list");
        assert_eq!(names, vec!["a.txt"]);
    }

    #[test]
    fn chmod_survives_remount() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("fsroot");
        {
            let fs = DiskFsDriver::mount(&root, 1 << 30).expect("mount");
            fs.open("secret", OpenMode::Write)
                .expect("open")
                .close()
                .expect("close");
            fs.set_metadata("secret", &MetadataPatch::mode(0o600))
                .expect("chmod");
        }

        let fs = DiskFsDriver::mount(&root, 1 << 30).expect("remount");
        assert_eq!(fs.metadata("secret").expect("meta").mode, 0o600);
    }

    #[test]
    fn reconcile_generates_defaults_for_foreign_files() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("fsroot");
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::write(root.join("alien.txt"), "dropped in from outside").expect("write");

        let fs = DiskFsDriver::mount(&root, 1 << 30).expect("mount");
        let meta = fs.metadata("alien.txt").expect("meta");
        assert_eq!(meta.owner, 0);
        assert_eq!(meta.mode, crate::metadata::DEFAULT_FILE_MODE);
        assert_eq!(meta.size, 23);
    }

    #[test]
    fn rename_moves_metadata() {
        let dir = TempDir::new().expect("tempdir");
        let fs = mount(&dir);
        fs.open("old", OpenMode::Write)
            .expect("open")
            .close()
            .expect("close");
        fs.set_metadata("old", &MetadataPatch::mode(0o700))
            .expect("chmod");

        fs.rename("old", "new").expect("rename");
        assert!(!fs.exists("old"));
        assert_eq!(fs.metadata("new").expect("meta").mode, 0o700);
    }
}
