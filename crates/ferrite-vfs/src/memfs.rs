//! In-memory filesystem driver.
//!
//! Backs `/rom`-style images and tests.  The tree lives entirely on the
//! heap; metadata sits on the nodes.  A writable instance can be populated
//! and then [`MemFsDriver::freeze`]-d into a read-only image.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::Utc;

use crate::driver::{FsDriver, OpenMode};
use crate::error::{Result, VfsError};
use crate::metadata::{FileMetadata, MetadataPatch};
use crate::stream::{FileStream, SeekWhence};

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

struct FileNode {
    meta: RefCell<FileMetadata>,
    content: RefCell<String>,
}

struct DirNode {
    meta: RefCell<FileMetadata>,
    children: RefCell<BTreeMap<String, Node>>,
}

#[derive(Clone)]
enum Node {
    File(Rc<FileNode>),
    Dir(Rc<DirNode>),
}

impl Node {
    fn meta(&self) -> FileMetadata {
        match self {
            Node::File(f) => f.meta.borrow().clone(),
            Node::Dir(d) => d.meta.borrow().clone(),
        }
    }

    fn patch_meta(&self, patch: &MetadataPatch) {
        match self {
            Node::File(f) => f.meta.borrow_mut().apply(patch),
            Node::Dir(d) => d.meta.borrow_mut().apply(patch),
        }
    }
}

/// Heap-backed filesystem tree.
pub struct MemFsDriver {
    root: Rc<DirNode>,
    read_only: RefCell<bool>,
    capacity: u64,
}

impl MemFsDriver {
    /// An empty, writable filesystem with the given capacity in bytes.
    pub fn new(capacity: u64) -> Self {
        let now = now_millis();
        Self {
            root: Rc::new(DirNode {
                meta: RefCell::new(FileMetadata::new_directory(now)),
                children: RefCell::new(BTreeMap::new()),
            }),
            read_only: RefCell::new(false),
            capacity,
        }
    }

    /// Turn the filesystem read-only.  Used after seeding a ROM image.
    pub fn freeze(&self) {
        *self.read_only.borrow_mut() = true;
    }

    /// Seed a file, creating parent directories as needed.  Panics if the
    /// filesystem has been frozen; seeding happens before mount.
    pub fn seed_file(&self, path: &str, content: &str) {
        assert!(!*self.read_only.borrow(), "cannot seed a frozen filesystem");
        let parent = crate::path::parent(path).unwrap_or_else(|| "/".to_string());
        self.mkdir_inner(&parent).expect("seed parent");
        let (dir, name) = self.parent_of(path).expect("seed path");
        let now = now_millis();
        let mut meta = FileMetadata::new_file(now);
        meta.size = content.len() as u64;
        dir.children.borrow_mut().insert(
            name,
            Node::File(Rc::new(FileNode {
                meta: RefCell::new(meta),
                content: RefCell::new(content.to_string()),
            })),
        );
    }

    fn lookup(&self, path: &str) -> Option<Node> {
        let normalized = crate::path::normalize(path);
        let mut current = Node::Dir(Rc::clone(&self.root));
        if normalized == "/" {
            return Some(current);
        }
        for part in normalized[1..].split('/') {
            let next = match &current {
                Node::Dir(dir) => dir.children.borrow().get(part).cloned(),
                Node::File(_) => None,
            };
            current = next?;
        }
        Some(current)
    }

    /// Resolve the parent directory node and final component name.
    fn parent_of(&self, path: &str) -> Result<(Rc<DirNode>, String)> {
        let parent = crate::path::parent(path).ok_or_else(|| VfsError::InvalidArgument {
            reason: "operation on filesystem root".to_string(),
        })?;
        let name = crate::path::file_name(path).ok_or_else(|| VfsError::InvalidArgument {
            reason: "operation on filesystem root".to_string(),
        })?;
        match self.lookup(&parent) {
            Some(Node::Dir(dir)) => Ok((dir, name)),
            Some(Node::File(_)) => Err(VfsError::NotADirectory { path: parent }),
            None => Err(VfsError::PathNotFound { path: parent }),
        }
    }

    fn check_writable(&self, path: &str) -> Result<()> {
        if *self.read_only.borrow() {
            return Err(VfsError::ReadOnlyFilesystem {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    fn mkdir_inner(&self, path: &str) -> Result<()> {
        let normalized = crate::path::normalize(path);
        if normalized == "/" {
            return Ok(());
        }
        let mut current = Rc::clone(&self.root);
        for part in normalized[1..].split('/') {
            let existing = current.children.borrow().get(part).cloned();
            current = match existing {
                Some(Node::Dir(dir)) => dir,
                Some(Node::File(_)) => {
                    return Err(VfsError::NotADirectory {
                        path: normalized.clone(),
                    });
                }
                None => {
                    let dir = Rc::new(DirNode {
                        meta: RefCell::new(FileMetadata::new_directory(now_millis())),
                        children: RefCell::new(BTreeMap::new()),
                    });
                    current
                        .children
                        .borrow_mut()
                        .insert(part.to_string(), Node::Dir(Rc::clone(&dir)));
                    dir
                }
            };
        }
        Ok(())
    }

    fn used_space(node: &Node) -> u64 {
        match node {
            Node::File(f) => f.meta.borrow().size,
            Node::Dir(d) => d
                .children
                .borrow()
                .values()
                .map(Self::used_space)
                .sum(),
        }
    }

    fn deep_clone(node: &Node) -> Node {
        match node {
            Node::File(f) => Node::File(Rc::new(FileNode {
                meta: RefCell::new(f.meta.borrow().clone()),
                content: RefCell::new(f.content.borrow().clone()),
            })),
            Node::Dir(d) => Node::Dir(Rc::new(DirNode {
                meta: RefCell::new(d.meta.borrow().clone()),
                children: RefCell::new(
                    d.children
                        .borrow()
                        .iter()
                        .map(|(k, v)| (k.clone(), Self::deep_clone(v)))
                        .collect(),
                ),
            })),
        }
    }
}

impl FsDriver for MemFsDriver {
    fn id(&self) -> &str {
        "memfs"
    }

    fn read_only(&self) -> bool {
        *self.read_only.borrow()
    }

    fn exists(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn FileStream>> {
        if mode.writable() {
            self.check_writable(path)?;
        }

        let file = match self.lookup(path) {
            Some(Node::File(file)) => {
                if mode == OpenMode::Write {
                    file.content.borrow_mut().clear();
                    let mut meta = file.meta.borrow_mut();
                    meta.size = 0;
                    meta.modified = now_millis();
                }
                file
            }
            Some(Node::Dir(_)) => {
                return Err(VfsError::IsADirectory {
                    path: path.to_string(),
                });
            }
            None if mode.writable() => {
                let (dir, name) = self.parent_of(path)?;
                let file = Rc::new(FileNode {
                    meta: RefCell::new(FileMetadata::new_file(now_millis())),
                    content: RefCell::new(String::new()),
                });
                dir.children
                    .borrow_mut()
                    .insert(name, Node::File(Rc::clone(&file)));
                file
            }
            None => {
                return Err(VfsError::PathNotFound {
                    path: path.to_string(),
                });
            }
        };

        let pos = if mode == OpenMode::Append {
            file.content.borrow().chars().count()
        } else {
            0
        };
        Ok(Box::new(MemFsStream {
            file,
            pos,
            mode,
            closed: false,
        }))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        match self.lookup(path) {
            Some(Node::Dir(dir)) => Ok(dir.children.borrow().keys().cloned().collect()),
            Some(Node::File(_)) => Err(VfsError::NotADirectory {
                path: path.to_string(),
            }),
            None => Err(VfsError::PathNotFound {
                path: path.to_string(),
            }),
        }
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        self.check_writable(path)?;
        self.mkdir_inner(path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.check_writable(path)?;
        let (dir, name) = self.parent_of(path)?;
        if dir.children.borrow_mut().remove(&name).is_none() {
            return Err(VfsError::PathNotFound {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check_writable(from)?;
        if self.exists(to) {
            return Err(VfsError::AlreadyExists {
                path: to.to_string(),
            });
        }
        let (to_dir, to_name) = self.parent_of(to)?;
        let (from_dir, from_name) = self.parent_of(from)?;
        let node = from_dir
            .children
            .borrow_mut()
            .remove(&from_name)
            .ok_or_else(|| VfsError::PathNotFound {
                path: from.to_string(),
            })?;
        to_dir.children.borrow_mut().insert(to_name, node);
        Ok(())
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.check_writable(to)?;
        if self.exists(to) {
            return Err(VfsError::AlreadyExists {
                path: to.to_string(),
            });
        }
        let source = self.lookup(from).ok_or_else(|| VfsError::PathNotFound {
            path: from.to_string(),
        })?;
        let (to_dir, to_name) = self.parent_of(to)?;
        to_dir
            .children
            .borrow_mut()
            .insert(to_name, Self::deep_clone(&source));
        Ok(())
    }

    fn metadata(&self, path: &str) -> Result<FileMetadata> {
        self.lookup(path)
            .map(|n| n.meta())
            .ok_or_else(|| VfsError::PathNotFound {
                path: path.to_string(),
            })
    }

    fn set_metadata(&self, path: &str, patch: &MetadataPatch) -> Result<()> {
        self.check_writable(path)?;
        let node = self.lookup(path).ok_or_else(|| VfsError::PathNotFound {
            path: path.to_string(),
        })?;
        node.patch_meta(patch);
        Ok(())
    }

    fn size(&self, path: &str) -> Result<u64> {
        self.metadata(path).map(|m| m.size)
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn free_space(&self) -> u64 {
        self.capacity
            .saturating_sub(Self::used_space(&Node::Dir(Rc::clone(&self.root))))
    }
}

struct MemFsStream {
    file: Rc<FileNode>,
    /// Cursor in characters.
    pos: usize,
    mode: OpenMode,
    closed: bool,
}

impl MemFsStream {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(VfsError::InvalidArgument {
                reason: "stream is closed".to_string(),
            });
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.mode.readable() {
            return Err(VfsError::InvalidArgument {
                reason: "stream not opened for reading".to_string(),
            });
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.mode.writable() {
            return Err(VfsError::InvalidArgument {
                reason: "stream not opened for writing".to_string(),
            });
        }
        Ok(())
    }

    fn write_at_cursor(&mut self, data: &str) {
        let mut content = self.file.content.borrow_mut();
        let char_len = content.chars().count();
        let keep_prefix: String = content.chars().take(self.pos).collect();
        let skip = self.pos + data.chars().count();
        let keep_suffix: String = if skip < char_len {
            content.chars().skip(skip).collect()
        } else {
            String::new()
        };
        *content = format!("{keep_prefix}{data}{keep_suffix}");
        self.pos += data.chars().count();

        let mut meta = self.file.meta.borrow_mut();
        meta.size = content.len() as u64;
        meta.modified = now_millis();
    }
}

impl FileStream for MemFsStream {
    fn read(&mut self, count: usize) -> Result<Option<String>> {
        self.ensure_readable()?;
        let content = self.file.content.borrow();
        let chunk: String = content.chars().skip(self.pos).take(count).collect();
        if chunk.is_empty() {
            return Ok(None);
        }
        self.pos += chunk.chars().count();
        Ok(Some(chunk))
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        self.ensure_readable()?;
        let content = self.file.content.borrow();
        let rest: String = content.chars().skip(self.pos).collect();
        if rest.is_empty() {
            return Ok(None);
        }
        match rest.find('\n') {
            Some(idx) => {
                let line = rest[..idx].to_string();
                self.pos += line.chars().count() + 1;
                Ok(Some(line))
            }
            None => {
                self.pos += rest.chars().count();
                Ok(Some(rest))
            }
        }
    }

    fn read_all(&mut self) -> Result<Option<String>> {
        self.ensure_readable()?;
        let content = self.file.content.borrow();
        let rest: String = content.chars().skip(self.pos).collect();
        if rest.is_empty() {
            return Ok(None);
        }
        self.pos += rest.chars().count();
        Ok(Some(rest))
    }

    fn write(&mut self, data: &str) -> Result<()> {
        self.ensure_writable()?;
        self.write_at_cursor(data);
        Ok(())
    }

    fn write_line(&mut self, data: &str) -> Result<()> {
        self.ensure_writable()?;
        self.write_at_cursor(&format!("{data}\n"));
        Ok(())
    }

    fn seek(&mut self, whence: SeekWhence, offset: i64) -> Result<u64> {
        self.ensure_open()?;
        let len = self.file.content.borrow().chars().count() as i64;
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => self.pos as i64,
            SeekWhence::End => len,
        };
        let target = (base + offset).clamp(0, len);
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let fs = MemFsDriver::new(1 << 20);
        {
            let mut stream = fs.open("/hello.txt", OpenMode::Write).expect("open w");
            stream.write_line("first").expect("write");
            stream.write_line("second").expect("write");
            stream.close().expect("close");
        }

        let mut stream = fs.open("/hello.txt", OpenMode::Read).expect("open r");
        assert_eq!(stream.read_line().expect("line").as_deref(), Some("first"));
        assert_eq!(stream.read_line().expect("line").as_deref(), Some("second"));
        assert_eq!(stream.read_line().expect("line"), None);
    }

    #[test]
    fn write_mode_truncates_append_extends() {
        let fs = MemFsDriver::new(1 << 20);
        fs.seed_file("/f", "0123456789");

        {
            let mut s = fs.open("/f", OpenMode::Append).expect("open a");
            s.write("ab").expect("write");
            s.close().expect("close");
        }
        assert_eq!(fs.size("/f").expect("size"), 12);

        {
            let mut s = fs.open("/f", OpenMode::Write).expect("open w");
            s.write("xy").expect("write");
            s.close().expect("close");
        }
        assert_eq!(fs.size("/f").expect("size"), 2);
    }

    #[test]
    fn mkdir_creates_intermediate_directories() {
        let fs = MemFsDriver::new(1 << 20);
        fs.mkdir("/a/b/c").expect("mkdir");
        assert!(fs.exists("/a/b/c"));
        assert!(fs.metadata("/a/b").expect("meta").is_directory);
    }

    #[test]
    fn rename_and_copy() {
        let fs = MemFsDriver::new(1 << 20);
        fs.seed_file("/one", "data");

        fs.rename("/one", "/two").expect("rename");
        assert!(!fs.exists("/one"));
        assert!(fs.exists("/two"));

        fs.copy("/two", "/three").expect("copy");
        assert!(fs.exists("/two"));
        assert_eq!(fs.size("/three").expect("size"), 4);

        assert!(matches!(
            fs.copy("/two", "/three"),
            Err(VfsError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn frozen_filesystem_rejects_writes() {
        let fs = MemFsDriver::new(1 << 20);
        fs.seed_file("/rom.bin", "image");
        fs.freeze();

        assert!(matches!(
            fs.open("/new", OpenMode::Write),
            Err(VfsError::ReadOnlyFilesystem { .. })
        ));
        assert!(matches!(
            fs.delete("/rom.bin"),
            Err(VfsError::ReadOnlyFilesystem { .. })
        ));
        assert!(fs.open("/rom.bin", OpenMode::Read).is_ok());
    }

    #[test]
    fn free_space_tracks_usage() {
        let fs = MemFsDriver::new(100);
        fs.seed_file("/f", "0123456789");
        assert_eq!(fs.free_space(), 90);
    }
}
