//! Sidecar metadata store for the disk-backed driver.
//!
//! The host filesystem has no notion of FerriteOS ownership or modes, so
//! every directory carries a hidden `.fs_meta` JSON file mapping child names
//! to [`FileMetadata`] records.  On mount the store is reconciled against
//! the physical tree: entries are generated for files that appeared behind
//! the driver's back, and orphaned entries are dropped.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, VfsError};
use crate::metadata::{FileMetadata, MetadataPatch};

pub(crate) const META_FILE: &str = ".fs_meta";
const META_MAGIC: &str = "FEFS";
const META_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MetaSidecar {
    magic: String,
    version: u32,
    entries: BTreeMap<String, FileMetadata>,
}

impl MetaSidecar {
    fn empty() -> Self {
        Self {
            magic: META_MAGIC.to_string(),
            version: META_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Per-directory metadata store rooted at a host directory.
#[derive(Clone)]
pub(crate) struct MetaStore {
    root: PathBuf,
}

impl MetaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn physical(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Split a relative path into its directory part and final name.
    fn split(rel: &str) -> (String, String) {
        match rel.rfind('/') {
            Some(idx) => (rel[..idx].to_string(), rel[idx + 1..].to_string()),
            None => (String::new(), rel.to_string()),
        }
    }

    fn sidecar_path(&self, dir_rel: &str) -> PathBuf {
        self.physical(dir_rel).join(META_FILE)
    }

    fn load_dir(&self, dir_rel: &str) -> MetaSidecar {
        let path = self.sidecar_path(dir_rel);
        let Ok(raw) = fs::read_to_string(&path) else {
            return MetaSidecar::empty();
        };
        match serde_json::from_str::<MetaSidecar>(&raw) {
            Ok(sidecar) if sidecar.magic == META_MAGIC && sidecar.version == META_VERSION => {
                sidecar
            }
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "discarding unreadable metadata sidecar");
                MetaSidecar::empty()
            }
        }
    }

    fn save_dir(&self, dir_rel: &str, sidecar: &MetaSidecar) -> Result<()> {
        let raw = serde_json::to_string(sidecar)
            .map_err(|e| VfsError::Internal(format!("serialize sidecar: {e}")))?;
        fs::write(self.sidecar_path(dir_rel), raw)?;
        Ok(())
    }

    /// Look up metadata, generating and persisting a default record if the
    /// entry exists physically but has none yet.
    pub fn get(&self, rel: &str) -> Result<FileMetadata> {
        let physical = self.physical(rel);
        if rel.is_empty() {
            // The mount root itself.
            return Ok(self.default_for(&physical));
        }
        let (dir, name) = Self::split(rel);
        let mut sidecar = self.load_dir(&dir);
        if let Some(meta) = sidecar.entries.get(&name) {
            return Ok(meta.clone());
        }
        if !physical.exists() {
            return Err(VfsError::PathNotFound {
                path: format!("/{rel}"),
            });
        }
        let meta = self.default_for(&physical);
        debug!(path = rel, "generated missing metadata entry");
        sidecar.entries.insert(name, meta.clone());
        self.save_dir(&dir, &sidecar)?;
        Ok(meta)
    }

    pub fn put(&self, rel: &str, meta: FileMetadata) -> Result<()> {
        let (dir, name) = Self::split(rel);
        let mut sidecar = self.load_dir(&dir);
        sidecar.entries.insert(name, meta);
        self.save_dir(&dir, &sidecar)
    }

    pub fn patch(&self, rel: &str, patch: &MetadataPatch) -> Result<()> {
        let mut meta = self.get(rel)?;
        meta.apply(patch);
        self.put(rel, meta)
    }

    pub fn remove(&self, rel: &str) -> Result<()> {
        let (dir, name) = Self::split(rel);
        let mut sidecar = self.load_dir(&dir);
        if sidecar.entries.remove(&name).is_some() {
            self.save_dir(&dir, &sidecar)?;
        }
        Ok(())
    }

    /// Move the entry for `from` to `to`.  Sidecars inside a moved directory
    /// travel with it physically, so only the parent entries need fixing.
    pub fn move_entry(&self, from: &str, to: &str) -> Result<()> {
        if let Ok(meta) = self.get_existing(from) {
            self.remove(from)?;
            self.put(to, meta)?;
        }
        Ok(())
    }

    pub fn copy_entry(&self, from: &str, to: &str) -> Result<()> {
        if let Ok(meta) = self.get_existing(from) {
            self.put(to, meta)?;
        }
        Ok(())
    }

    /// Record a write: update size and modification time.
    pub fn touch(&self, rel: &str, size: u64) -> Result<()> {
        let mut meta = self.get(rel)?;
        meta.size = size;
        meta.modified = Utc::now().timestamp_millis();
        self.put(rel, meta)
    }

    /// Like [`get`] but without generating defaults (used before the
    /// physical operation has happened).
    fn get_existing(&self, rel: &str) -> Result<FileMetadata> {
        let (dir, name) = Self::split(rel);
        self.load_dir(&dir)
            .entries
            .get(&name)
            .cloned()
            .ok_or_else(|| VfsError::PathNotFound {
                path: format!("/{rel}"),
            })
    }

    fn default_for(&self, physical: &Path) -> FileMetadata {
        let now = Utc::now().timestamp_millis();
        if physical.is_dir() {
            FileMetadata::new_directory(now)
        } else {
            let mut meta = FileMetadata::new_file(now);
            meta.size = fs::metadata(physical).map(|m| m.len()).unwrap_or(0);
            meta
        }
    }

    /// Walk the physical tree under `dir_rel`, generating missing metadata
    /// entries and dropping orphaned ones.
    pub fn reconcile(&self, dir_rel: &str) -> Result<()> {
        let physical_dir = self.physical(dir_rel);
        if !physical_dir.is_dir() {
            return Ok(());
        }

        let mut sidecar = self.load_dir(dir_rel);
        let mut dirty = false;
        let mut seen: Vec<String> = Vec::new();

        for entry in fs::read_dir(&physical_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == META_FILE {
                continue;
            }
            seen.push(name.clone());

            if !sidecar.entries.contains_key(&name) {
                let meta = self.default_for(&entry.path());
                debug!(dir = dir_rel, name = %name, "reconcile: generated metadata");
                sidecar.entries.insert(name.clone(), meta);
                dirty = true;
            }

            if entry.path().is_dir() {
                let child_rel = if dir_rel.is_empty() {
                    name
                } else {
                    format!("{dir_rel}/{name}")
                };
                self.reconcile(&child_rel)?;
            }
        }

        let orphans: Vec<String> = sidecar
            .entries
            .keys()
            .filter(|k| !seen.contains(k))
            .cloned()
            .collect();
        for orphan in orphans {
            debug!(dir = dir_rel, name = %orphan, "reconcile: dropped orphaned metadata");
            sidecar.entries.remove(&orphan);
            dirty = true;
        }

        if dirty {
            self.save_dir(dir_rel, &sidecar)?;
        }
        Ok(())
    }
}
