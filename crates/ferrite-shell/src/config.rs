//! Boot configuration.
//!
//! Loaded from an optional TOML file (`ferrite.toml` by default); CLI flags
//! take precedence over file values.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Deserialized `ferrite.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    /// Host directory backing the root filesystem.
    pub root: Option<PathBuf>,
    /// Tracing filter (e.g. `info`, `ferrite_kernel=debug`).
    pub log_filter: Option<String>,
    /// Log destination; stderr if absent.
    pub log_file: Option<PathBuf>,
    /// Program spawned at boot.
    pub init_program: Option<String>,
    /// Scheduler burst quantum override, milliseconds.
    pub quantum_ms: Option<i64>,
    /// Root filesystem capacity in bytes.
    pub fs_capacity: Option<u64>,
}

impl ShellConfig {
    /// Load from `path`, or from `ferrite.toml` when no path is given.  A
    /// missing default file is not an error; a missing explicit one is.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from("ferrite.toml"), false),
        };
        if !path.exists() {
            if required {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}
