//! FerriteOS host shell.
//!
//! Boots the kernel against a disk-backed root filesystem and a read-only
//! ROM image, hands the terminal to the kernel's console, pumps host input
//! events, and runs the scheduler on the main thread until the terminate
//! signal.

mod config;
mod console;
mod input;
mod programs;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ferrite_kernel::{Kernel, SharedConsole, SystemClock};
use ferrite_vfs::{DiskFsDriver, MemFsDriver, VfsManager};

use config::ShellConfig;
use console::{CrosstermConsole, PlainConsole, RawModeGuard};
use programs::BuiltinLoader;

/// FerriteOS kernel emulator.
#[derive(Debug, Parser)]
#[command(name = "ferrite", version, about)]
struct Cli {
    /// Path to a TOML config file (default: ./ferrite.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host directory backing the root filesystem.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `ferrite_kernel=debug`.
    #[arg(long)]
    log_filter: Option<String>,

    /// Append logs to a file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Run without taking over the terminal; stdin lines become input.
    #[arg(long)]
    headless: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file_config = ShellConfig::load(cli.config.as_deref())?;

    let root = cli
        .root
        .or(file_config.root.clone())
        .unwrap_or_else(|| PathBuf::from("./fsroot"));
    let log_filter = cli.log_filter.or(file_config.log_filter.clone());
    let log_file = cli.log_file.or(file_config.log_file.clone());
    init_tracing(log_filter.as_deref(), log_file.as_deref())?;

    // Filesystems: disk-backed root, frozen ROM image with the program
    // table.
    let mut vfs = VfsManager::new();
    let capacity = file_config.fs_capacity.unwrap_or(64 << 20);
    let disk = DiskFsDriver::mount(&root, capacity)
        .with_context(|| format!("mounting root filesystem at {}", root.display()))?;
    vfs.mount("/", Box::new(disk));

    let rom = MemFsDriver::new(8 << 20);
    programs::seed_rom(&rom);
    rom.freeze();
    vfs.mount("/rom", Box::new(rom));

    // Console and terminal mode.
    let (shared_console, _raw_guard): (SharedConsole, Option<RawModeGuard>) = if cli.headless {
        (Rc::new(RefCell::new(PlainConsole)), None)
    } else {
        let guard = RawModeGuard::enable().context("enabling terminal raw mode")?;
        (Rc::new(RefCell::new(CrosstermConsole::new())), Some(guard))
    };

    let mut kernel = Kernel::new(
        vfs,
        Box::new(BuiltinLoader::new()),
        shared_console,
        Arc::new(SystemClock),
    );
    if let Some(quantum) = file_config.quantum_ms {
        kernel = kernel.with_quantum(quantum);
    }

    // Host input producers.
    let injector = kernel.injector();
    if cli.headless {
        input::spawn_stdin_pump(injector);
    } else {
        input::spawn_terminal_pump(injector);
    }

    let init_path = file_config
        .init_program
        .clone()
        .unwrap_or_else(|| "/rom/bin/init".to_string());
    let loader = BuiltinLoader::new();
    programs::boot(&mut kernel, &loader, &init_path)?;

    info!(root = %root.display(), init = %init_path, "kernel booted");
    kernel.run();
    Ok(())
}

fn init_tracing(filter: Option<&str>, file: Option<&Path>) -> anyhow::Result<()> {
    let filter = match filter {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    match file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
