//! Console implementations for the host terminal.
//!
//! [`CrosstermConsole`] drives the real terminal in raw mode (newlines need
//! explicit carriage returns there); [`PlainConsole`] writes straight to
//! stdout for headless runs.

use std::io::{self, Write};

use crossterm::terminal;
use tracing::warn;

use ferrite_kernel::Console;

/// Raw-mode terminal console.
pub struct CrosstermConsole {
    out: io::Stdout,
}

impl CrosstermConsole {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }

    fn put(&mut self, text: &str) {
        // Raw mode does not translate `\n`; emit CRLF ourselves.
        let translated = text.replace('\n', "\r\n");
        if let Err(e) = self
            .out
            .write_all(translated.as_bytes())
            .and_then(|_| self.out.flush())
        {
            warn!(error = %e, "console write failed");
        }
    }
}

impl Console for CrosstermConsole {
    fn write(&mut self, text: &str) {
        self.put(text);
    }

    fn write_line(&mut self, text: &str) {
        self.put(text);
        self.put("\n");
    }

    fn backspace(&mut self) {
        self.put("\u{8} \u{8}");
    }

    fn size(&self) -> (u16, u16) {
        terminal::size().unwrap_or((80, 24))
    }
}

/// Line-oriented stdout console for `--headless` runs.
#[derive(Default)]
pub struct PlainConsole;

impl Console for PlainConsole {
    fn write(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn write_line(&mut self, text: &str) {
        println!("{text}");
    }

    fn backspace(&mut self) {
        // No cursor control on a plain stream.
    }

    fn size(&self) -> (u16, u16) {
        (80, 24)
    }
}

/// Enables terminal raw mode for the lifetime of the value.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "failed to restore terminal mode");
        }
    }
}
