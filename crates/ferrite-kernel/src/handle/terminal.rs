//! Terminal output handle.

use crate::console::SharedConsole;
use crate::error::Result;
use crate::handle::WriteHandle;

/// Write-only endpoint over the console.  stdout and stderr are both
/// terminal handles sharing the same console.
#[derive(Clone)]
pub struct TerminalHandle {
    console: SharedConsole,
}

impl TerminalHandle {
    pub fn new(console: SharedConsole) -> Self {
        Self { console }
    }
}

impl WriteHandle for TerminalHandle {
    fn write(&mut self, text: &str) -> Result<()> {
        self.console.borrow_mut().write(text);
        Ok(())
    }

    fn write_line(&mut self, text: &str) -> Result<()> {
        self.console.borrow_mut().write_line(text);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
