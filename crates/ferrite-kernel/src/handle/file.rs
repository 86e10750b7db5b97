//! File-backed handle.
//!
//! Wraps a VFS [`FileStream`] with the capability implied by its open mode.
//! Cloning shares the stream (and its cursor), which is what inheriting an
//! open descriptor means.

use std::cell::RefCell;
use std::rc::Rc;

use ferrite_vfs::{FileStream, OpenMode};

use crate::error::Result;
use crate::handle::{ReadHandle, WriteHandle};

#[derive(Clone)]
pub struct FileHandle {
    stream: Rc<RefCell<Box<dyn FileStream>>>,
    mode: OpenMode,
}

impl FileHandle {
    pub fn new(stream: Box<dyn FileStream>, mode: OpenMode) -> Self {
        Self {
            stream: Rc::new(RefCell::new(stream)),
            mode,
        }
    }

    pub fn readable(&self) -> bool {
        self.mode.readable()
    }

    pub fn writable(&self) -> bool {
        self.mode.writable()
    }

    pub fn close(&mut self) -> Result<()> {
        self.stream.borrow_mut().close()?;
        Ok(())
    }
}

impl ReadHandle for FileHandle {
    fn is_empty(&mut self) -> bool {
        // A file cursor always reports data until a read observes EOF.
        false
    }

    fn read(&mut self, count: usize) -> Result<Option<String>> {
        Ok(self.stream.borrow_mut().read(count)?)
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.stream.borrow_mut().read_line()?)
    }

    fn read_all(&mut self) -> Result<Option<String>> {
        Ok(self.stream.borrow_mut().read_all()?)
    }
}

impl WriteHandle for FileHandle {
    fn write(&mut self, text: &str) -> Result<()> {
        self.stream.borrow_mut().write(text)?;
        Ok(())
    }

    fn write_line(&mut self, text: &str) -> Result<()> {
        self.stream.borrow_mut().write_line(text)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.borrow_mut().flush()?;
        Ok(())
    }
}
