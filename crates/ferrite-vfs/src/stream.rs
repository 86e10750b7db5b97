//! File stream contract.
//!
//! A [`FileStream`] is the stateful cursor returned by opening a file.  The
//! surface is text-oriented (the guest syscall layer speaks strings);
//! drivers are free to store bytes however they like.

use crate::error::Result;

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    /// From the start of the file.
    Set,
    /// From the current cursor.
    Cur,
    /// From the end of the file.
    End,
}

/// An open file cursor.
///
/// Read methods return `Ok(None)` at end of file.  Write methods fail on
/// streams opened read-only.  Dropping a stream without `close` is safe but
/// may lose buffered writes on the disk driver.
pub trait FileStream {
    /// Read up to `count` characters.
    fn read(&mut self, count: usize) -> Result<Option<String>>;

    /// Read up to and excluding the next newline.
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Read everything from the cursor to the end of the file.
    fn read_all(&mut self) -> Result<Option<String>>;

    /// Append `data` at the cursor.
    fn write(&mut self, data: &str) -> Result<()>;

    /// Append `data` followed by a newline.
    fn write_line(&mut self, data: &str) -> Result<()>;

    /// Move the cursor; returns the new absolute position.
    fn seek(&mut self, whence: SeekWhence, offset: i64) -> Result<u64>;

    /// Flush buffered writes to the backing store.
    fn flush(&mut self) -> Result<()>;

    /// Flush and release the stream.  Further calls fail.
    fn close(&mut self) -> Result<()>;
}
