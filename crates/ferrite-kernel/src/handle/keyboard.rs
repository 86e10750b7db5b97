//! Keyboard input: line buffer, stdin handle, and the line discipline.
//!
//! In cooked mode the [`LineDiscipline`] interceptor absorbs raw character
//! and key events before they reach the process event queue, editing a
//! shared [`LineBuffer`]: printable characters append (and echo), backspace
//! erases, Enter commits the pending line.  The [`KeyboardHandle`] reads
//! committed text only; an empty buffer reads as "nothing available"
//! rather than blocking.

use std::cell::RefCell;
use std::rc::Rc;

use crate::console::SharedConsole;
use crate::error::Result;
use crate::event::{KernelEvent, keys};
use crate::handle::ReadHandle;
use crate::interceptor::EventInterceptor;

/// Cooked-mode input buffer shared between a handle and its discipline.
pub type SharedLineBuffer = Rc<RefCell<LineBuffer>>;

/// Committed lines plus the line still being edited.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Committed text, newline-terminated per line.
    ready: String,
    /// The line currently being edited.
    partial: String,
}

impl LineBuffer {
    pub fn shared() -> SharedLineBuffer {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn push_char(&mut self, ch: char) {
        self.partial.push(ch);
    }

    /// Erase the last pending character; returns whether there was one.
    pub fn backspace(&mut self) -> bool {
        self.partial.pop().is_some()
    }

    /// Commit the pending line to the readable region.
    pub fn commit_line(&mut self) {
        self.ready.push_str(&self.partial);
        self.ready.push('\n');
        self.partial.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    fn take_chars(&mut self, count: usize) -> Option<String> {
        if self.ready.is_empty() {
            return None;
        }
        let split: usize = self
            .ready
            .char_indices()
            .nth(count)
            .map(|(idx, _)| idx)
            .unwrap_or(self.ready.len());
        let rest = self.ready.split_off(split);
        let taken = std::mem::replace(&mut self.ready, rest);
        Some(taken)
    }

    fn take_line(&mut self) -> Option<String> {
        if self.ready.is_empty() {
            return None;
        }
        match self.ready.find('\n') {
            Some(idx) => {
                let rest = self.ready.split_off(idx + 1);
                let mut line = std::mem::replace(&mut self.ready, rest);
                line.pop();
                Some(line)
            }
            None => Some(std::mem::take(&mut self.ready)),
        }
    }

    fn take_all(&mut self) -> Option<String> {
        if self.ready.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.ready))
        }
    }
}

/// The stdin endpoint: reads committed text from a shared line buffer.
#[derive(Clone)]
pub struct KeyboardHandle {
    buffer: SharedLineBuffer,
}

impl KeyboardHandle {
    pub fn new(buffer: SharedLineBuffer) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> SharedLineBuffer {
        Rc::clone(&self.buffer)
    }
}

impl ReadHandle for KeyboardHandle {
    fn is_empty(&mut self) -> bool {
        self.buffer.borrow().is_empty()
    }

    fn read(&mut self, count: usize) -> Result<Option<String>> {
        Ok(self.buffer.borrow_mut().take_chars(count))
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.buffer.borrow_mut().take_line())
    }

    fn read_all(&mut self) -> Result<Option<String>> {
        Ok(self.buffer.borrow_mut().take_all())
    }
}

/// Interceptor feeding a [`LineBuffer`] from raw input events.
pub struct LineDiscipline {
    buffer: SharedLineBuffer,
    console: SharedConsole,
}

impl LineDiscipline {
    pub fn new(buffer: SharedLineBuffer, console: SharedConsole) -> Self {
        Self { buffer, console }
    }
}

impl EventInterceptor for LineDiscipline {
    fn on_event(&mut self, event: &KernelEvent) -> bool {
        match event {
            KernelEvent::Char { ch } => {
                self.buffer.borrow_mut().push_char(*ch);
                self.console.borrow_mut().write(&ch.to_string());
                true
            }
            KernelEvent::KeyDown { code, .. } if *code == keys::ENTER => {
                self.buffer.borrow_mut().commit_line();
                self.console.borrow_mut().write("\n");
                true
            }
            KernelEvent::KeyDown { code, .. } if *code == keys::BACKSPACE => {
                if self.buffer.borrow_mut().backspace() {
                    self.console.borrow_mut().backspace();
                }
                true
            }
            // Remaining raw key traffic is absorbed in cooked mode.
            KernelEvent::KeyDown { .. } | KernelEvent::KeyUp { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferConsole;

    fn type_line(discipline: &mut LineDiscipline, text: &str) {
        for ch in text.chars() {
            discipline.on_event(&KernelEvent::Char { ch });
        }
        discipline.on_event(&KernelEvent::KeyDown {
            code: keys::ENTER,
            held: false,
        });
    }

    #[test]
    fn typed_line_becomes_readable_on_enter() {
        let buffer = LineBuffer::shared();
        let console = BufferConsole::shared();
        let mut discipline = LineDiscipline::new(Rc::clone(&buffer), console);
        let mut handle = KeyboardHandle::new(Rc::clone(&buffer));

        for ch in "hi".chars() {
            discipline.on_event(&KernelEvent::Char { ch });
        }
        // Nothing committed yet.
        assert!(handle.is_empty());
        assert_eq!(handle.read_line().expect("read"), None);

        discipline.on_event(&KernelEvent::KeyDown {
            code: keys::ENTER,
            held: false,
        });
        assert_eq!(handle.read_line().expect("read").as_deref(), Some("hi"));
        assert!(handle.is_empty());
    }

    #[test]
    fn backspace_edits_pending_line() {
        let buffer = LineBuffer::shared();
        let console = BufferConsole::shared();
        let mut discipline = LineDiscipline::new(Rc::clone(&buffer), console);
        let mut handle = KeyboardHandle::new(Rc::clone(&buffer));

        type_line(&mut discipline, "cart");
        // "cart" committed; now type "dog", erase it, type "cat".
        for ch in "dog".chars() {
            discipline.on_event(&KernelEvent::Char { ch });
        }
        for _ in 0..3 {
            discipline.on_event(&KernelEvent::KeyDown {
                code: keys::BACKSPACE,
                held: false,
            });
        }
        type_line(&mut discipline, "cat");

        assert_eq!(handle.read_line().expect("read").as_deref(), Some("cart"));
        assert_eq!(handle.read_line().expect("read").as_deref(), Some("cat"));
    }

    #[test]
    fn discipline_consumes_key_traffic_but_not_broadcasts() {
        let buffer = LineBuffer::shared();
        let console = BufferConsole::shared();
        let mut discipline = LineDiscipline::new(buffer, console);

        assert!(discipline.on_event(&KernelEvent::Char { ch: 'x' }));
        assert!(discipline.on_event(&KernelEvent::KeyUp { code: 42 }));
        assert!(!discipline.on_event(&KernelEvent::Timer { id: 1 }));
        assert!(!discipline.on_event(&KernelEvent::ScreenResize { cols: 80, rows: 24 }));
    }

    #[test]
    fn read_takes_bounded_char_counts() {
        let buffer = LineBuffer::shared();
        buffer.borrow_mut().push_char('a');
        buffer.borrow_mut().push_char('b');
        buffer.borrow_mut().push_char('c');
        buffer.borrow_mut().commit_line();

        let mut handle = KeyboardHandle::new(buffer);
        assert_eq!(handle.read(2).expect("read").as_deref(), Some("ab"));
        assert_eq!(handle.read(10).expect("read").as_deref(), Some("c\n"));
        assert_eq!(handle.read(1).expect("read"), None);
    }
}
