//! Host input threads.
//!
//! Translate terminal activity into [`RawEvent`]s and feed them to the
//! kernel through its injector.  The kernel stays the sole scheduler; these
//! threads only produce events.

use std::io::BufRead;
use std::thread;

use crossterm::event::{Event, KeyCode, KeyEventKind, KeyModifiers, read};
use tracing::{debug, warn};

use ferrite_kernel::{EventInjector, RawEvent, event::keys};

/// Spawn the raw-terminal input pump.  Ctrl-C maps to the terminate
/// signal; everything else becomes key/char/resize events.
pub fn spawn_terminal_pump(injector: EventInjector) {
    thread::spawn(move || {
        loop {
            let event = match read() {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "terminal event read failed");
                    injector.send(RawEvent::Terminate);
                    return;
                }
            };
            match event {
                Event::Key(key) => {
                    if key.kind == KeyEventKind::Release {
                        if let Some(code) = key_code(key.code) {
                            injector.send(RawEvent::KeyUp { code });
                        }
                        continue;
                    }
                    if key.modifiers.contains(KeyModifiers::CONTROL)
                        && key.code == KeyCode::Char('c')
                    {
                        debug!("ctrl-c: terminating kernel");
                        injector.send(RawEvent::Terminate);
                        return;
                    }
                    match key.code {
                        KeyCode::Char(ch) => injector.send(RawEvent::Char { ch }),
                        other => {
                            if let Some(code) = key_code(other) {
                                injector.send(RawEvent::Key {
                                    code,
                                    held: key.kind == KeyEventKind::Repeat,
                                });
                            }
                        }
                    }
                }
                Event::Resize(cols, rows) => {
                    injector.send(RawEvent::ScreenResize { cols, rows });
                }
                _ => {}
            }
        }
    });
}

/// Spawn a line-oriented stdin pump for headless runs: each line of host
/// stdin is replayed as character events plus Enter; EOF terminates the
/// kernel.
pub fn spawn_stdin_pump(injector: EventInjector) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            for ch in line.chars() {
                injector.send(RawEvent::Char { ch });
            }
            injector.send(RawEvent::Key {
                code: keys::ENTER,
                held: false,
            });
        }
        debug!("stdin closed: terminating kernel");
        injector.send(RawEvent::Terminate);
    });
}

fn key_code(code: KeyCode) -> Option<u32> {
    match code {
        KeyCode::Enter => Some(keys::ENTER),
        KeyCode::Backspace => Some(keys::BACKSPACE),
        KeyCode::Char(ch) => Some(ch as u32),
        _ => None,
    }
}
