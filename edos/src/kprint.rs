//! Kernel print utilities.
//!
//! Output is line-buffered into the kernel console sink. Every completed line
//! is also retained in a capture buffer; the log lines emitted by the memory
//! and scheduling subsystems form a stable, scrapeable contract, and
//! [`drain`] hands the captured lines to whoever wants to inspect them (the
//! grading tests, a debugging shell).

use crate::sync::SpinLock;
use alloc::{string::String, vec::Vec};
use core::fmt::Write;

struct Console {
    line: String,
    captured: Vec<String>,
}

static CONSOLE: SpinLock<Console> = SpinLock::new(Console {
    line: String::new(),
    captured: Vec::new(),
});

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let mut guard = CONSOLE.lock();
    let _ = write!(Sink(&mut guard), "{fmt}");
    guard.unlock();
}

struct Sink<'a>(&'a mut Console);

impl Write for Sink<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for ch in s.chars() {
            if ch == '\n' {
                let line = core::mem::take(&mut self.0.line);
                self.0.captured.push(line);
            } else {
                self.0.line.push(ch);
            }
        }
        Ok(())
    }
}

/// Takes every captured console line out of the sink.
///
/// Lines are returned in emission order. Concurrent emitters interleave at
/// line granularity only; a single `print!` call stays contiguous.
pub fn drain() -> Vec<String> {
    let mut guard = CONSOLE.lock();
    let lines = core::mem::take(&mut guard.captured);
    guard.unlock();
    lines
}

/// Prints out the message.
///
/// Use the `format!` syntax to write data to the kernel console.
/// This first holds the lock for the console sink.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the `format!` syntax to write data to the kernel console.
/// This first holds the lock for the console sink.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    () => (if !$crate::QUIET.load() { $crate::print!("[INFO]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load() { $crate::print!("[INFO] {}\n", format_args!($($arg)*)) });
}

/// Display a debug message.
#[macro_export]
macro_rules! debug {
    () => (if !$crate::QUIET.load() { $crate::print!("[DEBUG]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load() { $crate::print!("[DEBUG] {}\n", format_args!($($arg)*)) });
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    () => ($crate::print!("[WARN]\n"));
    ($($arg:tt)*) => ($crate::print!("[WARN] {}\n", format_args!($($arg)*)));
}
