//! Formatted kernel log output, ported from the teacher kernel's
//! `printf.rs`/`console.rs` pair.
//!
//! The real console (UART, VGA, ...) is a boot-time collaborator this crate
//! does not own, so output goes through a `ConsoleSink` trait instead of a
//! hardwired device; `set_sink` lets the (external) boot code plug in the
//! real one, and tests can plug in a buffer.

use alloc::boxed::Box;
use core::fmt;

use spin::Mutex;

pub trait ConsoleSink: Send {
    fn write_str(&mut self, s: &str);
}

static SINK: Mutex<Option<Box<dyn ConsoleSink>>> = Mutex::new(None);

/// Plugs in the real console. Boot code calls this once; until it does,
/// log output is silently dropped.
pub fn set_sink(sink: Box<dyn ConsoleSink>) {
    *SINK.lock() = Some(sink);
}

/// Log level, checked against a compile-time floor so `trace!` calls compile
/// to nothing in release builds without needing the `log` crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Warn,
    Error,
}

#[cfg(debug_assertions)]
pub const MIN_LEVEL: Level = Level::Trace;
#[cfg(not(debug_assertions))]
pub const MIN_LEVEL: Level = Level::Warn;

struct SinkWriter;

impl fmt::Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = SINK.lock().as_mut() {
            sink.write_str(s);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _log(level: Level, args: fmt::Arguments<'_>) {
    if level < MIN_LEVEL {
        return;
    }
    use fmt::Write;
    let _ = write!(SinkWriter, "{}", args);
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => ($crate::printf::_log($crate::printf::Level::Trace, format_args!($($arg)*)));
}

#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => ($crate::printf::_log($crate::printf::Level::Debug, format_args!($($arg)*)));
}

#[macro_export]
macro_rules! warn_log {
    ($($arg:tt)*) => ($crate::printf::_log($crate::printf::Level::Warn, format_args!($($arg)*)));
}

#[macro_export]
macro_rules! error_log {
    ($($arg:tt)*) => ($crate::printf::_log($crate::printf::Level::Error, format_args!($($arg)*)));
}
