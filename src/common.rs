// Licensed under the Apache-2.0 license

//! Shared infrastructure for the driver modules.
//!
//! Every driver in this crate takes a [`Logger`] as a generic parameter that
//! defaults to [`NoOpLogger`], so production builds that do not wire up a
//! console pay nothing for log statements. Blocking waits are expressed as a
//! [`Timeout`] and driven by [`poll_until`] over an `embedded_hal` delay.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_io::Write as _;

/// Timeout for every blocking call in the crate, in milliseconds.
pub type Timeout = fugit::MillisDurationU32;

/// Granularity of the blocking waits, in microseconds.
pub const POLL_INTERVAL_US: u32 = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for driver diagnostics.
///
/// Implementations must be callable from interrupt context: they take
/// `&self` and must not block for long.
pub trait Logger {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>);

    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _level: LogLevel, _args: fmt::Arguments<'_>) {}
}

/// Line-oriented logger on top of a serial port.
///
/// Records above `max_level` are dropped. Write errors are swallowed: a
/// broken console must never fail a bus transaction.
pub struct UartLogger<W> {
    sink: Mutex<RefCell<W>>,
    max_level: LogLevel,
}

impl<W: embedded_io::Write> UartLogger<W> {
    pub fn new(sink: W, max_level: LogLevel) -> Self {
        Self {
            sink: Mutex::new(RefCell::new(sink)),
            max_level,
        }
    }

    /// Consume the logger and give the serial port back.
    pub fn release(self) -> W {
        self.sink.into_inner().into_inner()
    }
}

impl<W: embedded_io::Write> Logger for UartLogger<W> {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if level > self.max_level {
            return;
        }
        critical_section::with(|cs| {
            let mut sink = self.sink.borrow_ref_mut(cs);
            let _ = sink.write_fmt(format_args!("[{level}] {args}\r\n"));
        });
    }
}

/// Poll `ready` until it returns `true` or `timeout` has elapsed.
///
/// `ready` is always evaluated at least once, so a zero timeout is a single
/// non-blocking check. Time is accounted in [`POLL_INTERVAL_US`] steps of
/// `delay`.
///
/// # Returns
///
/// `true` if `ready` returned `true` before the timeout expired.
pub fn poll_until<D, F>(timeout: Timeout, delay: &mut D, mut ready: F) -> bool
where
    D: DelayNs,
    F: FnMut() -> bool,
{
    if ready() {
        return true;
    }
    let mut remaining_us = u64::from(timeout.ticks()) * 1000;
    while remaining_us > 0 {
        let step = remaining_us.min(u64::from(POLL_INTERVAL_US));
        delay.delay_us(u32::try_from(step).unwrap_or(POLL_INTERVAL_US));
        remaining_us -= step;
        if ready() {
            return true;
        }
    }
    false
}
