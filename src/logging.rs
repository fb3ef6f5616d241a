//! Minimal process-wide logger, in the shape `rd` uses: a level enum and a
//! `log!`-style macro rather than a crate like `log`/`tracing`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(usize)]
pub enum LogLevel {
    LogError = 0,
    LogWarn = 1,
    LogInfo = 2,
    LogDebug = 3,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::LogError => "ERROR",
            LogLevel::LogWarn => "WARN",
            LogLevel::LogInfo => "INFO",
            LogLevel::LogDebug => "DEBUG",
        }
    }
}

static LEVEL: AtomicUsize = AtomicUsize::new(LogLevel::LogInfo as usize);

/// Raise or lower the process-wide log gate. Components never log above
/// the configured level; this is the one piece of global mutable state
/// the core keeps, mirroring `rd`'s global `Flags::checksum`-style knobs
/// without resurrecting a global settings object (see `settings.rs`).
pub fn set_level(level: LogLevel) {
    LEVEL.store(level as usize, Ordering::Relaxed);
}

pub fn enabled(level: LogLevel) -> bool {
    level as usize <= LEVEL.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn write_line(level: LogLevel, module: &str, line: u32, args: std::fmt::Arguments) {
    if !enabled(level) {
        return;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    eprintln!(
        "[{:>5}.{:03} {} {}:{}] {}",
        now.as_secs(),
        now.subsec_millis(),
        level.as_str(),
        module,
        line,
        args
    );
}

/// `rd_log!(LogDebug, "fmt {}", x)` — checked once against the process
/// level before formatting, so disabled debug logging costs a branch.
#[macro_export]
macro_rules! rd_log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::logging::enabled($level) {
            $crate::logging::write_line($level, module_path!(), line!(), format_args!($($arg)*));
        }
    };
}
