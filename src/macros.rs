//! `winlog_log!`: lifecycle lines tagged with a component.
//!
//! Per-event paths use plain `log::trace!`/`log::debug!`; this macro is for
//! the handful of lines an operator greps for (watcher created, channel
//! subscribed, shutdown tally, config loaded). Each line carries its own
//! prefix so it stays readable even under a bare `env_logger`-style backend:
//!
//! `[2026-03-02T09:14:05.118+01:00][INFO][watcher][pid=4568][tid=ThreadId(7)] subscribed to 'Security' (query="*", from_beginning=true)`

use chrono::{DateTime, Local};
use log::Level;
use std::{fmt, process, thread};

/// Logs `$fmt` under `$level` behind a `[time][LEVEL][component][pid][tid]` prefix.
///
/// ```rust
/// use log::Level;
/// winlog::winlog_log!(Level::Info, "watcher", "subscribed to '{}'", "Security");
/// winlog::winlog_log!(Level::Warn, "main", "Ctrl-C received, shutting down");
/// ```
#[macro_export]
macro_rules! winlog_log {
    ($level:expr, $component:expr, $($arg:tt)+) => {
        match $level {
            lvl => ::log::log!(
                lvl,
                "{} {}",
                $crate::macros::LinePrefix::new(lvl, $component),
                format_args!($($arg)+)
            ),
        }
    };
}

/// Prefix rendered in front of every `winlog_log!` line.
#[doc(hidden)]
pub struct LinePrefix {
    at: DateTime<Local>,
    level: Level,
    component: &'static str,
    thread: thread::ThreadId,
}

impl LinePrefix {
    pub fn new(level: Level, component: &'static str) -> Self {
        Self {
            at: Local::now(),
            level,
            component,
            thread: thread::current().id(),
        }
    }
}

impl fmt::Display for LinePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}][{}][{}][pid={}][tid={:?}]",
            self.at.to_rfc3339(),
            self.level,
            self.component,
            process::id(),
            self.thread
        )
    }
}
