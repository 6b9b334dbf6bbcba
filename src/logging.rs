// src/logging.rs

//! Global logger for the `winlog-tail` binary.

use chrono::Local;
use fern::Dispatch;
use std::{path::Path, process, thread};

use crate::config::LoggingConfig;

/// Configure global logging as requested in `[logging]`.
/// A relative log file lands in `base_dir`.
pub fn setup_logging(base_dir: &Path, cfg: &LoggingConfig) -> Result<(), fern::InitError> {
    let log_path = cfg
        .enable
        .then(|| base_dir.join(cfg.file.as_deref().unwrap_or("winlog.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(cfg.level_filter())
        // events go to stdout as JSON lines
        .chain(std::io::stderr());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}
