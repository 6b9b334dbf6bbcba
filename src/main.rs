// src/main.rs

//! `winlog-tail`: prints Windows Event Log records as JSON lines.
//!
//! 1. Parse configuration & set up structured logging
//! 2. Open the backend: a replayed fixture, or the local event log service
//! 3. Subscribe every configured channel
//! 4. Stream events to stdout until Ctrl-C, reporting delivery stats
//! 5. Shut the watcher down and print the final tally
//!
//! Usage: `winlog-tail [path/to/winlog.toml]` (default: `winlog.toml` next to
//! the executable).

// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::{Context, Result, bail};
use log::Level;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::StreamExt;

// ───── local imports ────────────────────────────────────────────────────────
use winlog::comms::stream::{forward_errors, forward_events};
use winlog::config::{self, Config};
use winlog::evt::EvtApi;
use winlog::logging::setup_logging;
use winlog::{DeliverySnapshot, Watcher, winlog_log};

// ───── helpers ──────────────────────────────────────────────────────────────

/// Directory that contains the running executable.
fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine exe path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable must live in some directory")
}

/// First CLI argument, or `winlog.toml` next to the executable.
fn config_path() -> Result<PathBuf> {
    match std::env::args_os().nth(1) {
        Some(arg) => Ok(PathBuf::from(arg)),
        None => Ok(exe_dir()?.join("winlog.toml")),
    }
}

/// Pick the event source the config asks for.
fn open_backend(cfg: &Config) -> Result<Arc<dyn EvtApi>> {
    if let Some(log) = config::open_fixture(&cfg.watcher)? {
        return Ok(Arc::new(log));
    }
    system_backend()
}

#[cfg(windows)]
fn system_backend() -> Result<Arc<dyn EvtApi>> {
    Ok(Arc::new(winlog::evt::windows::WinEvtApi::new()))
}

#[cfg(not(windows))]
fn system_backend() -> Result<Arc<dyn EvtApi>> {
    bail!("no system event log on this platform; set [watcher] fixture")
}

/// Subscribe every configured channel. A channel that fails is logged and
/// skipped; failing them all is fatal.
fn subscribe_all(watcher: &Watcher, cfg: &Config) -> Result<()> {
    for sub in &cfg.subscription {
        let res = if sub.from_beginning {
            watcher.subscribe_from_beginning(&sub.channel, &sub.query)
        } else {
            watcher.subscribe(&sub.channel, &sub.query)
        };
        if let Err(e) = res {
            winlog_log!(Level::Error, "main", "{}", e);
        }
    }
    if watcher.subscription_count() == 0 {
        bail!("none of the {} configured subscription(s) could be opened", cfg.subscription.len());
    }
    Ok(())
}

// ───── tail loop ────────────────────────────────────────────────────────────

async fn tail(watcher: &Watcher, cfg: &Config) -> Result<()> {
    let mut events = forward_events(watcher);
    let mut errors = forward_errors(watcher);
    let mut tick = time::interval(cfg.watcher.poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = DeliverySnapshot::default();

    let stdout = std::io::stdout();
    loop {
        tokio::select! {
            Some(ev) = events.next() => {
                let line = serde_json::to_string(&ev)?;
                writeln!(stdout.lock(), "{}", line)?;
            }
            Some(err) = errors.next() => {
                winlog_log!(Level::Warn, "main", "{}", err);
            }
            _ = tick.tick() => {
                let now = watcher.stats();
                if now != last {
                    log::debug!(
                        "delivered={} dropped={} errors={}",
                        now.delivered, now.dropped(), now.errors
                    );
                    last = now;
                }
            }
            res = tokio::signal::ctrl_c() => {
                res.context("cannot listen for Ctrl-C")?;
                winlog_log!(Level::Warn, "main", "Ctrl-C received, shutting down");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1 ─ Context
    let path = config_path()?;
    let cfg = config::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    // 2 ─ Logging
    setup_logging(&base_dir, &cfg.logging).context("logging setup failed")?;
    log::info!("winlog-tail starting with {}", path.display());

    // 3 ─ Watcher
    let watcher = Watcher::new(open_backend(&cfg)?)?;
    subscribe_all(&watcher, &cfg)?;

    // 4 ─ Stream until interrupted
    let outcome = tail(&watcher, &cfg).await;

    // 5 ─ Shutdown closes both streams, which stops the forwarders
    watcher.shutdown();
    let stats = watcher.stats();
    winlog_log!(
        Level::Info,
        "main",
        "stopped: {}",
        serde_json::to_string(&stats).unwrap_or_default()
    );
    outcome
}
