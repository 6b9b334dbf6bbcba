// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `winlog.toml`, deserializes it into `ConfigStub`, and converts the
//! raw tables into a validated runtime `Config`.

use log::Level;
use std::{fs, path::Path};

use crate::config::model::{
    parse_level, Config, ConfigError, ConfigStub, WatcherConfig, WatcherStub,
};
use crate::evt::memory::MemoryLog;

/// Load and parse the configuration from `path`.
/// A relative `fixture` path is resolved against the config file's directory.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    winlog_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let mut cfg = from_str(&txt)?;
    if let (Some(fixture), Some(dir)) = (cfg.watcher.fixture.as_mut(), path.parent()) {
        if fixture.is_relative() {
            *fixture = dir.join(&*fixture);
        }
    }
    winlog_log!(
        Level::Info,
        "config",
        "Loaded config from {:?}: {} subscription(s)",
        path,
        cfg.subscription.len()
    );
    Ok(cfg)
}

/// Parse and validate TOML text.
pub fn from_str(txt: &str) -> Result<Config, ConfigError> {
    let stub: ConfigStub = toml::from_str(txt)?;

    if parse_level(&stub.logging.level).is_none() {
        return Err(ConfigError::InvalidLevel(stub.logging.level));
    }
    if stub.subscription.is_empty() {
        return Err(ConfigError::NoSubscriptions);
    }
    if let Some(i) = stub.subscription.iter().position(|s| s.channel.trim().is_empty()) {
        return Err(ConfigError::EmptyChannel(i));
    }

    Ok(Config {
        logging: stub.logging,
        watcher: convert_watcher(stub.watcher)?,
        subscription: stub.subscription,
    })
}

fn convert_watcher(stub: WatcherStub) -> Result<WatcherConfig, ConfigError> {
    let poll_interval = humantime::parse_duration(&stub.poll_interval)
        .map_err(|e| ConfigError::InvalidDuration(stub.poll_interval.clone(), e))?;
    Ok(WatcherConfig {
        poll_interval,
        fixture: stub.fixture,
    })
}

/// Open the configured fixture, if any.
pub fn open_fixture(watcher: &WatcherConfig) -> Result<Option<MemoryLog>, ConfigError> {
    let Some(path) = watcher.fixture.as_deref() else {
        return Ok(None);
    };
    let log = MemoryLog::load(path)?;
    winlog_log!(Level::Info, "config", "Replaying fixture {:?}", path);
    Ok(Some(log))
}
