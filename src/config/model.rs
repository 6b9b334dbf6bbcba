// src/config/model.rs

use log::LevelFilter;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

use crate::evt::memory::FixtureError;

/// Top-level runtime config
#[derive(Debug)]
pub struct Config {
    pub logging:      LoggingConfig,
    pub watcher:      WatcherConfig,
    pub subscription: Vec<SubscriptionConfig>,
}

/// Raw file layout, converted into [`Config`] by the loader
#[derive(Debug, Deserialize)]
pub struct ConfigStub {
    #[serde(default)]
    pub logging:      LoggingConfig,
    #[serde(default)]
    pub watcher:      WatcherStub,
    #[serde(default)]
    pub subscription: Vec<SubscriptionConfig>,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]            pub enable: bool,
    #[serde(default)]            pub file:   Option<String>,
    #[serde(default = "default_level")] pub level: String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

impl LoggingConfig {
    /// `level` as a filter; the loader has already rejected unknown names.
    pub fn level_filter(&self) -> LevelFilter {
        parse_level(&self.level).unwrap_or(LevelFilter::Info)
    }
}

pub(crate) fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_uppercase().as_str() {
        "OFF"   => Some(LevelFilter::Off),
        "ERROR" => Some(LevelFilter::Error),
        "WARN"  => Some(LevelFilter::Warn),
        "INFO"  => Some(LevelFilter::Info),
        "DEBUG" => Some(LevelFilter::Debug),
        "TRACE" => Some(LevelFilter::Trace),
        _       => None,
    }
}

/// Raw `[watcher]` table
#[derive(Debug, Deserialize)]
pub struct WatcherStub {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    #[serde(default)]
    pub fixture:       Option<PathBuf>,
}
fn default_poll_interval() -> String { "1s".into() }

impl Default for WatcherStub {
    fn default() -> Self {
        Self { poll_interval: default_poll_interval(), fixture: None }
    }
}

/// Fully-typed `[watcher]` table
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Replay this JSON fixture instead of reading the system log.
    pub fixture:       Option<PathBuf>,
}

/// One `[[subscription]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionConfig {
    pub channel:        String,
    #[serde(default = "default_query")]
    pub query:          String,
    #[serde(default)]
    pub from_beginning: bool,
}
fn default_query() -> String { "*".into() }

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("no [[subscription]] entries configured")]
    NoSubscriptions,

    #[error("subscription #{0} has an empty channel name")]
    EmptyChannel(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("fixture error: {0}")]
    Fixture(#[from] FixtureError),
}
