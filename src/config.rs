use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command line entry point.
///
/// The only required input is the path to a json5 configuration file; every
/// other knob lives there so the binary itself has nothing to parse beyond
/// `--config`.
#[derive(Parser, Debug)]
#[command(name = "ntrip-caster", version, about = "A single-threaded NTRIP caster.")]
pub struct Cli {
    /// Path to the json5 configuration file.
    #[arg(long, short)]
    pub config: PathBuf,
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:2101".parse().unwrap()
}

fn default_pending_cap() -> usize {
    20
}

fn default_client_cap() -> usize {
    100
}

fn default_source_cap() -> usize {
    20
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

/// A single credential entry as loaded from configuration.
///
/// Held by the caster and reachable from the handshake path, but not
/// currently consulted to gate admission: see `DESIGN.md` for why the
/// enforcement hook is intentionally left as a pass-through.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(default)]
    pub readable_mountpoint: Option<String>,
    #[serde(default)]
    pub writable_mountpoint: Option<String>,
}

/// Admission caps for the three agent roles. `0` means unlimited.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Caps {
    #[serde(default = "default_pending_cap")]
    pub pending: usize,
    #[serde(default = "default_client_cap")]
    pub client: usize,
    #[serde(default = "default_source_cap")]
    pub source: usize,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            pending: default_pending_cap(),
            client: default_client_cap(),
            source: default_source_cap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default)]
    pub caps: Caps,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            caps: Caps::default(),
            log: Log::default(),
            credentials: Vec::new(),
        }
    }
}

impl Config {
    /// Reads and parses the json5 file named by `path`.
    ///
    /// # Test
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use ntrip_caster::config::Config;
    ///
    /// let config = Config::load(Path::new("ntrip-caster.json5")).unwrap();
    /// assert_eq!(config.caps.client, 100);
    /// ```
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        serde_json5::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}
