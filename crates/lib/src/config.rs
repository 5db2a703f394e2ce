//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.linebridge/config.json`) and the
//! environment. `PORT` selects the listening port and `LINEBRIDGE_BACKEND` the
//! backend address; command-line flags override both.

use crate::session::SessionSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Listener and backend settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Where to listen, where to relay to, and per-session limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Port for HTTP and WebSocket (default 8080).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Backend `host:port` every session connects to.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,

    /// Keep-alive cycle; the browser is pinged every half of it.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Allowed pong staleness before a browser counts as gone.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,

    /// Largest inbound WebSocket message in bytes.
    #[serde(default = "default_read_limit")]
    pub read_limit: usize,
}

/// Upper bound for every timing value, in seconds (one day).
pub const MAX_TIMING_SECS: u64 = 86_400;

fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_backend() -> String {
    "freechess.org:5000".to_string()
}

fn default_dial_timeout_secs() -> u64 {
    5
}

fn default_keep_alive_secs() -> u64 {
    80
}

fn default_ack_timeout_secs() -> u64 {
    5
}

fn default_read_limit() -> usize {
    2048
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            backend: default_backend(),
            dial_timeout_secs: default_dial_timeout_secs(),
            keep_alive_secs: default_keep_alive_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            read_limit: default_read_limit(),
        }
    }
}

impl BridgeConfig {
    /// Session limits derived from this config.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            ack_timeout: Duration::from_secs(self.ack_timeout_secs),
            read_limit: self.read_limit,
        }
    }

    /// Reject values that would make every session fail or never time out.
    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            anyhow::bail!("bridge.backend must not be empty");
        }
        if self.dial_timeout_secs == 0 {
            anyhow::bail!("bridge.dialTimeoutSecs must be greater than zero");
        }
        if self.keep_alive_secs < 2 {
            anyhow::bail!("bridge.keepAliveSecs must be at least 2");
        }
        if self.ack_timeout_secs == 0 {
            anyhow::bail!("bridge.ackTimeoutSecs must be greater than zero");
        }
        for (name, secs) in [
            ("dialTimeoutSecs", self.dial_timeout_secs),
            ("keepAliveSecs", self.keep_alive_secs),
            ("ackTimeoutSecs", self.ack_timeout_secs),
        ] {
            if secs > MAX_TIMING_SECS {
                anyhow::bail!("bridge.{} must be at most {}", name, MAX_TIMING_SECS);
            }
        }
        if self.read_limit == 0 {
            anyhow::bail!("bridge.readLimit must be greater than zero");
        }
        Ok(())
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LINEBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".linebridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, else the default path. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Apply `PORT` and `LINEBRIDGE_BACKEND` from the process environment.
pub fn apply_env(config: &mut Config) -> Result<()> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply environment-style overrides read through `lookup`. Blank values count as unset.
pub fn apply_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let get = |key: &str| {
        lookup(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    match get("PORT") {
        Some(port) => {
            config.bridge.port = port
                .parse()
                .with_context(|| format!("invalid PORT value {:?}", port))?;
        }
        None => log::info!("PORT not set, using port {}", config.bridge.port),
    }
    if let Some(backend) = get("LINEBRIDGE_BACKEND") {
        config.bridge.backend = backend;
    }
    Ok(())
}
