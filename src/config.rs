//! Configuration loading and validation.
//!
//! The operator owns `config.toml`; this crate only ever reads it.
//! Precedence: env vars > config file > defaults. A missing file is not an
//! error and yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gate::FeatureId;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "HOSTPATCH_CONFIG_PATH";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local per-feature toggles.
    pub features: FeatureToggles,

    /// Remote override settings.
    pub remote: RemoteConfig,

    /// Pause reconciler timing.
    pub reconciler: ReconcilerConfig,

    /// Leak remediation reporting.
    pub remediation: RemediationConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

/// Local feature toggles, keyed by the same stable ids the remote document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    /// Enter the idle-save state when the server boots with nobody connected.
    #[serde(rename = "AutoPause")]
    pub auto_pause: bool,

    /// Suppress entity spawns while the server is idle-paused.
    #[serde(rename = "SpawnBlocker")]
    pub spawn_blocker: bool,

    /// Destroy replaced terrain meshes.
    #[serde(rename = "TerrainLeak")]
    pub terrain_leak: bool,
}

impl FeatureToggles {
    /// Local toggle for a feature.
    pub fn get(&self, feature: FeatureId) -> bool {
        match feature {
            FeatureId::AutoPause => self.auto_pause,
            FeatureId::SpawnBlocker => self.spawn_blocker,
            FeatureId::TerrainLeak => self.terrain_leak,
        }
    }
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            auto_pause: true,
            spawn_blocker: true,
            terrain_leak: true,
        }
    }
}

/// Remote killswitch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Whether remote overrides are consulted at all.
    pub killswitch_enabled: bool,

    /// URL of the remote override document. Empty disables the fetch.
    pub url: String,

    /// Upper bound on the whole fetch, in milliseconds.
    pub timeout_ms: u64,
}

impl RemoteConfig {
    /// Fetch timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            killswitch_enabled: true,
            url: String::new(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

/// Pause reconciler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Wait after session creation before acting, in milliseconds.
    pub settle_delay_ms: u64,
}

impl ReconcilerConfig {
    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Leak remediation reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Estimated native bytes per freed vertex, used for the reclaimed-memory figure.
    pub bytes_per_element: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            bytes_per_element: default_bytes_per_element(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

// Default value functions for serde

fn default_remote_timeout_ms() -> u64 {
    5_000
}
fn default_settle_delay_ms() -> u64 {
    500
}
fn default_bytes_per_element() -> u64 {
    32
}

impl Config {
    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Serialise to TOML, used by `hostpatch init`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialise config")
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests never touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("HOSTPATCH_REMOTE_URL") {
            self.remote.url = v;
        }
        if let Some(v) = env("HOSTPATCH_KILLSWITCH") {
            match v.parse() {
                Ok(b) => self.remote.killswitch_enabled = b,
                Err(_) => warn!(
                    var = "HOSTPATCH_KILLSWITCH",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("HOSTPATCH_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// The remote URL if the fetch should happen: killswitch on, URL present and valid.
    pub fn remote_url(&self) -> Option<url::Url> {
        if !self.remote.killswitch_enabled || self.remote.url.trim().is_empty() {
            return None;
        }
        match url::Url::parse(self.remote.url.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(parsed),
            Ok(parsed) => {
                warn!(url = %parsed, "remote config URL must be http(s), skipping fetch");
                None
            }
            Err(e) => {
                warn!(url = %self.remote.url, error = %e, "invalid remote config URL, skipping fetch");
                None
            }
        }
    }
}

/// Load config from `path`. A missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            info!(path = %path.display(), "loading config from file");
            toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to read config at {}: {e}",
            path.display()
        )),
    }
}

/// Resolve the config file path using a custom env resolver.
///
/// `$HOSTPATCH_CONFIG_PATH` wins, then `~/.hostpatch/config.toml`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(p) = env(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}

/// Resolve the default config directory (`~/.hostpatch/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".hostpatch"))
}
