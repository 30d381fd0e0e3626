//! ==============================================================================
//! config.rs - Hub Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: Where the http server listens.
//!     - StorageConfig: SQLite database file and pool size.
//!     - HistoryConfig: Default and maximum history query sizes.
//!     - BroadcastConfig: Heartbeat interval for live-update streams.
//!     - EstimatorsConfig: Model files for the arsenic/barium estimators.
//!     - LoggingConfig: Log level and per-reading logging.
//!     - TestDataConfig: Toggle for the synthetic reading endpoint.
//!
//! every section is optional; missing keys take the defaults below.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub history: HistoryConfig,
    pub broadcast: BroadcastConfig,
    pub estimators: EstimatorsConfig,
    pub logging: LoggingConfig,
    pub test_data: TestDataConfig,
}

/// where the running configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Found(PathBuf),
    Defaults,
}

/// result of `HubConfig::load_or_default`
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HubConfig,
    pub source: ConfigSource,
    /// candidate files that exist but failed to load
    pub skipped: Vec<(PathBuf, String)>,
}

impl LoadedConfig {
    /// report the outcome of the search; call after logging is initialised
    pub fn log_source(&self) {
        for (path, reason) in &self.skipped {
            warn!(path = %path.display(), error = %reason, "failed to load config");
        }
        match &self.source {
            ConfigSource::Explicit(path) | ConfigSource::Found(path) => {
                info!(path = %path.display(), "config loaded");
            }
            ConfigSource::Defaults => warn!("no config file found - using defaults"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlite file path, or ":memory:"
    pub database: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConfig {
    pub heartbeat_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EstimatorsConfig {
    pub arsenic_model: Option<String>,
    pub barium_model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TestDataConfig {
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".to_string() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database: "database.db".to_string(), max_connections: 4 }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { default_limit: 20, max_limit: 1000 }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { heartbeat_seconds: 15 }
    }
}

impl Default for EstimatorsConfig {
    fn default() -> Self {
        Self {
            arsenic_model: Some("models/arsenic.json".to_string()),
            barium_model: Some("models/barium.json".to_string()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl Default for TestDataConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HubConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load an explicit path, or search the usual locations with default fallback
    ///
    /// an explicit path that fails to load is an error; the search is not.
    /// nothing is logged here, since this runs before logging is set up;
    /// call `LoadedConfig::log_source` once it is.
    pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<LoadedConfig> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            return Ok(LoadedConfig {
                config,
                source: ConfigSource::Explicit(path.to_path_buf()),
                skipped: Vec::new(),
            });
        }

        Ok(Self::search(&[
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ]))
    }

    /// first candidate that loads wins; broken files are recorded and skipped
    fn search(candidates: &[PathBuf]) -> LoadedConfig {
        let mut skipped = Vec::new();

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load(path) {
                Ok(config) => {
                    return LoadedConfig { config, source: ConfigSource::Found(path.clone()), skipped };
                }
                Err(e) => skipped.push((path.clone(), e.to_string())),
            }
        }

        LoadedConfig { config: Self::default(), source: ConfigSource::Defaults, skipped }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            bind = %self.server.bind,
            database = %self.storage.database,
            heartbeat_seconds = self.broadcast.heartbeat_seconds,
            history_default = self.history.default_limit,
            log_level = %self.logging.level,
            test_data = self.test_data.enabled,
            "hub configuration"
        );
    }

    /// clamp a requested history size into the configured range
    pub fn history_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.history.default_limit)
            .min(self.history.max_limit)
    }
}
