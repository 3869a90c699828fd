//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: opc ua endpoint, namespace uri, server identity,
//!       certificate store, http bind.
//!     - SyncConfig: display-name rule and identity allow-list.
//!     - FeedConfig: which discovery feed to run and its pacing.
//!     - HistoryConfig: historization flag and depth.
//!     - LoggingConfig: default log level and reading verbosity.
//!
//! every section and every key is optional; missing keys take the defaults
//! below.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::address_space::HistorySettings;
use crate::bridge::BridgeSettings;
use crate::domain::SensorIdentity;
use crate::endpoint::EndpointUrl;
use crate::feed::IdentityFilter;
use crate::naming::{NameStyle, NamingRule};

/// environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "SENSOR_BRIDGE_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub feed: FeedConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub endpoint: String,
    pub namespace_uri: String,
    pub server_name: String,
    /// name of the container object all sensor subtrees live under
    pub root_name: String,
    /// certificate store of the opc ua server
    pub pki_dir: String,
    pub create_sample_keypair: bool,
    pub http_bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub name_style: NameStyle,
    pub name_prefix: String,
    pub short_length: usize,
    /// restrict the bridge to one known sensor
    pub identity_filter: Option<String>,
    pub allow_list: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    #[default]
    Simulated,
    Stdin,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub kind: FeedKind,
    /// identities emitted by the simulated feed
    pub identities: Vec<String>,
    pub interval_ms: u64,
    pub queue_capacity: usize,
    pub restart_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: "opc.tcp://0.0.0.0:4840/ruuvi/server/".to_string(),
            namespace_uri: "http://examples.freeopcua.github.io".to_string(),
            server_name: "Sensor Bridge".to_string(),
            root_name: "Sensors".to_string(),
            pki_dir: "pki".to_string(),
            create_sample_keypair: true,
            http_bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let rule = NamingRule::default();
        Self {
            name_style: rule.style,
            name_prefix: rule.prefix,
            short_length: rule.short_length,
            identity_filter: None,
            allow_list: Vec::new(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: FeedKind::Simulated,
            identities: vec![
                "C1:5E:1F:2A:3B:01".to_string(),
                "C1:5E:1F:2A:3B:02".to_string(),
            ],
            interval_ms: 1000,
            queue_capacity: 64,
            restart_delay_ms: 1000,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        let defaults = HistorySettings::default();
        Self {
            enabled: defaults.enabled,
            capacity: defaults.capacity,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// an explicit path from the environment must load; the conventional
    /// locations are tried in order and skipped when broken.
    pub fn load_or_default() -> anyhow::Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            let config = Self::load(&path)?;
            info!(path = %path.display(), "configuration loaded");
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!(path = %path.display(), "configuration loaded");
                        return Ok(config);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load configuration");
                    }
                }
            }
        }

        warn!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> anyhow::Result<()> {
        EndpointUrl::parse(&self.server.endpoint)?;
        if self.server.root_name.is_empty() {
            anyhow::bail!("server.root_name must not be empty");
        }
        if self.sync.name_style == NameStyle::Short && self.sync.short_length == 0 {
            anyhow::bail!("sync.short_length must be positive when name_style = \"short\"");
        }
        if self.feed.queue_capacity == 0 {
            anyhow::bail!("feed.queue_capacity must be positive");
        }
        Ok(())
    }

    pub fn naming_rule(&self) -> NamingRule {
        NamingRule {
            style: self.sync.name_style,
            prefix: self.sync.name_prefix.clone(),
            short_length: self.sync.short_length,
        }
    }

    pub fn identity_filter(&self) -> IdentityFilter {
        IdentityFilter::new(
            self.sync.identity_filter.as_deref(),
            self.sync.allow_list.iter().map(String::as_str),
        )
    }

    pub fn history_settings(&self) -> HistorySettings {
        HistorySettings {
            enabled: self.history.enabled,
            capacity: self.history.capacity,
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            queue_capacity: self.feed.queue_capacity,
            restart_delay: Duration::from_millis(self.feed.restart_delay_ms),
            show_sensor_data: self.logging.show_sensor_data,
        }
    }

    pub fn simulated_identities(&self) -> Vec<SensorIdentity> {
        self.feed
            .identities
            .iter()
            .map(|id| SensorIdentity::new(id.as_str()))
            .collect()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            server_name = %self.server.server_name,
            endpoint = %self.server.endpoint,
            namespace = %self.server.namespace_uri,
            http = %self.server.http_bind,
            "server"
        );
        info!(
            root = %self.server.root_name,
            name_style = ?self.sync.name_style,
            prefix = %self.sync.name_prefix,
            filter = ?self.sync.identity_filter,
            allow_list = self.sync.allow_list.len(),
            "synchronizer"
        );
        info!(
            kind = ?self.feed.kind,
            interval_ms = self.feed.interval_ms,
            queue = self.feed.queue_capacity,
            "feed"
        );
        info!(
            historizing = self.history.enabled,
            depth = self.history.capacity,
            log_level = %self.logging.level,
            "history/logging"
        );
    }
}
