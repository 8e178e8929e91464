//! Configuration loading
//!
//! Two layers:
//! 1. **TOML bootstrap** (`TomlConfig`): backend endpoints, credentials, logging
//! 2. **Sync settings** (`SyncConfig`): the explicit configuration object passed
//!    into the core at construction (current user, intervals, adapter order)
//!
//! # Resolution priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variables (`MSYNC_*`)
//! 3. TOML config file
//! 4. Compiled defaults (fallback)
//!
//! A missing config file never aborts startup: it is logged and defaults are used.

use crate::model::EntityType;
use crate::time::millis_to_duration;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "MSYNC_CONFIG";
pub const ENV_PRIMARY_URL: &str = "MSYNC_PRIMARY_URL";
pub const ENV_PRIMARY_KEY: &str = "MSYNC_PRIMARY_KEY";
pub const ENV_LEGACY_URL: &str = "MSYNC_LEGACY_URL";
pub const ENV_LEGACY_TOKEN: &str = "MSYNC_LEGACY_TOKEN";
pub const ENV_USER_ID: &str = "MSYNC_USER_ID";

/// Which backend a Source Adapter wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted database service
    Primary,
    /// Legacy REST API kept during the backend migration
    Legacy,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Primary => write!(f, "primary"),
            BackendKind::Legacy => write!(f, "legacy"),
        }
    }
}

/// Settings consumed by the synchronization core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// User stamped onto created records (`created_by`)
    pub current_user_id: Option<String>,

    /// Polling interval for entity types without a push channel
    ///
    /// Default: 30000ms
    pub poll_interval_ms: u64,

    /// Per-entity-type polling intervals, keyed by entity type name
    ///
    /// Default: `message = 5000`. Entries read from a file are merged onto
    /// the defaults.
    #[serde(deserialize_with = "merge_poll_overrides")]
    pub poll_overrides: BTreeMap<String, u64>,

    /// Adapter priority for reads (fetch)
    pub read_order: Vec<BackendKind>,

    /// Adapter priority for writes (create/update/delete)
    pub write_order: Vec<BackendKind>,

    /// Upper bound on one adapter attempt before it counts as unreachable
    ///
    /// Default: 10000ms
    pub attempt_timeout_ms: u64,

    /// Capacity of the event bus channel
    pub event_capacity: usize,
}

fn default_poll_overrides() -> BTreeMap<String, u64> {
    let mut overrides = BTreeMap::new();
    overrides.insert(EntityType::Message.to_string(), 5000);
    overrides
}

/// Layer configured overrides onto the defaults
///
/// Keys naming a known entity type (singular, table name or legacy path) are
/// stored under the singular name; unknown keys are kept for `validate`.
fn merge_poll_overrides<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let configured = BTreeMap::<String, u64>::deserialize(deserializer)?;
    let mut merged = default_poll_overrides();
    for (name, interval) in configured {
        let key = match name.parse::<EntityType>() {
            Ok(entity_type) => entity_type.to_string(),
            Err(_) => name,
        };
        merged.insert(key, interval);
    }
    Ok(merged)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            current_user_id: None,
            poll_interval_ms: 30_000,
            poll_overrides: default_poll_overrides(),
            read_order: vec![BackendKind::Primary, BackendKind::Legacy],
            write_order: vec![BackendKind::Primary, BackendKind::Legacy],
            attempt_timeout_ms: 10_000,
            event_capacity: 1000,
        }
    }
}

impl SyncConfig {
    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be greater than zero".to_string()));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(Error::Config("attempt_timeout_ms must be greater than zero".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be greater than zero".to_string()));
        }
        for (name, interval) in &self.poll_overrides {
            name.parse::<EntityType>()
                .map_err(|_| Error::Config(format!("poll_overrides: unknown entity type '{}'", name)))?;
            if *interval == 0 {
                return Err(Error::Config(format!("poll_overrides.{} must be greater than zero", name)));
            }
        }
        validate_order("read_order", &self.read_order)?;
        validate_order("write_order", &self.write_order)?;
        Ok(())
    }

    /// Polling interval for one entity type
    pub fn poll_interval_for(&self, entity_type: EntityType) -> Duration {
        let ms = self
            .poll_overrides
            .iter()
            .find(|(name, _)| name.parse::<EntityType>().ok() == Some(entity_type))
            .map(|(_, ms)| *ms)
            .unwrap_or(self.poll_interval_ms);
        millis_to_duration(ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        millis_to_duration(self.attempt_timeout_ms)
    }
}

fn validate_order(field: &str, order: &[BackendKind]) -> Result<()> {
    if order.is_empty() {
        return Err(Error::Config(format!("{} must name at least one backend", field)));
    }
    for (i, kind) in order.iter().enumerate() {
        if order[..i].contains(kind) {
            return Err(Error::Config(format!("{} lists '{}' more than once", field, kind)));
        }
    }
    Ok(())
}

/// Hosted database endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimaryConfig {
    /// Project URL, e.g. `https://xyz.example.co`
    pub url: Option<String>,
    /// Public API key sent as `apikey` and bearer token
    pub api_key: Option<String>,
}

/// Legacy REST endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Base URL including the `/api` prefix, e.g. `http://localhost:3001/api`
    pub url: Option<String>,
    /// Optional bearer token
    pub token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub primary: PrimaryConfig,

    #[serde(default)]
    pub legacy: LegacyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl TomlConfig {
    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay `MSYNC_*` environment variables onto the file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_value(ENV_PRIMARY_URL) {
            self.primary.url = Some(v);
        }
        if let Some(v) = env_value(ENV_PRIMARY_KEY) {
            self.primary.api_key = Some(v);
        }
        if let Some(v) = env_value(ENV_LEGACY_URL) {
            self.legacy.url = Some(v);
        }
        if let Some(v) = env_value(ENV_LEGACY_TOKEN) {
            self.legacy.token = Some(v);
        }
        if let Some(v) = env_value(ENV_USER_ID) {
            self.sync.current_user_id = Some(v);
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Locate and load the bootstrap configuration
///
/// Priority for the file itself: `cli_path` → `MSYNC_CONFIG` → platform
/// config directory → none (compiled defaults). Environment overrides are
/// applied on top in every case, then the sync settings are validated.
pub fn load_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(cli_path) {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            TomlConfig::from_file(&path)?
        }
        None => {
            warn!("No configuration file found, using compiled defaults");
            TomlConfig::default()
        }
    };

    config.apply_env_overrides();
    config.sync.validate()?;
    Ok(config)
}

/// Resolve which config file to read, if any
///
/// An explicitly named file (CLI or environment) is returned even if it does
/// not exist so that the caller reports the missing file instead of silently
/// falling back to defaults.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Some(path) = env_value(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: Platform config locations
    default_config_paths().into_iter().find(|p| {
        let exists = p.exists();
        debug!("Config candidate {} (exists: {})", p.display(), exists);
        exists
    })
}

/// Platform config file candidates, most specific first
fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("msync").join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        paths.push(PathBuf::from("/etc/msync/config.toml"));
    }
    paths
}
