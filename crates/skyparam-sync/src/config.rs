//! # Engine Configuration
//!
//! Configuration management for the parameter engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SKYPARAM_VEHICLE_ID=1                                              │
//! │     SKYPARAM_WAITING_PARAM_TIMEOUT_MS=1000                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/skyparam/params.toml (Linux)                             │
//! │     ~/Library/Application Support/io.skyparam.skyparam/... (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     vehicle 1, 2.5s cache / 6s initial / 1s waiting timers             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # params.toml
//! [vehicle]
//! id = 1
//! default_component_marker = "SYS_AUTOSTART"
//! save_to_storage = false
//!
//! [timeouts]
//! cache_timeout_ms = 2500
//! initial_request_timeout_ms = 6000
//! waiting_param_timeout_ms = 1000
//! refresh_all_interval_secs = 600
//!
//! [retry]
//! max_initial_load_retries = 10
//! max_read_write_retries = 5
//! max_batch_size = 10
//!
//! [cache]
//! enabled = true
//!
//! [metadata]
//! path = "/usr/share/skyparam/px4.toml"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ParamError, ParamResult};

// =============================================================================
// Vehicle Configuration
// =============================================================================

/// Identity of the vehicle this engine mirrors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    /// Vehicle (system) id. Notifications from other ids are ignored.
    #[serde(default = "default_vehicle_id")]
    pub id: u8,

    /// Forces the default component instead of inferring it.
    #[serde(default)]
    pub default_component: Option<u8>,

    /// Parameter whose presence marks the autopilot component.
    #[serde(default = "default_component_marker")]
    pub default_component_marker: String,

    /// Commit parameters to vehicle storage after writes settle. Only for
    /// autopilots that do not persist writes on their own.
    #[serde(default)]
    pub save_to_storage: bool,
}

fn default_vehicle_id() -> u8 {
    1
}

fn default_component_marker() -> String {
    "SYS_AUTOSTART".to_string()
}

impl Default for VehicleConfig {
    fn default() -> Self {
        VehicleConfig {
            id: default_vehicle_id(),
            default_component: None,
            default_component_marker: default_component_marker(),
            save_to_storage: false,
        }
    }
}

// =============================================================================
// Timer Settings
// =============================================================================

/// Timer intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// How long to wait for the vehicle's hash before loading over the link.
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout_ms: u64,

    /// One-shot guard against a lost initial list request.
    #[serde(default = "default_initial_request_timeout")]
    pub initial_request_timeout_ms: u64,

    /// Recurring retry tick for pending reads and writes.
    #[serde(default = "default_waiting_param_timeout")]
    pub waiting_param_timeout_ms: u64,

    /// Periodic full refresh while ready. Disabled when absent.
    #[serde(default)]
    pub refresh_all_interval_secs: Option<u64>,
}

fn default_cache_timeout() -> u64 {
    2500
}
fn default_initial_request_timeout() -> u64 {
    6000
}
fn default_waiting_param_timeout() -> u64 {
    1000
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        TimeoutSettings {
            cache_timeout_ms: default_cache_timeout(),
            initial_request_timeout_ms: default_initial_request_timeout(),
            waiting_param_timeout_ms: default_waiting_param_timeout(),
            refresh_all_interval_secs: None,
        }
    }
}

impl TimeoutSettings {
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn initial_request_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_request_timeout_ms)
    }

    pub fn waiting_param_timeout(&self) -> Duration {
        Duration::from_millis(self.waiting_param_timeout_ms)
    }

    pub fn refresh_all_interval(&self) -> Option<Duration> {
        self.refresh_all_interval_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Retry budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Budget for index reads during the bulk sweep.
    #[serde(default = "default_max_initial_load_retries")]
    pub max_initial_load_retries: u32,

    /// Budget for by-name reads and for writes.
    #[serde(default = "default_max_read_write_retries")]
    pub max_read_write_retries: u32,

    /// Most index re-reads issued per waiting-param tick.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_initial_load_retries() -> u32 {
    10
}
fn default_max_read_write_retries() -> u32 {
    5
}
fn default_max_batch_size() -> usize {
    10
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_initial_load_retries: default_max_initial_load_retries(),
            max_read_write_retries: default_max_read_write_retries(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

// =============================================================================
// Cache / Metadata Settings
// =============================================================================

/// Parameter cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory for cache blobs. Defaults to the platform data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            enabled: true,
            dir: None,
        }
    }
}

impl CacheSettings {
    /// Returns the configured directory or the platform default.
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        self.dir.clone().or_else(|| {
            directories::ProjectDirs::from("io", "skyparam", "skyparam")
                .map(|dirs| dirs.data_dir().join("param-cache"))
        })
    }
}

/// Metadata definition source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub vehicle: VehicleConfig,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub metadata: MetadataSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (params.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ParamResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading parameter config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| ParamError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load parameter config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ParamResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ParamError::ConfigSaveFailed("No config path available".into()))?;

        let io_err = |e: std::io::Error| ParamError::ConfigSaveFailed(e.to_string());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(io_err)?;

        info!(?path, "Parameter config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ParamResult<()> {
        let t = &self.timeouts;
        if t.cache_timeout_ms == 0 || t.initial_request_timeout_ms == 0 || t.waiting_param_timeout_ms == 0 {
            return Err(ParamError::InvalidConfig(
                "timeouts must be greater than 0".into(),
            ));
        }

        if t.refresh_all_interval_secs == Some(0) {
            return Err(ParamError::InvalidConfig(
                "refresh_all_interval_secs must be greater than 0".into(),
            ));
        }

        if self.retry.max_initial_load_retries == 0 || self.retry.max_read_write_retries == 0 {
            return Err(ParamError::InvalidConfig(
                "retry budgets must be greater than 0".into(),
            ));
        }

        if self.retry.max_batch_size == 0 {
            return Err(ParamError::InvalidConfig(
                "max_batch_size must be greater than 0".into(),
            ));
        }

        if self.vehicle.default_component == Some(0) {
            return Err(ParamError::InvalidConfig(
                "default_component cannot be the broadcast id 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(id) = env_parse::<u8>("SKYPARAM_VEHICLE_ID") {
            debug!(vehicle_id = id, "Overriding vehicle id from environment");
            self.vehicle.id = id;
        }

        if let Some(component) = env_parse::<u8>("SKYPARAM_DEFAULT_COMPONENT") {
            self.vehicle.default_component = Some(component);
        }

        if let Some(save) = env_parse::<bool>("SKYPARAM_SAVE_TO_STORAGE") {
            self.vehicle.save_to_storage = save;
        }

        if let Some(ms) = env_parse::<u64>("SKYPARAM_CACHE_TIMEOUT_MS") {
            self.timeouts.cache_timeout_ms = ms;
        }

        if let Some(ms) = env_parse::<u64>("SKYPARAM_INITIAL_REQUEST_TIMEOUT_MS") {
            self.timeouts.initial_request_timeout_ms = ms;
        }

        if let Some(ms) = env_parse::<u64>("SKYPARAM_WAITING_PARAM_TIMEOUT_MS") {
            debug!(ms, "Overriding waiting-param timeout from environment");
            self.timeouts.waiting_param_timeout_ms = ms;
        }

        if let Some(secs) = env_parse::<u64>("SKYPARAM_REFRESH_ALL_INTERVAL_SECS") {
            self.timeouts.refresh_all_interval_secs = Some(secs);
        }

        if let Some(enabled) = env_parse::<bool>("SKYPARAM_CACHE_ENABLED") {
            self.cache.enabled = enabled;
        }

        if let Ok(dir) = std::env::var("SKYPARAM_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(dir));
        }

        if let Ok(path) = std::env::var("SKYPARAM_METADATA_PATH") {
            debug!(path = %path, "Overriding metadata path from environment");
            self.metadata.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "skyparam", "skyparam")
            .map(|dirs| dirs.config_dir().join("params.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the vehicle id.
    pub fn vehicle_id(&self) -> u8 {
        self.vehicle.id
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
