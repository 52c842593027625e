use globset::Glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for the workspace manager
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub topology: TopologyConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// File watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Glob patterns a file must match to be tracked. Empty tracks everything.
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Glob patterns excluded from watching (matched against paths relative to the root)
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Maximum number of path components below the root
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Stability window a path must stay quiet for before it is reported
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
            max_depth: default_max_depth(),
            debounce_ms: default_debounce_ms(),
            respect_gitignore: true,
        }
    }
}

/// Dependency indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexerConfig {
    /// Files analyzed per batch before yielding during a full index
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Files larger than this are recorded with a parse error instead of being parsed
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Upper bound on the number of cycles kept in the report
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,

    /// Where to write a JSON dump of the index after each full analysis
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_file_bytes: default_max_file_bytes(),
            max_cycles: default_max_cycles(),
            snapshot_path: None,
        }
    }
}

/// System monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Alert thresholds in percent
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    #[serde(default = "default_disk_threshold")]
    pub disk_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            history_size: default_history_size(),
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            disk_threshold: default_disk_threshold(),
        }
    }
}

/// Component health checking and restart policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Consecutive failed checks before a component is restarted
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Automatic restarts allowed before a component is left failed
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,

    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            failure_threshold: default_failure_threshold(),
            max_restarts: default_max_restarts(),
            start_timeout_secs: default_start_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

/// Topology layout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    #[serde(default = "default_layout_iterations")]
    pub layout_iterations: usize,

    /// Emit one node per external package
    #[serde(default = "default_true")]
    pub include_external: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            layout_iterations: default_layout_iterations(),
            include_external: true,
        }
    }
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of the broadcast channel feeding subscribers
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_exclude_patterns() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/.git/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/__pycache__/**",
        "**/venv/**",
        "**/.venv/**",
        "**/.pytest_cache/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_depth() -> usize {
    32
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_batch_size() -> usize {
    50
}
fn default_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_max_cycles() -> usize {
    256
}
fn default_sample_interval_ms() -> u64 {
    1000
}
fn default_history_size() -> usize {
    60
}
fn default_cpu_threshold() -> f64 {
    80.0
}
fn default_memory_threshold() -> f64 {
    85.0
}
fn default_disk_threshold() -> f64 {
    90.0
}
fn default_check_interval_secs() -> u64 {
    30
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_max_restarts() -> u32 {
    5
}
fn default_start_timeout_secs() -> u64 {
    60
}
fn default_stop_timeout_secs() -> u64 {
    5
}
fn default_layout_iterations() -> usize {
    50
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7420
}
fn default_event_buffer() -> usize {
    1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// The subset of the configuration reported by `/api/status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigSummary {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_depth: usize,
    pub debounce_ms: u64,
    pub batch_size: usize,
    pub check_interval_secs: u64,
    pub failure_threshold: u32,
    pub max_restarts: u32,
}

impl WorkspaceConfig {
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            include_patterns: self.watch.include_patterns.clone(),
            exclude_patterns: self.watch.exclude_patterns.clone(),
            max_depth: self.watch.max_depth,
            debounce_ms: self.watch.debounce_ms,
            batch_size: self.indexer.batch_size,
            check_interval_secs: self.health.check_interval_secs,
            failure_threshold: self.health.failure_threshold,
            max_restarts: self.health.max_restarts,
        }
    }

    /// Check every value the runtime depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.debounce_ms == 0 {
            return Err(ConfigError::ValidationError(
                "watch.debounce_ms must be greater than 0".to_string(),
            ));
        }
        if self.watch.max_depth == 0 {
            return Err(ConfigError::ValidationError(
                "watch.max_depth must be greater than 0".to_string(),
            ));
        }
        for pattern in self
            .watch
            .include_patterns
            .iter()
            .chain(self.watch.exclude_patterns.iter())
        {
            Glob::new(pattern).map_err(|e| {
                ConfigError::ValidationError(format!("Invalid glob pattern '{}': {}", pattern, e))
            })?;
        }

        if self.indexer.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "indexer.batch_size must be greater than 0".to_string(),
            ));
        }

        if self.monitor.sample_interval_ms == 0 || self.monitor.history_size == 0 {
            return Err(ConfigError::ValidationError(
                "monitor.sample_interval_ms and monitor.history_size must be greater than 0"
                    .to_string(),
            ));
        }
        for (name, value) in [
            ("cpu_threshold", self.monitor.cpu_threshold),
            ("memory_threshold", self.monitor.memory_threshold),
            ("disk_threshold", self.monitor.disk_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "monitor.{} must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }

        if self.health.check_interval_secs == 0 || self.health.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.check_interval_secs and health.failure_threshold must be greater than 0"
                    .to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }
        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, compact",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Partial configuration accepted by `POST /api/config`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub max_depth: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub check_interval_secs: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub max_restarts: Option<u32>,
}

impl ConfigUpdate {
    /// Returns the patched configuration, or a validation error leaving `base` unchanged.
    pub fn apply(&self, base: &WorkspaceConfig) -> Result<WorkspaceConfig, ConfigError> {
        let mut next = base.clone();
        if let Some(ref v) = self.include_patterns {
            next.watch.include_patterns = v.clone();
        }
        if let Some(ref v) = self.exclude_patterns {
            next.watch.exclude_patterns = v.clone();
        }
        if let Some(v) = self.max_depth {
            next.watch.max_depth = v;
        }
        if let Some(v) = self.debounce_ms {
            next.watch.debounce_ms = v;
        }
        if let Some(v) = self.batch_size {
            next.indexer.batch_size = v;
        }
        if let Some(v) = self.check_interval_secs {
            next.health.check_interval_secs = v;
        }
        if let Some(v) = self.failure_threshold {
            next.health.failure_threshold = v;
        }
        if let Some(v) = self.max_restarts {
            next.health.max_restarts = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Configuration manager
pub struct ConfigManager {
    config: WorkspaceConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (`WSM_*`, optionally from a .env file)
    /// 2. Config file (explicit path, `.workspace-manager.toml`, `~/.workspace-manager/config.toml`)
    /// 3. Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                (Self::read_toml_file(path)?, Some(path.to_path_buf()))
            }
            None => Self::load_config_file()?,
        };

        let config = Self::apply_env_overrides(config);
        config.validate()?;

        match config_path {
            Some(ref path) => info!(config_file = %path.display(), "Configuration loaded"),
            None => info!("Configuration loaded (defaults, no config file)"),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load a single file with no discovery and no environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::read_toml_file(path)?;
        config.validate()?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".workspace-manager.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .workspace-manager.env: {}", e);
                }
            }
        }
    }

    fn load_config_file() -> Result<(WorkspaceConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".workspace-manager.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".workspace-manager").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((WorkspaceConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(config: WorkspaceConfig) -> WorkspaceConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply `WSM_*` overrides from an arbitrary lookup. Unparsable values are ignored with a warning.
    pub fn apply_overrides<F>(mut config: WorkspaceConfig, lookup: F) -> WorkspaceConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring {}: cannot parse '{}'", key, raw);
                    None
                }
            }
        }

        if let Some(v) = parsed("WSM_WATCH_DEBOUNCE_MS", lookup("WSM_WATCH_DEBOUNCE_MS")) {
            config.watch.debounce_ms = v;
        }
        if let Some(v) = parsed("WSM_WATCH_MAX_DEPTH", lookup("WSM_WATCH_MAX_DEPTH")) {
            config.watch.max_depth = v;
        }
        if let Some(v) = lookup("WSM_WATCH_INCLUDE") {
            config.watch.include_patterns = split_patterns(&v);
        }
        if let Some(v) = lookup("WSM_WATCH_EXCLUDE") {
            config.watch.exclude_patterns = split_patterns(&v);
        }
        if let Some(v) = parsed("WSM_INDEXER_BATCH_SIZE", lookup("WSM_INDEXER_BATCH_SIZE")) {
            config.indexer.batch_size = v;
        }
        if let Some(v) = lookup("WSM_INDEXER_SNAPSHOT_PATH") {
            config.indexer.snapshot_path = Some(PathBuf::from(v));
        }
        if let Some(v) = parsed(
            "WSM_HEALTH_CHECK_INTERVAL_SECS",
            lookup("WSM_HEALTH_CHECK_INTERVAL_SECS"),
        ) {
            config.health.check_interval_secs = v;
        }
        if let Some(v) = parsed("WSM_HEALTH_MAX_RESTARTS", lookup("WSM_HEALTH_MAX_RESTARTS")) {
            config.health.max_restarts = v;
        }
        if let Some(v) = lookup("WSM_SERVER_HOST") {
            config.server.host = v;
        }
        if let Some(v) = parsed("WSM_SERVER_PORT", lookup("WSM_SERVER_PORT")) {
            config.server.port = v;
        }
        if let Some(v) = lookup("WSM_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("WSM_LOG_FORMAT") {
            config.logging.format = v;
        }

        config
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn into_config(self) -> WorkspaceConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write the default configuration as TOML
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = WorkspaceConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
