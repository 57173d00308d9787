//! Configuration loading and root folder resolution
//!
//! The bootstrap TOML file is optional. Every field has a compiled default so a
//! missing or partial file degrades to defaults with a warning instead of
//! aborting startup.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "TASTESYNC_ROOT_FOLDER";

/// Application directory name used under OS config/data directories
pub const APP_DIR_NAME: &str = "tastesync";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for snapshots, the SQLite store and the reference table
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
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

/// HTTP trigger surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upstream music service access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request ceiling shared by all concurrent calls
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Recent plays requested per sync (clamped to the upstream maximum)
    #[serde(default = "default_page_limit")]
    pub recent_limit: u32,

    /// Top items requested per (kind, time range)
    #[serde(default = "default_page_limit")]
    pub top_limit: u32,

    /// OAuth token endpoint used to refresh expired access tokens
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Client credentials for token refresh (refresh disabled when unset)
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            rate_limit_per_second: default_rate_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            recent_limit: default_page_limit(),
            top_limit: default_page_limit(),
            token_url: default_token_url(),
            client_id: None,
            client_secret: None,
        }
    }
}

/// Backoff parameters for throttled and transient upstream failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Fractional jitter applied to each computed delay (0.0-1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
        }
    }
}

/// Per-sync scheduling knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Non-forced collects inside this window are skipped
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: u64,

    /// Deadline covering fetch and enrichment
    #[serde(default = "default_sync_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            freshness_hours: default_freshness_hours(),
            timeout_secs: default_sync_timeout_secs(),
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

/// Descriptor lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// JSON reference table (relative paths resolve against the root folder)
    #[serde(default = "default_reference_table")]
    pub reference_table: PathBuf,

    /// Minimum fuzzy score accepted as a match
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// "levenshtein" or "jaro_winkler"
    #[serde(default = "default_similarity")]
    pub similarity: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            reference_table: default_reference_table(),
            fuzzy_threshold: default_fuzzy_threshold(),
            similarity: default_similarity(),
        }
    }
}

/// Object store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    Sqlite,
    Memory,
}

/// Snapshot storage settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Archive entries kept per user by the pruning step (unset keeps all)
    #[serde(default)]
    pub archive_keep_last: Option<usize>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_token_url() -> String {
    "https://accounts.spotify.com/api/token".to_string()
}

fn default_rate_limit() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_page_limit() -> u32 {
    50
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_freshness_hours() -> u64 {
    24
}

fn default_sync_timeout_secs() -> u64 {
    300
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_reference_table() -> PathBuf {
    PathBuf::from("reference_descriptors.json")
}

fn default_fuzzy_threshold() -> f64 {
    0.8
}

fn default_similarity() -> String {
    "levenshtein".to_string()
}

/// Compiled-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/tastesync
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/var/lib/tastesync"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/tastesync"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\tastesync"))
    } else {
        PathBuf::from("./tastesync_data")
    }
}

/// Default location of the bootstrap TOML file
///
/// `~/.config/tastesync/<module>.toml` on Linux, the platform config dir elsewhere.
pub fn default_config_path(module_name: &str) -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME).join(format!("{}.toml", module_name)))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load the bootstrap TOML file
///
/// A missing file yields defaults with a warning. A file that exists but cannot
/// be parsed is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found at {}, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write the TOML config atomically (temp file then rename)
///
/// On Unix the file is restricted to owner read/write.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, path)?;
    debug!("Wrote config to {}", path.display());
    Ok(())
}

/// Root folder resolution
///
/// Priority order:
/// 1. `TASTESYNC_ROOT_FOLDER` environment variable
/// 2. `root_folder` in the TOML config
/// 3. OS-dependent compiled default
pub struct RootFolderResolver {
    module_name: String,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            toml_root: None,
        }
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                if self.toml_root.is_some() {
                    warn!(
                        module = %self.module_name,
                        "Root folder set in both environment and TOML, using environment"
                    );
                }
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            return path.clone();
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout on first start
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root folder if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            info!("Created root folder: {}", self.root.display());
        }
        Ok(())
    }

    /// Directory holding the filesystem object store
    pub fn store_path(&self) -> PathBuf {
        self.root.join("store")
    }

    /// SQLite object store database file
    pub fn database_path(&self) -> PathBuf {
        self.root.join("tastesync.db")
    }

    /// Resolve a possibly relative path against the root folder
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// User-Agent sent to the upstream service
pub fn get_user_agent() -> String {
    format!("tastesync/{}", env!("CARGO_PKG_VERSION"))
}
