//! Configuration management for cryptmirror

use crate::error::{Error, Result};
use crate::store::RemotePath;
use crate::sync::{ExcludeFilter, PathPolicy, SyncOptions, DEFAULT_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default seconds between sync passes
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;

/// Default remote directory the local root is mirrored to
pub const DEFAULT_REMOTE_ROOT: &str = "/files";

/// Default retries for a failed store operation
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default per-operation store timeout (seconds)
pub const DEFAULT_OP_TIMEOUT_SECS: u64 = 60;

const MAX_CONCURRENCY: usize = 256;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// What to sync and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local directory to mirror
    pub local_root: PathBuf,

    /// Remote directory to mirror into
    #[serde(default = "default_remote_root")]
    pub remote_root: String,

    /// Seconds between passes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Files reconciled at once within a directory
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Naming of remote entries
    #[serde(default)]
    pub path_policy: PathPolicy,

    /// Gitignore-style patterns relative to `local_root`
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_remote_root() -> String {
    DEFAULT_REMOTE_ROOT.to_string()
}

fn default_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Content store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory backing the content store
    pub root: PathBuf,

    /// Retries for transient failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Initial retry delay, doubled per attempt
    #[serde(default = "default_retry_delay")]
    pub retry_base_delay_ms: u64,

    /// Timeout for a single store operation
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay() -> u64 {
    500
}

fn default_op_timeout() -> u64 {
    DEFAULT_OP_TIMEOUT_SECS
}

/// Key material locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// This device's secret identity
    pub identity_file: PathBuf,

    /// Public identity to encrypt for; defaults to our own
    #[serde(default)]
    pub recipient_file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config version
    #[serde(default = "default_version")]
    pub version: u32,

    pub sync: SyncConfig,

    pub store: StoreConfig,

    pub keys: KeysConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> u32 {
    1
}

/// Platform data directory for cryptmirror
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cryptmirror")
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        let local_root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("CryptMirror");

        Config {
            version: default_version(),
            sync: SyncConfig {
                local_root,
                remote_root: default_remote_root(),
                interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
                concurrency: DEFAULT_CONCURRENCY,
                path_policy: PathPolicy::default(),
                exclude: Vec::new(),
            },
            store: StoreConfig {
                root: data_dir.join("store"),
                retry_attempts: DEFAULT_RETRY_ATTEMPTS,
                retry_base_delay_ms: default_retry_delay(),
                op_timeout_secs: DEFAULT_OP_TIMEOUT_SECS,
            },
            keys: KeysConfig {
                identity_file: data_dir.join("identity.json"),
                recipient_file: None,
            },
            logging: LoggingConfig::default(),
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Config {
    /// Load configuration from a file (YAML or JSON), with environment variable
    /// substitution and overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path_ref, e))
        })?;

        let content = Self::substitute_env_vars(&content)?;

        let mut config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Substitute `${VAR_NAME}` with the variable's value; unset variables are left as is
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| Error::Internal(format!("Bad substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        });
        Ok(result.into_owned())
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("CRYPTMIRROR_LOCAL_ROOT") {
            let root = root.trim();
            if !root.is_empty() {
                self.sync.local_root = PathBuf::from(root);
            }
        }

        if let Ok(root) = std::env::var("CRYPTMIRROR_STORE_ROOT") {
            let root = root.trim();
            if !root.is_empty() {
                self.store.root = PathBuf::from(root);
            }
        }

        if let Ok(identity) = std::env::var("CRYPTMIRROR_IDENTITY") {
            let identity = identity.trim();
            if !identity.is_empty() {
                self.keys.identity_file = PathBuf::from(identity);
            }
        }

        if let Ok(recipient) = std::env::var("CRYPTMIRROR_RECIPIENT") {
            let recipient = recipient.trim();
            if !recipient.is_empty() {
                self.keys.recipient_file = Some(PathBuf::from(recipient));
            }
        }

        if let Ok(interval) = std::env::var("CRYPTMIRROR_SYNC_INTERVAL") {
            if let Ok(secs) = interval.trim().parse::<u64>() {
                self.sync.interval_secs = secs;
            }
        }
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config to YAML: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config to JSON: {}", e)))?
        };

        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path_ref, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "Sync interval must be greater than 0".to_string(),
            ));
        }

        if self.sync.concurrency == 0 || self.sync.concurrency > MAX_CONCURRENCY {
            return Err(Error::InvalidConfig(format!(
                "Concurrency must be between 1 and {}",
                MAX_CONCURRENCY
            )));
        }

        self.remote_root()?;

        if self.store.root.starts_with(&self.sync.local_root) {
            return Err(Error::InvalidConfig(
                "Store root must not be inside the local root".to_string(),
            ));
        }

        if self.store.op_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "Store operation timeout must be greater than 0".to_string(),
            ));
        }

        ExcludeFilter::new(&self.sync.local_root, &self.sync.exclude)?;

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::InvalidConfig(format!(
                "Unknown log level {:?}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Parsed remote root
    pub fn remote_root(&self) -> Result<RemotePath> {
        RemotePath::parse(&self.sync.remote_root)
            .map_err(|e| Error::InvalidConfig(format!("Bad remote root: {}", e)))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store.root)?;
        if let Some(parent) = self.keys.identity_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        SyncOptions {
            path_policy: config.path_policy,
            concurrency: config.concurrency,
            exclude: config.exclude.clone(),
        }
    }
}
