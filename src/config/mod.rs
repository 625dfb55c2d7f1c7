//! Configuration management for CLI, environment variables, and config files.

use crate::error::{ShuttleError, ValidationIssue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration for torrent-shuttle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub qbit: QbitConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub tags: TagsConfig,
    #[serde(default)]
    pub indexers: IndexersConfig,
    #[serde(default)]
    pub import_mode: ImportModeConfig,
    #[serde(default)]
    pub tautulli: TautulliConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage tier roots and state locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_root: PathBuf,
    pub bulk_root: PathBuf,
    pub state_dir: PathBuf,
    pub log_file: Option<PathBuf>,
}

/// Connection settings for the qBittorrent WebUI API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QbitConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub verify_tls: bool,
}

/// Bind address and shared secret for the daemon's own HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
}

/// Worker-pool sizing and copy behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub max_concurrent_processes: usize,
    pub max_concurrent_copy_operations: usize,
    pub copy_retry_attempts: u32,
    pub disk_space_threshold_gib: f64,
    pub dry_run: bool,
    pub verification_enabled: bool,
}

/// Location-tag names and tagging behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsConfig {
    pub location_tagging_enabled: bool,
    pub auto_tag_new: bool,
    pub cache_tag: String,
    pub bulk_tag: String,
}

/// One downstream media indexer (Sonarr or Radarr).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub url: String,
    pub api_key: String,
    pub category_tag: String,
}

impl IndexerConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexersConfig {
    pub notify_enabled: bool,
    pub sonarr: IndexerConfig,
    pub radarr: IndexerConfig,
}

/// Import-script mode: the indexer links to cache files via symlinks, so
/// eviction must rewrite library links before deleting the cache copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportModeConfig {
    pub enabled: bool,
    pub sonarr_root_folders: Vec<PathBuf>,
    pub radarr_root_folders: Vec<PathBuf>,
    /// local prefix -> prefix as seen by the streaming oracle
    pub plex_path_mappings: BTreeMap<String, String>,
}

impl ImportModeConfig {
    pub fn library_roots(&self) -> Vec<PathBuf> {
        self.sonarr_root_folders
            .iter()
            .chain(self.radarr_root_folders.iter())
            .cloned()
            .collect()
    }
}

/// Streaming-activity oracle (Tautulli).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TautulliConfig {
    pub url: String,
    pub api_key: String,
}

impl TautulliConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty()
    }
}

/// Configuration for logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("/mnt/cache/downloads"),
            bulk_root: PathBuf::from("/mnt/bulk/downloads"),
            state_dir: PathBuf::from("/var/lib/torrent-shuttle"),
            log_file: None,
        }
    }
}

impl Default for QbitConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            username: "admin".to_string(),
            password: "adminadmin".to_string(),
            verify_tls: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            api_key: String::new(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processes: 3,
            max_concurrent_copy_operations: 1,
            copy_retry_attempts: 3,
            disk_space_threshold_gib: 100.0,
            dry_run: false,
            verification_enabled: true,
        }
    }
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            location_tagging_enabled: true,
            auto_tag_new: true,
            cache_tag: "ssd".to_string(),
            bulk_tag: "hdd".to_string(),
        }
    }
}

impl Default for IndexersConfig {
    fn default() -> Self {
        Self {
            notify_enabled: true,
            sonarr: IndexerConfig::default(),
            radarr: IndexerConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl QbitConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// First existing config file among the standard candidates, in precedence
/// order: `$TORRENT_SHUTTLE_CONFIG`, the per-user config directory, the
/// system-wide file, a `torrent-shuttle.toml` in the working directory.
fn discover_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("TORRENT_SHUTTLE_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    dirs::config_dir()
        .map(|dir| dir.join("torrent-shuttle").join("config.toml"))
        .into_iter()
        .chain([
            PathBuf::from("/etc/torrent-shuttle/config.toml"),
            PathBuf::from("torrent-shuttle.toml"),
        ])
        .find(|candidate| candidate.is_file())
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config document. The leading token disambiguates the format:
    /// a JSON document opens with `{`, anything else is read as TOML.
    fn parse(content: &str) -> Result<Self, ShuttleError> {
        if content.trim_start().starts_with('{') {
            serde_json::from_str(content).map_err(|e| ShuttleError::ParseError(e.to_string()))
        } else {
            toml::from_str(content).map_err(|e| ShuttleError::ParseError(e.to_string()))
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ShuttleError> {
        std::fs::read_to_string(path)
            .map_err(|e| ShuttleError::IoError(format!("{}: {e}", path.display())))
            .and_then(|content| Self::parse(&content))
    }

    pub fn merge_from_env(mut self) -> Result<Self, ShuttleError> {
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_CACHE_ROOT") {
            self.paths.cache_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_BULK_ROOT") {
            self.paths.bulk_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_STATE_DIR") {
            self.paths.state_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_QBIT_HOST") {
            self.qbit.host = val;
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_QBIT_PORT") {
            self.qbit.port = val.parse().map_err(|_| {
                ShuttleError::InvalidArgument("TORRENT_SHUTTLE_QBIT_PORT has invalid format".into())
            })?;
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_QBIT_USERNAME") {
            self.qbit.username = val;
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_QBIT_PASSWORD") {
            self.qbit.password = val;
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_HTTP_PORT") {
            self.http.port = val.parse().map_err(|_| {
                ShuttleError::InvalidArgument("TORRENT_SHUTTLE_HTTP_PORT has invalid format".into())
            })?;
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_API_KEY") {
            self.http.api_key = val;
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_DRY_RUN") {
            self.processing.dry_run = matches!(val.as_str(), "1" | "true" | "yes");
        }
        if let Ok(val) = std::env::var("TORRENT_SHUTTLE_LOG_LEVEL") {
            self.logging.level = val;
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if cli.dry_run {
            self.processing.dry_run = true;
        }
        self
    }

    pub fn load() -> Result<Self, ShuttleError> {
        Self::load_with_cli(&CliArgs::default())
    }

    /// Effective configuration: an explicit `--config` path (which must
    /// exist), else the first discovered standard location, else defaults;
    /// environment and CLI overrides applied on top.
    pub fn load_with_cli(cli: &CliArgs) -> Result<Self, ShuttleError> {
        let base = match cli.config_file.clone().or_else(discover_config_file) {
            Some(path) => {
                tracing::info!("Loading config from: {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> Result<(), ShuttleError> {
        let mut issues = Vec::new();

        if self.qbit.username.is_empty() || self.qbit.password.is_empty() {
            issues.push(ValidationIssue {
                field: "qbit.username/password".to_string(),
                message: "credentials cannot be empty".to_string(),
            });
        }
        if self.qbit.port == 0 {
            issues.push(ValidationIssue {
                field: "qbit.port".to_string(),
                message: "port must be in [1, 65535]".to_string(),
            });
        }
        if self.http.port == 0 {
            issues.push(ValidationIssue {
                field: "http.port".to_string(),
                message: "port must be in [1, 65535]".to_string(),
            });
        }
        if self.tags.cache_tag.is_empty() || self.tags.bulk_tag.is_empty() {
            issues.push(ValidationIssue {
                field: "tags.cache_tag/bulk_tag".to_string(),
                message: "location tags cannot be empty".to_string(),
            });
        } else if self.tags.cache_tag == self.tags.bulk_tag {
            issues.push(ValidationIssue {
                field: "tags.cache_tag/bulk_tag".to_string(),
                message: "location tags must be distinct".to_string(),
            });
        }
        if self.processing.copy_retry_attempts < 1 {
            issues.push(ValidationIssue {
                field: "processing.copy_retry_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.processing.max_concurrent_processes < 1 {
            issues.push(ValidationIssue {
                field: "processing.max_concurrent_processes".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.processing.max_concurrent_copy_operations < 1 {
            issues.push(ValidationIssue {
                field: "processing.max_concurrent_copy_operations".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.import_mode.enabled {
            if !self.tautulli.is_configured() {
                issues.push(ValidationIssue {
                    field: "tautulli.url/api_key".to_string(),
                    message: "required when import mode is enabled".to_string(),
                });
            }
            if self.import_mode.library_roots().is_empty() {
                issues.push(ValidationIssue {
                    field: "import_mode.sonarr_root_folders/radarr_root_folders".to_string(),
                    message: "at least one library root is required".to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ShuttleError::ValidationError(issues))
        }
    }

    /// Log an operator-facing summary of the effective configuration.
    pub fn log_summary(&self) {
        tracing::info!(
            cache_root = %self.paths.cache_root.display(),
            bulk_root = %self.paths.bulk_root.display(),
            state_dir = %self.paths.state_dir.display(),
            "storage tiers"
        );
        tracing::info!(
            qbit = %self.qbit.base_url(),
            http = %format!("{}:{}", self.http.host, self.http.port),
            "endpoints"
        );
        tracing::info!(
            max_processes = self.processing.max_concurrent_processes,
            max_copies = self.processing.max_concurrent_copy_operations,
            retry_attempts = self.processing.copy_retry_attempts,
            threshold_gib = self.processing.disk_space_threshold_gib,
            dry_run = self.processing.dry_run,
            "processing"
        );
        tracing::info!(
            tagging = self.tags.location_tagging_enabled,
            cache_tag = %self.tags.cache_tag,
            bulk_tag = %self.tags.bulk_tag,
            import_mode = self.import_mode.enabled,
            sonarr = self.indexers.sonarr.is_configured(),
            radarr = self.indexers.radarr.is_configured(),
            tautulli = self.tautulli.is_configured(),
            "features"
        );
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub dry_run: bool,
}
