use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub registries: RegistryConfig,
    #[serde(default)]
    pub paths: PathConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RegistryConfig {
    /// Public registry artifacts are downloaded from
    #[serde(default = "default_source_registry")]
    pub source: String,
    /// Registry of the local runtime
    #[serde(default = "default_local_registry")]
    pub local: String,
    /// Administrative mirror, required only for `upload`
    pub mirror: Option<String>,
    /// Bearer token forwarded to every registry when set
    pub token: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PathConfig {
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_model_store")]
    pub model_store: PathBuf,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TransferConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub progress: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MirrorConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_remote_archive_dir")]
    pub remote_archive_dir: String,
    #[serde(default = "default_remote_import_command")]
    pub remote_import_command: String,
    /// Re-list the mirror after triggering its import and report whether the
    /// artifact showed up
    #[serde(default)]
    pub verify_remote_import: bool,
}

// Default value functions
fn default_source_registry() -> String {
    "https://models.example.org/api".to_string()
}
fn default_local_registry() -> String {
    "http://127.0.0.1:8080/api".to_string()
}
fn default_staging_root() -> PathBuf {
    data_dir().join("staging")
}
fn default_archive_dir() -> PathBuf {
    data_dir().join("archives")
}
fn default_model_store() -> PathBuf {
    data_dir().join("models")
}
fn default_upload_dir() -> PathBuf {
    data_dir().join("uploads")
}
const fn default_concurrency() -> usize {
    1
}
const fn default_download_attempts() -> u32 {
    3
}
const fn default_retry_delay_ms() -> u64 {
    500
}
const fn default_request_timeout_secs() -> u64 {
    300
}
const fn default_true() -> bool {
    true
}
const fn default_ssh_port() -> u16 {
    22
}
fn default_remote_archive_dir() -> String {
    "/var/lib/modelsync/archives".to_string()
}
fn default_remote_import_command() -> String {
    "modelsync import".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source: default_source_registry(),
            local: default_local_registry(),
            mirror: None,
            token: None,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            staging_root: default_staging_root(),
            archive_dir: default_archive_dir(),
            model_store: default_model_store(),
            upload_dir: default_upload_dir(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            download_attempts: default_download_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            progress: default_true(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            port: default_ssh_port(),
            identity_file: None,
            remote_archive_dir: default_remote_archive_dir(),
            remote_import_command: default_remote_import_command(),
            verify_remote_import: false,
        }
    }
}

impl Config {
    /// Load config from the XDG location, falling back to defaults, then apply
    /// environment overrides
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| {
            SyncError::Config(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Apply `MODELSYNC_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("MODELSYNC_SOURCE_REGISTRY") {
            self.registries.source = url;
        }
        if let Ok(url) = std::env::var("MODELSYNC_LOCAL_REGISTRY") {
            self.registries.local = url;
        }
        if let Ok(url) = std::env::var("MODELSYNC_MIRROR_REGISTRY") {
            self.registries.mirror = Some(url);
        }
        if let Ok(token) = std::env::var("MODELSYNC_TOKEN") {
            self.registries.token = Some(token);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        check_url("registries.source", &self.registries.source)?;
        check_url("registries.local", &self.registries.local)?;
        if let Some(mirror) = &self.registries.mirror {
            check_url("registries.mirror", mirror)?;
        }

        if self.transfer.concurrency == 0 {
            return Err(SyncError::Config(
                "transfer.concurrency must be at least 1".to_string(),
            ));
        }
        if self.transfer.download_attempts == 0 {
            return Err(SyncError::Config(
                "transfer.download_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Mirror registry URL, required by `upload`
    pub fn mirror_registry(&self) -> Result<&str> {
        self.registries.mirror.as_deref().ok_or_else(|| {
            SyncError::Config("registries.mirror is not set; upload needs a mirror".to_string())
        })
    }
}

fn check_url(field: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(SyncError::Config(format!(
            "{field} must be an http(s) URL, got '{url}'"
        )))
    }
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        dirs::home_dir()
            .ok_or_else(|| SyncError::Config("HOME env var not set".to_string()))?
            .join(".config")
    };

    Ok(config_dir.join("modelsync").join("config.toml"))
}

/// Get the data directory all default paths live under
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("modelsync")
}
