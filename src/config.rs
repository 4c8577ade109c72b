//! Configuration for myday.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MYDAY_HOME, MYDAY_API_URL, MYDAY_API_TOKEN)
//! 2. Config file (.myday/config.yaml)
//! 3. Defaults (~/.myday)
//!
//! Config file discovery:
//! - Searches current directory and parents for .myday/config.yaml
//! - `paths.home` is relative to the .myday directory

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::ApiConfig;
use crate::core::BackoffPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Default API endpoint when nothing is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000/v1";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub api: Option<ApiFileConfig>,
    #[serde(default)]
    pub upload: Option<UploadFileConfig>,
    #[serde(default)]
    pub sync: Option<SyncFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to the .myday directory)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiFileConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadFileConfig {
    pub initial_delay_secs: Option<f64>,
    pub multiplier: Option<f64>,
    pub max_delay_secs: Option<f64>,
    pub max_attempts: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncFileConfig {
    pub interval_secs: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to myday home (entries, queue state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub api: ApiSettings,
    pub upload: UploadSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: None,
        }
    }
}

impl ApiSettings {
    pub fn to_api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.base_url.clone(),
            token: self.token.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadSettings {
    pub initial_delay_secs: f64,
    pub multiplier: f64,
    pub max_delay_secs: f64,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5.0,
            multiplier: 2.0,
            max_delay_secs: 900.0,
            max_attempts: 5,
            request_timeout_secs: 60,
        }
    }
}

impl UploadSettings {
    /// Explicit backoff policy for the upload queue
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            secs(self.initial_delay_secs),
            self.multiplier,
            secs(self.max_delay_secs),
            self.max_attempts,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".myday").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge file settings over defaults
fn apply_file(file: &ConfigFile) -> (ApiSettings, UploadSettings, SyncSettings) {
    let mut api = ApiSettings::default();
    if let Some(section) = &file.api {
        if let Some(url) = &section.base_url {
            api.base_url = url.clone();
        }
        api.token = section.token.clone();
    }

    let mut upload = UploadSettings::default();
    if let Some(section) = &file.upload {
        upload.initial_delay_secs = section.initial_delay_secs.unwrap_or(upload.initial_delay_secs);
        upload.multiplier = section.multiplier.unwrap_or(upload.multiplier);
        upload.max_delay_secs = section.max_delay_secs.unwrap_or(upload.max_delay_secs);
        upload.max_attempts = section.max_attempts.unwrap_or(upload.max_attempts);
        upload.request_timeout_secs = section
            .request_timeout_secs
            .unwrap_or(upload.request_timeout_secs);
    }

    let sync = SyncSettings {
        interval_secs: file
            .sync
            .as_ref()
            .and_then(|s| s.interval_secs)
            .unwrap_or(SyncSettings::default().interval_secs),
    };

    (api, upload, sync)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".myday");

    let config_file = find_config_file();

    let (file_home, mut api, upload, sync) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // home is relative to .myday/
        let myday_dir = config_path.parent().unwrap_or(Path::new("."));
        let home = config
            .paths
            .home
            .as_deref()
            .map(|home_path| resolve_path(myday_dir, home_path));

        let (api, upload, sync) = apply_file(&config);
        (home, api, upload, sync)
    } else {
        (
            None,
            ApiSettings::default(),
            UploadSettings::default(),
            SyncSettings::default(),
        )
    };

    let home = std::env::var("MYDAY_HOME")
        .map(PathBuf::from)
        .ok()
        .or(file_home)
        .unwrap_or(default_home);

    if let Ok(url) = std::env::var("MYDAY_API_URL") {
        api.base_url = url;
    }
    if let Ok(token) = std::env::var("MYDAY_API_TOKEN") {
        api.token = Some(token);
    }

    Ok(ResolvedConfig {
        home,
        config_file,
        api,
        upload,
        sync,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
