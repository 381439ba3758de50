//! `ak_config` - Configuration parsing and validation for anketa
//!
//! This crate provides:
//! - TOML configuration parsing
//! - Default value handling
//! - Environment variable overrides (`GOOGLE_CREDENTIALS`, `SHEET_ID`, ...)
//! - Path expansion (`~/` to home directory)
//! - Auto-discovery from standard config paths

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AkConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// HTTP server settings
    pub web: WebConfig,

    /// Google Sheets mirror settings
    pub sheets: SheetsConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Path to the `DuckDB` answer database
    pub db_path: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("answers.duckdb"),
        }
    }
}

/// Expand tilde in path to home directory
#[must_use]
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" && let Some(home) = dirs::home_dir() {
        return home;
    }
    path.to_path_buf()
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,

    /// Port
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Allowed origins for CORS (`*` allows any)
    pub cors_origins: Vec<String>,

    /// Front-end bundle directory; auto-detected when unset
    pub static_dir: Option<PathBuf>,

    /// Bearer token required by `/submit` and `/results` when set
    pub api_token: Option<String>,

    /// Maximum accepted request body, attachments included
    pub max_upload_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            static_dir: None,
            api_token: None,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Google Sheets mirror configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    /// Mirror submissions into the spreadsheet
    pub enabled: bool,

    /// Spreadsheet key (the id in the sheet URL)
    pub sheet_id: String,

    /// Worksheet tab name; created with a header row if missing
    pub sheet_tab: String,

    /// Inline service-account JSON, takes precedence over `credentials_file`
    pub credentials_json: Option<String>,

    /// Service-account key file
    pub credentials_file: PathBuf,

    /// Timeout for identity provider and Sheets API calls
    pub timeout_secs: u64,

    /// Display labels applied to raw answers before mirroring (e.g. `yes = "Да"`)
    pub answer_labels: BTreeMap<String, String>,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sheet_id: String::new(),
            sheet_tab: "Ответы".to_string(),
            credentials_json: None,
            credentials_file: PathBuf::from("credentials.json"),
            timeout_secs: 10,
            answer_labels: BTreeMap::new(),
        }
    }
}

impl SheetsConfig {
    /// Request timeout as Duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AkConfig {
    /// Standard config file paths, in order of precedence
    #[must_use]
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("anketa.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("anketa").join("anketa.toml"));
        }

        paths.push(PathBuf::from("/etc/anketa/anketa.toml"));

        paths
    }

    /// Discover and load configuration from standard paths.
    ///
    /// Returns defaults if no config file is found.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a discovered config file cannot be loaded.
    pub fn discover() -> Result<Self, ConfigError> {
        for path in Self::config_paths() {
            if path.exists() {
                info!(path = %path.display(), "Loading config from");
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Discover config and apply environment variable overrides.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if config discovery or validation fails.
    pub fn discover_with_env() -> Result<Self, ConfigError> {
        let mut config = Self::discover()?;
        config.apply_env_overrides();
        config.expand_all_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the text cannot be parsed or validated.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: AkConfig = toml::from_str(content)?;
        config.expand_all_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.expand_all_paths();
        config.validate()?;
        Ok(config)
    }

    /// Expand all paths in configuration (resolve `~/` to home directory)
    pub fn expand_all_paths(&mut self) {
        self.global.db_path = expand_path(&self.global.db_path);
        self.sheets.credentials_file = expand_path(&self.sheets.credentials_file);
        if let Some(dir) = self.web.static_dir.as_mut() {
            *dir = expand_path(dir);
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());

        if let Some(val) = get("DB_PATH") {
            self.global.db_path = PathBuf::from(val);
        }
        if let Some(val) = get("PORT")
            && let Ok(port) = val.trim().parse()
        {
            self.web.port = port;
        }
        if let Some(val) = get("AK_WEB_BIND") {
            self.web.bind_address = val;
        }
        if let Some(val) = get("AK_STATIC_DIR") {
            self.web.static_dir = Some(PathBuf::from(val));
        }
        if let Some(val) = get("API_TOKEN") {
            self.web.api_token = Some(val.trim().to_string());
        }
        if let Some(val) = get("SHEET_ID") {
            self.sheets.sheet_id = val.trim().to_string();
        }
        if let Some(val) = get("SHEET_TAB") {
            self.sheets.sheet_tab = val;
        }
        if let Some(val) = get("GOOGLE_CREDENTIALS") {
            self.sheets.credentials_json = Some(val);
        }
        if let Some(val) = get("GOOGLE_CREDENTIALS_FILE") {
            self.sheets.credentials_file = PathBuf::from(val);
        }
    }

    /// Validate configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when validation rules are violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web.port == 0 {
            return Err(ConfigError::ValidationError(
                "web.port must be > 0".to_string(),
            ));
        }

        if self.web.max_upload_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "web.max_upload_bytes must be > 0".to_string(),
            ));
        }

        if let Some(token) = &self.web.api_token
            && token.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "web.api_token must not be empty when set".to_string(),
            ));
        }

        if self.sheets.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sheets.timeout_secs must be > 0".to_string(),
            ));
        }

        if self.sheets.sheet_tab.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "sheets.sheet_tab must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Copy of the configuration with secrets replaced, for display
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.web.api_token.is_some() {
            copy.web.api_token = Some("<redacted>".to_string());
        }
        if copy.sheets.credentials_json.is_some() {
            copy.sheets.credentials_json = Some("<redacted>".to_string());
        }
        copy
    }
}
