//! Configuration management for the KMS bridge service
//!
//! Settings are layered: an optional `.env` file feeds the process
//! environment, then a configuration file, then `KMSBRIDGE__*` variables.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_VAR: &str = "KMSBRIDGE_CONFIG";

/// Configuration file used when `KMSBRIDGE_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "appsettings.json";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TOKEN_PIN: &str = "123456";
pub const DEFAULT_ON_TOKEN_KEY_ID: u8 = 1;

#[cfg(windows)]
pub const DEFAULT_TOKEN_LIBRARY: &str = "libykcs11-1.dll";
#[cfg(not(windows))]
pub const DEFAULT_TOKEN_LIBRARY: &str = "libykcs11.so";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Console,
}

/// Credentials used to verify request signatures
#[derive(Clone, PartialEq, Eq)]
pub struct SigningCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Request signature settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

impl SignatureConfig {
    /// Credentials exist only when both halves are present and non-blank
    pub fn credentials(&self) -> Option<SigningCredentials> {
        let access_key = non_blank(self.access_key.as_deref())?;
        let secret_key = non_blank(self.secret_key.as_deref())?;
        Some(SigningCredentials {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    /// Signing region, defaulting to "us-east-1"
    pub fn region(&self) -> &str {
        non_blank(self.region.as_deref()).unwrap_or(DEFAULT_REGION)
    }
}

/// Hardware token settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Path to the PKCS#11 provider library
    pub library_path: Option<PathBuf>,
    /// PIN used by keys that do not carry their own
    pub pin: Option<String>,
}

impl TokenConfig {
    pub fn library_path(&self) -> PathBuf {
        self.library_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_LIBRARY))
    }

    pub fn default_pin(&self) -> &str {
        non_blank(self.pin.as_deref()).unwrap_or(DEFAULT_TOKEN_PIN)
    }
}

/// One configured logical key
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeyEntryConfig {
    /// Serial number of the token holding the key
    pub serial: Option<String>,
    pub pin: Option<String>,
    /// Key object id on the token (CKA_ID), 0 means 1
    pub id: Option<u8>,
}

impl KeyEntryConfig {
    pub fn serial(&self) -> Option<&str> {
        non_blank(self.serial.as_deref())
    }

    pub fn pin(&self) -> Option<&str> {
        non_blank(self.pin.as_deref())
    }

    pub fn on_token_id(&self) -> u8 {
        match self.id {
            None | Some(0) => DEFAULT_ON_TOKEN_KEY_ID,
            Some(id) => id,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen: String,
    pub max_request_body_bytes: usize,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
    pub signature: SignatureConfig,
    pub token: TokenConfig,
    pub keys: BTreeMap<String, KeyEntryConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            max_request_body_bytes: 4096,
            log_level: None,
            log_format: LogFormat::default(),
            signature: SignatureConfig::default(),
            token: TokenConfig::default(),
            keys: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the file named by `KMSBRIDGE_CONFIG` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        match env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path), true),
            Err(_) => Self::from_file(Path::new(DEFAULT_CONFIG_PATH), false),
        }
    }

    /// Load configuration from a file, overlaid with `KMSBRIDGE__*` variables
    pub fn from_file(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(required))
            .add_source(
                config::Environment::with_prefix("KMSBRIDGE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut app_config: AppConfig = settings.try_deserialize()?;
        if let Some(keys) = read_key_table(path)? {
            app_config.keys = merge_key_tables(keys, app_config.keys);
        }
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_request_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_request_body_bytes must be greater than zero".to_string(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|e| {
            ConfigError::Invalid(format!("listen address \"{}\": {}", self.listen, e))
        })
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

/// Top-level `keys` table of a JSON configuration file, keys verbatim
#[derive(Deserialize)]
struct KeyTableFile {
    #[serde(default)]
    keys: Option<BTreeMap<String, KeyEntryConfig>>,
}

/// Read the `keys` table straight from a JSON file
///
/// The layered loader folds map keys to lowercase, which would rename
/// mixed-case key ids. Returns `None` for non-JSON or absent files.
fn read_key_table(path: &Path) -> Result<Option<BTreeMap<String, KeyEntryConfig>>, ConfigError> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json || !path.is_file() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        ConfigError::Invalid(format!("reading {}: {}", path.display(), e))
    })?;
    let file: KeyTableFile = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::Invalid(format!("keys table in {}: {}", path.display(), e))
    })?;
    Ok(file.keys)
}

/// File entries win; layered entries survive only when no file key folds to them
fn merge_key_tables(
    mut file_keys: BTreeMap<String, KeyEntryConfig>,
    layered: BTreeMap<String, KeyEntryConfig>,
) -> BTreeMap<String, KeyEntryConfig> {
    for (key_id, entry) in layered {
        let shadowed = file_keys
            .keys()
            .any(|file_id| file_id.to_lowercase() == key_id);
        if !shadowed {
            file_keys.insert(key_id, entry);
        }
    }
    file_keys
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
