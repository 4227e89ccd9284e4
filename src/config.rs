//! Configuration for the WhatsApp session and sender
//!
//! Loads configuration from config.yml file

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Default constants (fallback if config.yml not found)
pub const CLIENT_ID: &str = "patient-watcher";
pub const AUTH_DIR: &str = ".wwebjs_auth";
pub const WEB_URL: &str = "https://web.whatsapp.com";
pub const SEND_DELAY_SECS: u64 = 3;
pub const AUTH_TIMEOUT_SECS: u64 = 120;
pub const LAUNCH_TIMEOUT_SECS: u64 = 30;
pub const QR_MAX_RETRIES: u32 = 0;

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    whatsapp: Option<WhatsAppConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppConfig {
    client_id: Option<String>,
    auth_dir: Option<String>,
    web_url: Option<String>,
    browser_path: Option<String>,
    headless: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    send_delay_secs: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    auth_timeout_secs: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    launch_timeout_secs: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    qr_max_retries: Option<String>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of the persisted login, one browser profile per id
    pub client_id: String,
    /// Root directory holding `session-<client_id>` profiles
    pub auth_dir: PathBuf,
    pub web_url: String,
    pub browser_path: Option<PathBuf>,
    pub headless: bool,
    /// Pause after a successful send so the page can flush it
    pub send_delay: Duration,
    pub auth_timeout: Duration,
    pub launch_timeout: Duration,
    /// 0 means unlimited
    pub qr_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    /// A config.yml that exists but cannot be parsed is logged and skipped.
    pub fn new() -> Self {
        Self::discover_in(Path::new(".")).unwrap_or_else(|err| {
            warn!("Ignoring config file: {}", err);
            Self::from_env()
        })
    }

    /// Load an explicit config file, or fall back to the usual search when none is given.
    /// Unlike [`Config::new`], a broken config.yml found by the search is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::discover_in(Path::new(".")),
        }
    }

    /// Use the first existing `config.yml` in `dir` or its parent, else defaults plus env.
    pub fn discover_in(dir: &Path) -> Result<Self> {
        for candidate in [dir.join("config.yml"), dir.join("..").join("config.yml")] {
            if candidate.is_file() {
                return Self::load_from_file(&candidate);
            }
        }
        Ok(Self::from_env())
    }

    fn from_env() -> Self {
        Self::load_dotenv();
        Self::resolve(WhatsAppConfig::default())
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        // If value from YAML looks like ${...}, try env var
        if let Some(ref v) = value {
            if let Some(var_name) = placeholder_name(v) {
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        // Also check explicit env_key as fallback
        if let Ok(env_val) = std::env::var(env_key) {
            if !env_val.is_empty() {
                return Some(env_val);
            }
        }
        value.filter(|v| placeholder_name(v).is_none() && !v.is_empty())
    }

    /// Resolve an unsigned value from string config or env var
    fn resolve_env_u64(value: Option<String>, env_key: &str, default: u64) -> u64 {
        if let Some(ref v) = value {
            if let Some(var_name) = placeholder_name(v) {
                if let Ok(env_val) = std::env::var(var_name) {
                    if let Ok(parsed) = env_val.parse::<u64>() {
                        return parsed;
                    }
                }
            }
            // Try parsing directly if it's a number
            if let Ok(parsed) = v.parse::<u64>() {
                return parsed;
            }
        }
        // Fallback: check explicit env_key
        if let Ok(env_val) = std::env::var(env_key) {
            if let Ok(parsed) = env_val.parse::<u64>() {
                return parsed;
            }
        }
        default
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        // Try to load from current directory first, then parent
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Load .env file first
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let yaml: YamlConfig = serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Ok(Self::resolve(yaml.whatsapp.unwrap_or_default()))
    }

    fn resolve(whatsapp: WhatsAppConfig) -> Self {
        let client_id = Self::resolve_env_string(whatsapp.client_id, "WHATSAPP_CLIENT_ID")
            .unwrap_or_else(|| CLIENT_ID.to_string());
        let auth_dir = Self::resolve_env_string(whatsapp.auth_dir, "WHATSAPP_AUTH_DIR")
            .unwrap_or_else(|| AUTH_DIR.to_string());
        let web_url = Self::resolve_env_string(whatsapp.web_url, "WHATSAPP_WEB_URL")
            .unwrap_or_else(|| WEB_URL.to_string());
        let browser_path =
            Self::resolve_env_string(whatsapp.browser_path, "CHROME_PATH").map(PathBuf::from);

        let qr_max_retries = Self::resolve_env_u64(
            whatsapp.qr_max_retries,
            "WHATSAPP_QR_MAX_RETRIES",
            QR_MAX_RETRIES as u64,
        );

        Self {
            client_id,
            auth_dir: PathBuf::from(auth_dir),
            web_url,
            browser_path,
            headless: whatsapp.headless.unwrap_or(true),
            send_delay: Duration::from_secs(Self::resolve_env_u64(
                whatsapp.send_delay_secs,
                "WHATSAPP_SEND_DELAY_SECS",
                SEND_DELAY_SECS,
            )),
            auth_timeout: Duration::from_secs(Self::resolve_env_u64(
                whatsapp.auth_timeout_secs,
                "WHATSAPP_AUTH_TIMEOUT_SECS",
                AUTH_TIMEOUT_SECS,
            )),
            launch_timeout: Duration::from_secs(Self::resolve_env_u64(
                whatsapp.launch_timeout_secs,
                "WHATSAPP_LAUNCH_TIMEOUT_SECS",
                LAUNCH_TIMEOUT_SECS,
            )),
            qr_max_retries: u32::try_from(qr_max_retries).unwrap_or(u32::MAX),
        }
    }

    /// Create config with built-in defaults only, ignoring files and environment
    pub fn defaults() -> Self {
        Self {
            client_id: CLIENT_ID.to_string(),
            auth_dir: PathBuf::from(AUTH_DIR),
            web_url: WEB_URL.to_string(),
            browser_path: None,
            headless: true,
            send_delay: Duration::from_secs(SEND_DELAY_SECS),
            auth_timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
            launch_timeout: Duration::from_secs(LAUNCH_TIMEOUT_SECS),
            qr_max_retries: QR_MAX_RETRIES,
        }
    }

    /// Browser profile directory for this client id.
    pub fn session_dir(&self) -> PathBuf {
        self.auth_dir.join(format!("session-{}", self.client_id))
    }

    /// Lock file guarding the profile directory.
    pub fn lock_path(&self) -> PathBuf {
        self.auth_dir.join(format!("session-{}.lock", self.client_id))
    }
}

fn placeholder_name(value: &str) -> Option<&str> {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
}
