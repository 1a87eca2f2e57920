//! Shared configuration for apps embedding momo-sync.
//!
//! TOML profiles, bearer-token resolution (env + keyring + plaintext),
//! translation to `momo_core::SyncConfig`, and tracing setup.

pub mod logging;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use momo_api::{RecordId, TlsMode, UserRole};
use momo_core::{BackoffPolicy, ReconnectConfig, SyncConfig, UserContext};

pub use logging::LogFormat;

const KEYRING_SERVICE: &str = "momo-sync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    /// REST timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// WebSocket + STOMP handshake timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    #[serde(default = "default_heart_beat_ms")]
    pub heart_beat_ms: u64,

    #[serde(default)]
    pub insecure: bool,

    /// Persist collections to disk between runs.
    #[serde(default = "default_true")]
    pub offline_cache: bool,

    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            heart_beat_ms: default_heart_beat_ms(),
            insecure: false,
            offline_cache: true,
            journal_capacity: default_journal_capacity(),
            log_filter: default_log_filter(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_heart_beat_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_journal_capacity() -> usize {
    momo_core::config::DEFAULT_JOURNAL_CAPACITY
}
fn default_log_filter() -> String {
    "warn,momo_core=info,momo_api=info".into()
}

/// One backend account.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g., "http://10.0.2.2:8080").
    pub server: String,

    /// Signed-in user; required for request and assignment loads.
    pub user_id: Option<String>,

    /// "manager" or "employee".
    pub role: Option<String>,

    /// Bearer token in plaintext. Prefer the keyring or an env var.
    pub token: Option<String>,

    /// Environment variable name containing the bearer token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override REST timeout.
    pub timeout: Option<u64>,

    /// Override handshake timeout.
    pub connect_timeout: Option<u64>,

    /// Override the offline cache location.
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Profile {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            user_id: None,
            role: None,
            token: None,
            token_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            connect_timeout: None,
            cache_dir: None,
            reconnect: ReconnectSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconnectSettings {
    /// "exponential" or "fixed".
    #[serde(default = "default_backoff")]
    pub backoff: String,

    /// Fixed delay, or the first exponential step.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Exponential cap.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Consecutive failures before giving up; absent retries forever.
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub retry_on_auth_failure: bool,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            backoff: default_backoff(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            max_retries: None,
            retry_on_auth_failure: false,
        }
    }
}

fn default_backoff() -> String {
    "exponential".into()
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_max_retry_delay_ms() -> u64 {
    30_000
}

impl ReconnectSettings {
    pub fn to_reconnect_config(&self) -> Result<ReconnectConfig, ConfigError> {
        let backoff = match self.backoff.as_str() {
            "fixed" => BackoffPolicy::Fixed(Duration::from_millis(self.retry_delay_ms)),
            "exponential" => {
                if self.max_retry_delay_ms < self.retry_delay_ms {
                    return Err(ConfigError::Validation {
                        field: "reconnect.max_retry_delay_ms".into(),
                        reason: format!(
                            "{} is below retry_delay_ms {}",
                            self.max_retry_delay_ms, self.retry_delay_ms
                        ),
                    });
                }
                BackoffPolicy::Exponential {
                    initial: Duration::from_millis(self.retry_delay_ms),
                    max: Duration::from_millis(self.max_retry_delay_ms),
                }
            }
            other => {
                return Err(ConfigError::Validation {
                    field: "reconnect.backoff".into(),
                    reason: format!("expected 'exponential' or 'fixed', got '{other}'"),
                });
            }
        };

        Ok(ReconnectConfig {
            backoff,
            max_retries: self.max_retries,
            retry_on_auth_failure: self.retry_on_auth_failure,
        })
    }
}

impl Config {
    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, p)| (k.as_str(), p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }

    /// Build the runtime config for a profile.
    pub fn sync_config(&self, name: Option<&str>) -> Result<SyncConfig, ConfigError> {
        let (name, profile) = self.profile(name)?;
        profile_to_sync_config(profile, name, &self.defaults)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("app", "momo", "momo-sync")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Root under which each profile gets its offline cache directory.
pub fn cache_root() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("momo-sync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Provider chain: built-in defaults, then the TOML file, then `MOMO_*` env.
///
/// Nested keys use a double underscore, e.g. `MOMO_DEFAULTS__TIMEOUT=5`.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MOMO_").split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
}

/// Resolve the bearer token from the credential chain.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Save a token to the system keyring for later `resolve_token` calls.
pub fn store_token(profile_name: &str, token: &SecretString) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(token.expose_secret())?;
    Ok(())
}

/// Remove a stored token; a missing entry is not an error.
pub fn forget_token(profile_name: &str) -> Result<(), ConfigError> {
    match keyring_entry(profile_name)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn parse_role(raw: &str) -> Result<UserRole, ConfigError> {
    match raw {
        "manager" => Ok(UserRole::Manager),
        "employee" => Ok(UserRole::Employee),
        other => Err(ConfigError::Validation {
            field: "role".into(),
            reason: format!("expected 'manager' or 'employee', got '{other}'"),
        }),
    }
}

/// The signed-in user, if the profile names one.
pub fn resolve_user(profile: &Profile) -> Result<Option<UserContext>, ConfigError> {
    let Some(ref user_id) = profile.user_id else {
        return Ok(None);
    };
    let role = profile.role.as_deref().ok_or_else(|| ConfigError::Validation {
        field: "role".into(),
        reason: "required when user_id is set".into(),
    })?;

    Ok(Some(UserContext {
        user_id: RecordId::from(user_id.as_str()),
        role: parse_role(role)?,
    }))
}

/// Build a `SyncConfig` from a profile plus global defaults.
///
/// The token is resolved separately via [`resolve_token`]; it is handed to
/// `Controller::start`, not stored in the config.
pub fn profile_to_sync_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SyncConfig, ConfigError> {
    let url: url::Url = profile
        .server
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "server".into(),
            reason: format!("invalid URL: {}", profile.server),
        })?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let cache_dir = if defaults.offline_cache {
        profile
            .cache_dir
            .clone()
            .or_else(|| cache_root().map(|root| root.join(profile_name)))
    } else {
        None
    };

    let mut config = SyncConfig::new(url);
    config.user = resolve_user(profile)?;
    config.tls = tls;
    config.request_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.connect_timeout =
        Duration::from_secs(profile.connect_timeout.unwrap_or(defaults.connect_timeout));
    config.heart_beat = (defaults.heart_beat_ms, defaults.heart_beat_ms);
    config.reconnect = profile.reconnect.to_reconnect_config()?;
    config.cache_dir = cache_dir;
    config.journal_capacity = defaults.journal_capacity;
    Ok(config)
}
