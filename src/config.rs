//! Application-level configuration loading: backend selection and credentials,
//! log verbosity, media defaults and controller timings.

use std::{env, fmt, fs, io::ErrorKind, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Default location on disk where the application looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PGF_CONFIG_PATH";
const BACKEND_ENV: &str = "PGF_BACKEND";
const BACKEND_URL_ENV: &str = "PGF_BACKEND_URL";
const BACKEND_KEY_ENV: &str = "PGF_BACKEND_KEY";
const LOG_LEVEL_ENV: &str = "PGF_LOG_LEVEL";
const PLACEHOLDER_IMAGE_ENV: &str = "PGF_PLACEHOLDER_IMAGE";
const STORAGE_BUCKET_ENV: &str = "PGF_STORAGE_BUCKET";

const DEFAULT_STORAGE_BUCKET: &str = "avatars";
const DEFAULT_PROFILE_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PROFILE_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_PROFILE_RETRY_SPACING: Duration = Duration::from_secs(3);
const DEFAULT_NOTIFICATION_POLL: Duration = Duration::from_secs(30);

/// Configuration problems that prevent start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A mandatory setting is absent or empty.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    /// A setting holds a value outside its accepted set.
    #[error("invalid value `{value}` for `{name}`")]
    Invalid {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
    /// The configuration file exists but could not be read or parsed.
    #[error("failed to load config file `{path}`: {reason}")]
    File {
        /// Path that was read.
        path: String,
        /// I/O or parse failure.
        reason: String,
    },
}

/// Log verbosity accepted by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Failures only.
    Error,
    /// Failures and degraded paths.
    #[default]
    Warn,
    /// Lifecycle events such as sign-in or catalog loads.
    Info,
    /// Every backend call and realtime event.
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

/// Which backend implementation the binary talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSettings {
    /// Hosted Supabase-compatible backend.
    Supabase {
        /// Project URL.
        url: String,
        /// Anonymous API key sent with every request.
        api_key: String,
    },
    /// In-process backend, for demos and local runs.
    Memory,
}

/// Controller timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Upper bound on a profile lookup before it counts as "not found".
    pub profile_fetch_timeout: Duration,
    /// Background attempts to create a profile row after a failed insert.
    pub profile_retry_attempts: u32,
    /// Delay before each of those attempts.
    pub profile_retry_spacing: Duration,
    /// How often the notification list is refetched.
    pub notification_poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            profile_fetch_timeout: DEFAULT_PROFILE_FETCH_TIMEOUT,
            profile_retry_attempts: DEFAULT_PROFILE_RETRY_ATTEMPTS,
            profile_retry_spacing: DEFAULT_PROFILE_RETRY_SPACING,
            notification_poll_interval: DEFAULT_NOTIFICATION_POLL,
        }
    }
}

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Backend the binary connects to.
    pub backend: BackendSettings,
    /// Verbosity used when `RUST_LOG` is unset.
    pub log_level: LogLevel,
    /// Image shown on cards for games without any image; `None` renders the
    /// built-in placeholder.
    pub placeholder_image: Option<String>,
    /// Object storage bucket receiving game images.
    pub storage_bucket: String,
    /// Timeouts, retries and polling.
    pub timings: Timings,
}

impl Default for AppConfig {
    /// In-memory backend with default settings.
    fn default() -> Self {
        Self {
            backend: BackendSettings::Memory,
            log_level: LogLevel::default(),
            placeholder_image: None,
            storage_bucket: DEFAULT_STORAGE_BUCKET.to_string(),
            timings: Timings::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    backend: Option<String>,
    backend_url: Option<String>,
    backend_key: Option<String>,
    log_level: Option<String>,
    placeholder_image: Option<String>,
    storage_bucket: Option<String>,
    profile_fetch_timeout_ms: Option<u64>,
    profile_retry_attempts: Option<u32>,
    profile_retry_spacing_ms: Option<u64>,
    notification_poll_interval_ms: Option<u64>,
}

impl AppConfig {
    /// Load the configuration file, then apply environment overrides.
    ///
    /// A missing file is fine; a missing backend endpoint or key is not.
    pub fn load() -> Result<Self, ConfigError> {
        let raw = read_config_file()?;
        Self::from_sources(raw, |name| env::var(name).ok())
    }

    fn from_sources<F>(raw: RawConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let setting = |name: &str, file_value: Option<String>| {
            lookup(name)
                .or(file_value)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let backend = match setting(BACKEND_ENV, raw.backend).as_deref() {
            None | Some("supabase") => BackendSettings::Supabase {
                url: setting(BACKEND_URL_ENV, raw.backend_url)
                    .ok_or(ConfigError::Missing(BACKEND_URL_ENV))?,
                api_key: setting(BACKEND_KEY_ENV, raw.backend_key)
                    .ok_or(ConfigError::Missing(BACKEND_KEY_ENV))?,
            },
            Some("memory") => BackendSettings::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: BACKEND_ENV,
                    value: other.to_string(),
                });
            }
        };

        let log_level = match setting(LOG_LEVEL_ENV, raw.log_level) {
            None => LogLevel::default(),
            Some(value) => value.parse().unwrap_or_else(|()| {
                warn!(value = %value, "unknown log level; using warn");
                LogLevel::Warn
            }),
        };

        let defaults = Timings::default();
        let timings = Timings {
            profile_fetch_timeout: raw
                .profile_fetch_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.profile_fetch_timeout),
            profile_retry_attempts: raw
                .profile_retry_attempts
                .unwrap_or(defaults.profile_retry_attempts),
            profile_retry_spacing: raw
                .profile_retry_spacing_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.profile_retry_spacing),
            notification_poll_interval: raw
                .notification_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.notification_poll_interval),
        };

        Ok(Self {
            backend,
            log_level,
            placeholder_image: setting(PLACEHOLDER_IMAGE_ENV, raw.placeholder_image),
            storage_bucket: setting(STORAGE_BUCKET_ENV, raw.storage_bucket)
                .unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string()),
            timings,
        })
    }
}

fn read_config_file() -> Result<RawConfig, ConfigError> {
    let path = resolve_config_path();
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let raw = serde_json::from_str::<RawConfig>(&contents).map_err(|err| ConfigError::File {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
            info!(path = %path.display(), "loaded config file");
            Ok(raw)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "config file not found; using environment only");
            Ok(RawConfig::default())
        }
        Err(err) => Err(ConfigError::File {
            path: path.display().to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_with(raw: RawConfig, vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_sources(raw, |name| vars.get(name).cloned())
    }

    #[test]
    fn backend_credentials_are_required() {
        let err = load_with(RawConfig::default(), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(BACKEND_URL_ENV)));

        let err = load_with(
            RawConfig::default(),
            &[(BACKEND_URL_ENV, "https://x.supabase.co"), (BACKEND_KEY_ENV, "  ")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(BACKEND_KEY_ENV)));
    }

    #[test]
    fn environment_overrides_file() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "backend_url": "https://file.supabase.co",
                "backend_key": "file-key",
                "log_level": "info",
                "profile_fetch_timeout_ms": 1500
            }"#,
        )
        .unwrap();
        let config = load_with(raw, &[(BACKEND_KEY_ENV, "env-key")]).unwrap();

        assert_eq!(
            config.backend,
            BackendSettings::Supabase {
                url: "https://file.supabase.co".into(),
                api_key: "env-key".into(),
            }
        );
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.timings.profile_fetch_timeout, Duration::from_millis(1500));
        assert_eq!(config.timings.profile_retry_attempts, 3);
        assert_eq!(config.storage_bucket, "avatars");
        assert_eq!(config.placeholder_image, None);
    }

    #[test]
    fn memory_backend_needs_no_credentials_and_bad_level_falls_back() {
        let config = load_with(
            RawConfig::default(),
            &[(BACKEND_ENV, "memory"), (LOG_LEVEL_ENV, "chatty")],
        )
        .unwrap();
        assert_eq!(config.backend, BackendSettings::Memory);
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = load_with(RawConfig::default(), &[(BACKEND_ENV, "firebase")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
