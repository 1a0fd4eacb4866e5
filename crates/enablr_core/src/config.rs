//! Runtime settings for hosts embedding the core.
//!
//! Every value has a default; `ENABLR_*` environment variables override it.
//! A set but unparsable variable is an error rather than a silent default.

use crate::logging::LogLevel;
use crate::retry::{BackoffConfig, RetryPolicy};
use crate::transport::QueueSettings;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const DB_PATH_ENV: &str = "ENABLR_DB_PATH";
pub const LOG_DIR_ENV: &str = "ENABLR_LOG_DIR";
pub const LOG_LEVEL_ENV: &str = "ENABLR_LOG_LEVEL";
pub const MAX_WRITE_ATTEMPTS_ENV: &str = "ENABLR_MAX_WRITE_ATTEMPTS";
pub const BACKOFF_BASE_MS_ENV: &str = "ENABLR_BACKOFF_BASE_MS";
pub const MAX_RECEIVE_COUNT_ENV: &str = "ENABLR_MAX_RECEIVE_COUNT";

const DEFAULT_DB_FILE: &str = "enablr.sqlite3";
const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { key, value, reason } => {
                write!(f, "invalid value `{value}` for {key}: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    /// No file logging when unset.
    pub log_dir: Option<PathBuf>,
    pub log_level: LogLevel,
    pub retry: RetryPolicy,
    pub queue: QueueSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            log_dir: None,
            log_level: LogLevel::build_default(),
            retry: RetryPolicy {
                max_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
                backoff: BackoffConfig::exponential(DEFAULT_BACKOFF_BASE_MS),
            },
            queue: QueueSettings::default(),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(path) = read(DB_PATH_ENV) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(dir) = read(LOG_DIR_ENV) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = read(LOG_LEVEL_ENV) {
            config.log_level = LogLevel::parse(&level).ok_or(ConfigError::Invalid {
                key: LOG_LEVEL_ENV,
                value: level,
                reason: "expected trace|debug|info|warn|error",
            })?;
        }
        if let Some(raw) = read(MAX_WRITE_ATTEMPTS_ENV) {
            config.retry.max_attempts = parse_positive(MAX_WRITE_ATTEMPTS_ENV, raw)?;
        }
        if let Some(raw) = read(BACKOFF_BASE_MS_ENV) {
            let base_ms: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                key: BACKOFF_BASE_MS_ENV,
                value: raw.clone(),
                reason: "expected milliseconds",
            })?;
            config.retry.backoff = if base_ms == 0 {
                BackoffConfig::None
            } else {
                BackoffConfig::exponential(base_ms)
            };
        }
        if let Some(raw) = read(MAX_RECEIVE_COUNT_ENV) {
            config.queue.max_receive_count = parse_positive(MAX_RECEIVE_COUNT_ENV, raw)?;
        }

        Ok(config)
    }
}

fn parse_positive(key: &'static str, raw: String) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a positive integer",
        }),
    }
}
