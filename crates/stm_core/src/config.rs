//! Process configuration.
//!
//! # Responsibility
//! - Load settings from an optional JSON file, then apply `STM_*`
//!   environment overrides.
//! - Convert settings into storage, manager and token options.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - `validate()` runs after overrides, so env values are checked too.

use crate::auth::token::{TokenError, TokenSigner};
use crate::db::DbOptions;
use crate::logging::LogLevel;
use crate::model::project::DEFAULT_MAX_DESCRIPTION_LENGTH;
use crate::service::options::ServiceOptions;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "STM_";

/// Settings shared by the api boundary and the cli.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// SQLite file; required by the api boundary.
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// Absolute directory for rotating logs; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// HMAC secret; a random per-process secret is used when unset.
    pub token_secret: Option<String>,
    pub token_validity_secs: u64,
    pub max_description_length: usize,
    pub busy_timeout_ms: u64,
    pub operation_timeout_ms: Option<u64>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: LogLevel::default_for_build().as_str().to_string(),
            log_dir: None,
            token_secret: None,
            token_validity_secs: 24 * 60 * 60,
            max_description_length: DEFAULT_MAX_DESCRIPTION_LENGTH,
            busy_timeout_ms: 5_000,
            operation_timeout_ms: None,
        }
    }
}

/// Configuration loading or validation failure.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    InvalidValue { key: String, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::InvalidValue { key, message } => write!(f, "invalid value for {key}: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::Parse)
    }

    /// Reads `path` (when given), applies process env overrides and
    /// validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_json_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `STM_<FIELD>` variables resolved by `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = var("TOKEN_SECRET") {
            self.token_secret = Some(value);
        }
        if let Some(value) = var("TOKEN_VALIDITY_SECS") {
            self.token_validity_secs = parse_env("TOKEN_VALIDITY_SECS", &value)?;
        }
        if let Some(value) = var("MAX_DESCRIPTION_LENGTH") {
            self.max_description_length = parse_env("MAX_DESCRIPTION_LENGTH", &value)?;
        }
        if let Some(value) = var("BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms = parse_env("BUSY_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = var("OPERATION_TIMEOUT_MS") {
            self.operation_timeout_ms = Some(parse_env("OPERATION_TIMEOUT_MS", &value)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log_level()?;
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(invalid("log_dir", "must be an absolute path"));
            }
        }
        if self.token_secret.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("token_secret", "must not be empty when set"));
        }
        if self.token_validity_secs == 0 {
            return Err(invalid("token_validity_secs", "must be greater than zero"));
        }
        if self.max_description_length == 0 {
            return Err(invalid("max_description_length", "must be greater than zero"));
        }
        if self.operation_timeout_ms == Some(0) {
            return Err(invalid("operation_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        LogLevel::from_str(&self.log_level).map_err(|err| invalid("log_level", err))
    }

    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            max_description_length: self.max_description_length,
            operation_timeout: self.operation_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Signer over the configured secret, or a random one when unset.
    pub fn token_signer(&self) -> Result<TokenSigner, TokenError> {
        let validity = Duration::from_secs(self.token_validity_secs);
        match &self.token_secret {
            Some(secret) => TokenSigner::new(secret.as_bytes().to_vec(), validity),
            None => Ok(TokenSigner::with_random_secret(validity)),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| invalid(&format!("{ENV_PREFIX}{name}"), err))
}

fn invalid(key: &str, message: impl Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn empty_object_yields_defaults() {
        let config = CoreConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.token_validity_secs, 86_400);
        assert_eq!(config.max_description_length, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = CoreConfig::from_json_str(r#"{"port": 8080}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut config = CoreConfig::from_json_str(r#"{"busy_timeout_ms": 1}"#).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("STM_DATABASE_PATH", "/tmp/stm.db"),
            ("STM_BUSY_TIMEOUT_MS", "250"),
            ("STM_OPERATION_TIMEOUT_MS", "1500"),
        ]);
        config
            .apply_env_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/stm.db")));
        assert_eq!(config.db_options().busy_timeout, Duration::from_millis(250));
        assert_eq!(
            config.service_options().operation_timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn unparsable_env_value_names_the_variable() {
        let mut config = CoreConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "STM_TOKEN_VALIDITY_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("STM_TOKEN_VALIDITY_SECS"));
    }

    #[test]
    fn validate_rejects_nonsensical_values() {
        let cases = [
            CoreConfig {
                token_validity_secs: 0,
                ..CoreConfig::default()
            },
            CoreConfig {
                max_description_length: 0,
                ..CoreConfig::default()
            },
            CoreConfig {
                log_level: "loud".to_string(),
                ..CoreConfig::default()
            },
            CoreConfig {
                log_dir: Some(PathBuf::from("relative/logs")),
                ..CoreConfig::default()
            },
            CoreConfig {
                token_secret: Some(String::new()),
                ..CoreConfig::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
