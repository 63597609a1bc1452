//! Application settings loaded from environment variables.
//!
//! Values are resolved in order of precedence:
//!
//! 1. Process environment (highest)
//! 2. `.env`-style file (optional)
//! 3. Built-in defaults (lowest)

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use strum::{AsRefStr, Display, EnumString, VariantNames};

use crate::constants;
use crate::error::ConfigError;

/// Env file read by [`Settings::load`].
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Log verbosity accepted by the `LOG_LEVEL` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, VariantNames)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Log encoding accepted by the `LOG_FORMAT` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, VariantNames)]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    /// Machine-readable JSON records.
    Json,
    /// Human-readable lines.
    Text,
}

/// Validated application settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Application name (`APP_NAME`).
    pub app_name: String,
    /// Application version reported by `/health` (`APP_VERSION`).
    pub app_version: String,
    /// Debug mode (`DEBUG`).
    pub debug: bool,
    /// Bind host (`HOST`).
    pub host: String,
    /// Bind port, 1-65535 (`PORT`).
    pub port: u16,
    /// Log level, canonical uppercase (`LOG_LEVEL`).
    pub log_level: LogLevel,
    /// Log format, canonical lowercase (`LOG_FORMAT`).
    pub log_format: LogFormat,
    /// Origins allowed to make cross-origin requests (`CORS_ALLOW_ORIGINS`).
    pub cors_allow_origins: Vec<String>,
}

/// Settings as read from the environment, before validation.
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default = "default_app_name")]
    app_name: String,

    #[serde(default = "default_app_version")]
    app_version: String,

    #[serde(default = "default_debug")]
    debug: String,

    #[serde(default = "default_host")]
    host: String,

    // Wider than u16 so out-of-range values reach validation.
    #[serde(default = "default_port")]
    port: i64,

    #[serde(default = "default_log_level")]
    log_level: String,

    #[serde(default = "default_log_format")]
    log_format: String,

    #[serde(default = "default_cors_allow_origins")]
    cors_allow_origins: Vec<String>,
}

fn default_app_name() -> String {
    constants::DEFAULT_APP_NAME.to_string()
}

fn default_app_version() -> String {
    constants::DEFAULT_APP_VERSION.to_string()
}

fn default_debug() -> String {
    "false".to_string()
}

fn default_host() -> String {
    constants::DEFAULT_HOST.to_string()
}

fn default_port() -> i64 {
    i64::from(constants::DEFAULT_PORT)
}

fn default_log_level() -> String {
    LogLevel::Info.to_string()
}

fn default_log_format() -> String {
    LogFormat::Json.to_string()
}

fn default_cors_allow_origins() -> Vec<String> {
    constants::DEFAULT_CORS_ALLOW_ORIGINS
        .iter()
        .map(|origin| origin.to_string())
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_version: default_app_version(),
            debug: false,
            host: default_host(),
            port: constants::DEFAULT_PORT,
            log_level: LogLevel::Info,
            log_format: LogFormat::Json,
            cors_allow_origins: default_cors_allow_origins(),
        }
    }
}

impl Settings {
    /// Load settings from `.env` (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env_file(Path::new(DEFAULT_ENV_FILE))
    }

    /// Load settings using an explicit env file. A missing file is skipped.
    pub fn load_with_env_file(path: &Path) -> Result<Self, ConfigError> {
        Self::layered(path, std::env::vars())
    }

    /// Build settings from explicit key/value pairs.
    ///
    /// Keys are matched case-insensitively against the recognized setting
    /// names; unknown keys are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw: RawSettings = envy::from_iter(vars)?;
        Self::validate(raw)
    }

    /// `host:port` string the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn layered<I>(path: &Path, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars = read_env_file(path)?;
        vars.extend(env.into_iter().map(|(key, value)| (key.to_ascii_uppercase(), value)));
        Self::from_vars(vars)
    }

    fn validate(raw: RawSettings) -> Result<Self, ConfigError> {
        require("APP_NAME", &raw.app_name)?;
        require("APP_VERSION", &raw.app_version)?;
        require("HOST", &raw.host)?;
        require("LOG_LEVEL", &raw.log_level)?;
        require("LOG_FORMAT", &raw.log_format)?;

        let port = u16::try_from(raw.port)
            .ok()
            .filter(|port| *port >= 1)
            .ok_or(ConfigError::OutOfRange {
                field: "PORT",
                value: raw.port,
                min: 1,
                max: i64::from(u16::MAX),
            })?;

        let log_level = raw
            .log_level
            .trim()
            .parse::<LogLevel>()
            .map_err(|_| ConfigError::NotOneOf {
                field: "LOG_LEVEL",
                value: raw.log_level.clone(),
                allowed: LogLevel::VARIANTS.join(", "),
            })?;

        let log_format = raw
            .log_format
            .trim()
            .parse::<LogFormat>()
            .map_err(|_| ConfigError::NotOneOf {
                field: "LOG_FORMAT",
                value: raw.log_format.clone(),
                allowed: LogFormat::VARIANTS.join(", "),
            })?;

        let debug = parse_flag(&raw.debug).ok_or_else(|| ConfigError::Invalid {
            field: "DEBUG",
            value: raw.debug.clone(),
            reason: "expected one of 1, t, T, TRUE, true, True, 0, f, F, FALSE, false, False"
                .to_string(),
        })?;

        let cors_allow_origins = raw
            .cors_allow_origins
            .into_iter()
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .map(validate_origin)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            app_name: raw.app_name,
            app_version: raw.app_version,
            debug,
            host: raw.host,
            port,
            log_level,
            log_format,
            cors_allow_origins,
        })
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Required { field });
    }
    Ok(())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn validate_origin(origin: String) -> Result<String, ConfigError> {
    let has_scheme = origin.starts_with("http://") || origin.starts_with("https://");
    if !has_scheme || origin.chars().any(char::is_whitespace) || origin.ends_with('/') {
        return Err(ConfigError::Invalid {
            field: "CORS_ALLOW_ORIGINS",
            value: origin,
            reason: "expected an origin such as http://localhost:3000".to_string(),
        });
    }
    Ok(origin)
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };

    let mut vars = HashMap::new();
    for entry in entries {
        let (key, value) = entry?;
        vars.insert(key.to_ascii_uppercase(), value);
    }
    Ok(vars)
}
