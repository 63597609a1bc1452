//! Unified error types for the service.

use std::io;

use thiserror::Error;

/// Unified error type for the service.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logger setup error.
    #[error("logger error: {0}")]
    Logger(#[from] LoggerError),

    /// Dependency container error.
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    /// HTTP server error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variables could not be deserialized.
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    /// Env file exists but could not be parsed.
    #[error("failed to read env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    /// A required setting is missing or blank.
    #[error("{field} is required")]
    Required {
        /// Setting name.
        field: &'static str,
    },

    /// A numeric setting is outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// Rejected value.
        value: i64,
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },

    /// An enumerated setting has an unrecognized value.
    #[error("{field} must be one of [{allowed}], got {value:?}")]
    NotOneOf {
        /// Setting name.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// Accepted values.
        allowed: String,
    },

    /// A setting is malformed.
    #[error("invalid {field} value {value:?}: {reason}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// What was expected.
        reason: String,
    },
}

impl ConfigError {
    /// Name of the setting that failed validation, if known.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Required { field }
            | Self::OutOfRange { field, .. }
            | Self::NotOneOf { field, .. }
            | Self::Invalid { field, .. } => Some(field),
            Self::Env(_) | Self::EnvFile(_) => None,
        }
    }
}

/// Logger setup errors.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// A process-wide default subscriber is already installed.
    #[error("a global logger is already installed: {0}")]
    AlreadyInstalled(#[from] tracing::dispatcher::SetGlobalDefaultError),

    /// Flushing buffered output failed.
    #[error("failed to flush log output: {0}")]
    Flush(#[source] io::Error),
}

/// Dependency container errors.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// The shared HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The container has already been closed.
    #[error("container is closed")]
    Closed,

    /// The logger failed to flush during close.
    #[error("failed to flush logger on close: {0}")]
    LoggerFlush(#[from] LoggerError),
}

/// HTTP server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding the listen address failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that could not be bound.
        address: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The listener stopped accepting connections.
    #[error("listener failed: {0}")]
    Serve(#[from] io::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
