//! Application-wide constants.

use std::time::Duration;

// === Setting Defaults ===

/// Default application name.
pub const DEFAULT_APP_NAME: &str = "CHANGE_ME";
/// Default application version.
pub const DEFAULT_APP_VERSION: &str = "0.1.0";
/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default bind port.
pub const DEFAULT_PORT: u16 = 8000;

// === CORS ===

/// Development origins allowed when `CORS_ALLOW_ORIGINS` is unset.
pub const DEFAULT_CORS_ALLOW_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:8000",
    "http://localhost:8080",
];
/// Value of `Access-Control-Allow-Methods`.
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
/// Value of `Access-Control-Allow-Headers`.
pub const CORS_ALLOW_HEADERS: &str = "*";

// === HTTP Server ===

/// Upper bound on receiving a request's headers.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on handling a request and producing its response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Keep-alive connections with no traffic for this long are closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// How long shutdown waits for in-flight requests.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

// === Outbound HTTP Client ===

/// Total timeout for outbound requests.
pub const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle pooled connections kept per host.
pub const HTTP_CLIENT_MAX_IDLE_PER_HOST: usize = 10;
/// How long an idle pooled connection is kept.
pub const HTTP_CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
