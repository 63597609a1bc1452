//! HTTP API handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, Json};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Overall service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: HealthStatus,
    /// Application version.
    pub version: String,
    /// Seconds since the handler was created.
    pub uptime_seconds: f64,
    /// Current UTC time, RFC 3339.
    pub timestamp: String,
}

/// Liveness reporter. The startup instant is fixed at construction.
#[derive(Debug)]
pub struct HealthHandler {
    started_at: Instant,
    version: String,
}

impl HealthHandler {
    /// Create a handler reporting `version`, starting the uptime clock now.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            started_at: Instant::now(),
            version: version.into(),
        }
    }

    /// Build a fresh status report.
    pub fn check(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            version: self.version.clone(),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Health check handler - always returns 200.
pub async fn health(State(handler): State<Arc<HealthHandler>>) -> Json<HealthResponse> {
    Json(handler.check())
}
