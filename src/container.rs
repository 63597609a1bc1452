//! Dependency container wiring settings, logger, and the shared HTTP client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::config::Settings;
use crate::constants;
use crate::error::ContainerError;
use crate::logger::Logger;

/// Long-lived collaborators built once at startup.
///
/// Share it behind an `Arc`; [`Container::close`] is idempotent.
#[derive(Debug)]
pub struct Container {
    settings: Settings,
    logger: Logger,
    http: RwLock<Option<reqwest::Client>>,
    closed: AtomicBool,
}

impl Container {
    /// Build the container, creating a pooled HTTP client.
    pub fn new(settings: Settings, logger: Logger) -> Result<Self, ContainerError> {
        let http = reqwest::Client::builder()
            .timeout(constants::HTTP_CLIENT_TIMEOUT)
            .pool_max_idle_per_host(constants::HTTP_CLIENT_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(constants::HTTP_CLIENT_IDLE_TIMEOUT)
            .user_agent(format!("{}/{}", settings.app_name, settings.app_version))
            .build()?;

        Ok(Self {
            settings,
            logger,
            http: RwLock::new(Some(http)),
            closed: AtomicBool::new(false),
        })
    }

    /// Application settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Application logger.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Shared HTTP client. Clones share one connection pool.
    pub fn http_client(&self) -> Result<reqwest::Client, ContainerError> {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ContainerError::Closed)
    }

    /// Whether [`Container::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the HTTP client's pooled connections and flush the logger.
    ///
    /// Calling this more than once is harmless. A flush failure is returned
    /// for the caller to log; the client is released regardless.
    pub fn close(&self) -> Result<(), ContainerError> {
        let released = self
            .http
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if !self.closed.swap(true, Ordering::SeqCst) {
            self.logger.in_scope(|| {
                debug!(
                    http_client_released = released.is_some(),
                    "dependencies_closed"
                )
            });
        }
        drop(released);

        self.logger.flush()?;
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            self.logger.in_scope(|| debug!(error = %e, "container_close_on_drop_failed"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogSink, LoggerConfig};

    fn container() -> Container {
        let logger = Logger::with_sink(&LoggerConfig::default(), LogSink::memory());
        Container::new(Settings::default(), logger).unwrap()
    }

    #[test]
    fn exposes_settings_and_client() {
        let container = container();
        assert_eq!(container.settings().port, 8000);
        assert!(container.http_client().is_ok());
        assert!(!container.is_closed());
    }

    #[test]
    fn close_can_be_called_twice() {
        let container = container();
        assert!(container.close().is_ok());
        assert!(container.close().is_ok());
        assert!(container.is_closed());
    }

    #[test]
    fn client_is_unavailable_after_close() {
        let container = container();
        container.close().unwrap();
        assert!(matches!(
            container.http_client(),
            Err(ContainerError::Closed)
        ));
    }
}
