//! Structured logging built on `tracing`.
//!
//! A [`Logger`] owns its own [`Dispatch`], so several loggers can coexist in
//! one process (tests do this). Events are routed to a logger either through
//! its convenience methods or by running `tracing` macros inside
//! [`Logger::in_scope`]:
//!
//! ```no_run
//! # use service_scaffold::logger::{Logger, LoggerConfig};
//! let logger = Logger::new(&LoggerConfig::default());
//! logger.info("plain message");
//! logger.in_scope(|| tracing::info!(port = 8000, "application_startup"));
//! ```

use std::io::{self, IsTerminal, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{dispatcher, Dispatch};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, time::UtcTime, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

use crate::config::{LogFormat, Settings};
use crate::error::LoggerError;

/// Logger construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Level name; unrecognized names fall back to INFO.
    pub level: String,
    /// Format name; anything other than `json` selects text.
    pub format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: "json".to_string(),
        }
    }
}

impl From<&Settings> for LoggerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            level: settings.log_level.to_string(),
            format: settings.log_format.to_string(),
        }
    }
}

/// Destination for log output.
#[derive(Debug, Clone, Default)]
pub enum LogSink {
    /// Process standard output.
    #[default]
    Stdout,
    /// Shared in-memory buffer.
    Memory(Arc<Mutex<Vec<u8>>>),
}

impl LogSink {
    /// Create an empty in-memory sink.
    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(Vec::new())))
    }

    /// Everything written so far. Always empty for stdout.
    pub fn contents(&self) -> String {
        match self {
            Self::Stdout => String::new(),
            Self::Memory(buf) => {
                let buf = buf.lock().unwrap_or_else(PoisonError::into_inner);
                String::from_utf8_lossy(&buf).into_owned()
            }
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            Self::Stdout => io::stdout().flush(),
            Self::Memory(_) => Ok(()),
        }
    }

    fn supports_ansi(&self) -> bool {
        matches!(self, Self::Stdout) && io::stdout().is_terminal()
    }
}

/// Writer handed out by [`LogSink`] for each event.
#[derive(Debug)]
pub enum SinkWriter {
    Stdout(io::Stdout),
    Memory(Arc<Mutex<Vec<u8>>>),
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(out) => out.write(buf),
            Self::Memory(mem) => {
                mem.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.flush(),
            Self::Memory(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::Stdout => SinkWriter::Stdout(io::stdout()),
            Self::Memory(buf) => SinkWriter::Memory(Arc::clone(buf)),
        }
    }
}

/// Leveled, structured logger.
///
/// Cloning is cheap and clones share the same output.
#[derive(Debug, Clone)]
pub struct Logger {
    dispatch: Dispatch,
    sink: LogSink,
    level: LevelFilter,
    format: LogFormat,
}

impl Logger {
    /// Create a logger writing to stdout.
    pub fn new(config: &LoggerConfig) -> Self {
        Self::with_sink(config, LogSink::Stdout)
    }

    /// Create a logger writing to `sink`.
    pub fn with_sink(config: &LoggerConfig, sink: LogSink) -> Self {
        let level = parse_level(&config.level);
        let format = parse_format(&config.format);
        let layer = build_layer(format, level, sink.clone());

        Self {
            dispatch: Dispatch::new(tracing_subscriber::registry().with(layer)),
            sink,
            level,
            format,
        }
    }

    /// Effective level gate.
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Effective output format.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Run `f` with this logger as the current `tracing` dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }

    /// Log at INFO.
    pub fn info(&self, message: &str) {
        self.in_scope(|| tracing::info!("{message}"));
    }

    /// Log at WARN.
    pub fn warn(&self, message: &str) {
        self.in_scope(|| tracing::warn!("{message}"));
    }

    /// Log at ERROR.
    pub fn error(&self, message: &str) {
        self.in_scope(|| tracing::error!("{message}"));
    }

    /// Install as the process-wide default subscriber.
    ///
    /// Fails if any default has already been installed.
    pub fn install(&self) -> Result<(), LoggerError> {
        dispatcher::set_global_default(self.dispatch.clone())?;
        Ok(())
    }

    /// Flush buffered output. Safe to call repeatedly.
    pub fn flush(&self) -> Result<(), LoggerError> {
        self.sink.flush().map_err(LoggerError::Flush)
    }
}

/// Map a level name to a filter, defaulting to INFO.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => LevelFilter::TRACE,
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARNING" | "WARN" => LevelFilter::WARN,
        "ERROR" | "CRITICAL" | "FATAL" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Map a format name to a [`LogFormat`], defaulting to text.
pub fn parse_format(format: &str) -> LogFormat {
    LogFormat::from_str(&format.trim().to_ascii_lowercase()).unwrap_or(LogFormat::Text)
}

fn build_layer(
    format: LogFormat,
    level: LevelFilter,
    sink: LogSink,
) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(sink)
            .with_filter(level)
            .boxed(),
        LogFormat::Text => {
            let ansi = sink.supports_ansi();
            fmt::layer()
                .with_ansi(ansi)
                .with_writer(sink)
                .with_filter(level)
                .boxed()
        }
    }
}
