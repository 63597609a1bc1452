//! HTTP service scaffold.
//!
//! A single liveness endpoint wired through the pieces every service needs:
//!
//! ```text
//! Settings::load ─▶ Logger ─▶ Container ─▶ Server::start ─▶ Container::close
//! ```
//!
//! # Modules
//!
//! - [`config`]: Settings loading and validation from environment
//! - [`logger`]: Structured logging on top of `tracing`
//! - [`container`]: Dependency container with idempotent teardown
//! - [`api`]: Health handler, routes, and middleware
//! - [`server`]: Server lifecycle and graceful shutdown
//! - [`error`]: Unified error types
//! - [`constants`]: Defaults and fixed limits
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod constants;
pub mod container;
pub mod error;
pub mod logger;
pub mod server;
pub mod utils;

pub use config::Settings;
pub use container::Container;
pub use error::{AppError, Result};
pub use logger::Logger;
pub use server::Server;
