//! HTTP API module: health endpoint and middleware stack.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::{HealthHandler, HealthResponse, HealthStatus};
pub use routes::{create_router, with_middleware};
