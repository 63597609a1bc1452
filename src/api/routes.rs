//! HTTP API route definitions.

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer};

use super::handlers::{health, HealthHandler};
use super::middleware::{access_log, cors, CorsPolicy, PanicResponder};
use crate::constants;
use crate::container::Container;

/// Create the API router with the standard middleware stack.
pub fn create_router(container: &Container) -> Router {
    let handler = Arc::new(HealthHandler::new(
        container.settings().app_version.clone(),
    ));

    let router = Router::new()
        .route("/health", get(health))
        .with_state(handler);

    with_middleware(router, container)
}

/// Wrap `router` in the middleware stack, outermost first: CORS, panic
/// recovery, access logging, request timeout.
///
/// CORS sits outside recovery so a recovered 500 still carries the CORS
/// headers.
pub fn with_middleware(router: Router, container: &Container) -> Router {
    let settings = container.settings();
    let logger = container.logger().clone();

    router.layer(
        ServiceBuilder::new()
            .layer(from_fn_with_state(
                CorsPolicy::new(&settings.cors_allow_origins),
                cors,
            ))
            .layer(CatchPanicLayer::custom(PanicResponder::new(
                logger.clone(),
                settings.debug,
            )))
            .layer(from_fn_with_state(logger, access_log))
            .layer(TimeoutLayer::new(constants::REQUEST_TIMEOUT)),
    )
}
