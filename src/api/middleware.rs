//! Request middleware: panic recovery, CORS, and access logging.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN, VARY,
        },
        HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tower_http::catch_panic::ResponseForPanic;
use tracing::{error, info};

use crate::constants;
use crate::logger::Logger;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Cross-origin allow-list.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Arc<[HeaderValue]>,
}

impl CorsPolicy {
    /// Build a policy from origin strings. Entries that are not valid header
    /// values are skipped.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_origins = origins
            .into_iter()
            .filter_map(|origin| HeaderValue::from_str(origin.as_ref()).ok())
            .collect();

        Self { allowed_origins }
    }

    /// Whether `origin` is on the allow-list.
    pub fn allows(&self, origin: &HeaderValue) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

/// Reflect allow-listed origins and answer preflight requests with 204.
pub async fn cors(State(policy): State<CorsPolicy>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(ORIGIN)
        .filter(|origin| policy.allows(origin))
        .cloned();

    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Some(origin) = origin {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.append(VARY, HeaderValue::from_static("origin"));
    }
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(constants::CORS_ALLOW_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(constants::CORS_ALLOW_HEADERS),
    );

    response
}

/// Log one `http_request` event per completed request.
pub async fn access_log(State(logger): State<Logger>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let ip = client_ip(&req);

    let response = next.run(req).await;

    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    let status = response.status().as_u16();
    logger.in_scope(|| {
        info!(
            method = %method,
            path = %path,
            status,
            duration_ms,
            ip = %ip,
            "http_request"
        )
    });

    response
}

/// Best-effort client address: proxy headers first, then the peer address.
fn client_ip(req: &Request) -> String {
    let headers = req.headers();

    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Turns a handler panic into a 500 JSON response.
#[derive(Debug, Clone)]
pub struct PanicResponder {
    logger: Logger,
    expose_details: bool,
}

impl PanicResponder {
    /// `expose_details` echoes the panic message in the response body.
    pub fn new(logger: Logger, expose_details: bool) -> Self {
        Self {
            logger,
            expose_details,
        }
    }
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        let detail = if let Some(s) = err.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = err.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "unknown panic payload".to_string()
        };

        self.logger
            .in_scope(|| error!(panic = %detail, "panic_recovered"));

        let body = if self.expose_details {
            json!({ "error": "internal server error", "detail": detail })
        } else {
            json!({ "error": "internal server error" })
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_headers(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/health");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn policy_matches_exact_origins_only() {
        let policy = CorsPolicy::new(["http://localhost:3000"]);

        assert!(policy.allows(&HeaderValue::from_static("http://localhost:3000")));
        assert!(!policy.allows(&HeaderValue::from_static("http://localhost:3001")));
        assert!(!policy.allows(&HeaderValue::from_static("https://localhost:3000")));
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let req = request_with_headers(&[
            (X_FORWARDED_FOR, "203.0.113.7, 10.0.0.1"),
            (X_REAL_IP, "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&req), "203.0.113.7");
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_peer() {
        let req = request_with_headers(&[(X_REAL_IP, "198.51.100.2")]);
        assert_eq!(client_ip(&req), "198.51.100.2");

        let mut req = request_with_headers(&[]);
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_ip(&req), "192.0.2.1");

        assert_eq!(client_ip(&request_with_headers(&[])), "unknown");
    }
}
