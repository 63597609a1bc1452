//! Integration tests running the server on a real socket.
//!
//! Run with: cargo test --test integration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use futures::future::join_all;
use service_scaffold::api::{with_middleware, HealthResponse, HealthStatus};
use service_scaffold::config::Settings;
use service_scaffold::container::Container;
use service_scaffold::logger::{LogSink, Logger, LoggerConfig};
use service_scaffold::server::{Server, ServerState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A server running in the background with a manual shutdown trigger.
struct RunningServer {
    addr: SocketAddr,
    container: Arc<Container>,
    sink: LogSink,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), service_scaffold::error::ServerError>>,
    states: tokio::sync::watch::Receiver<ServerState>,
}

impl RunningServer {
    async fn start() -> Self {
        Self::start_with(|_| None, |server| server).await
    }

    /// Start a server, optionally with a custom router built from the container.
    async fn start_with(
        router: impl FnOnce(&Container) -> Option<Router>,
        configure: impl FnOnce(Server) -> Server,
    ) -> Self {
        let sink = LogSink::memory();
        let logger = Logger::with_sink(&LoggerConfig::default(), sink.clone());
        let settings = Settings {
            app_name: "Test Server".to_string(),
            host: "127.0.0.1".to_string(),
            ..Settings::default()
        };
        let container = Arc::new(Container::new(settings, logger).unwrap());

        let server = configure(match router(&container) {
            Some(router) => Server::from_router(Arc::clone(&container), router),
            None => Server::new(Arc::clone(&container)),
        });
        let mut states = server.subscribe();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async move {
            let _ = stopped.await;
        }));

        states
            .wait_for(|state| *state == ServerState::Running)
            .await
            .unwrap();

        Self {
            addr,
            container,
            sink,
            stop,
            handle,
            states,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn shutdown(self) -> (Arc<Container>, ServerState, LogSink) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
        let state = *self.states.borrow();
        (self.container, state, self.sink)
    }
}

#[tokio::test]
async fn serves_health_over_tcp() {
    let server = RunningServer::start().await;

    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));

    let body: HealthResponse = response.json().await.unwrap();
    assert_eq!(body.status, HealthStatus::Healthy);
    assert_eq!(body.version, "0.1.0");

    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_health_checks_all_succeed() {
    let server = RunningServer::start().await;
    let client = reqwest::Client::new();

    let requests = (0..10).map(|_| {
        let client = client.clone();
        let url = server.url("/health");
        async move {
            let response = client.get(url).send().await.unwrap();
            let status = response.status();
            let body: HealthResponse = response.json().await.unwrap();
            (status, body)
        }
    });

    for (status, body) in join_all(requests).await {
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Healthy);
        assert!(body.uptime_seconds >= 0.0);
        assert!(!body.timestamp.is_empty());
    }

    server.shutdown().await;
}

#[tokio::test]
async fn cors_headers_are_sent_over_the_wire() {
    let server = RunningServer::start().await;
    let client = reqwest::Client::new();

    let allowed = client
        .get(server.url("/health"))
        .header("origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert_eq!(
        allowed.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );

    let denied = client
        .get(server.url("/health"))
        .header("origin", "http://attacker.test")
        .send()
        .await
        .unwrap();
    assert!(denied.headers().get("access-control-allow-origin").is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn access_log_records_peer_address() {
    let server = RunningServer::start().await;

    reqwest::get(server.url("/health")).await.unwrap();
    let (_, _, sink) = server.shutdown().await;

    let entry = sink
        .contents()
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|entry| entry["message"] == "http_request")
        .expect("access log entry");
    assert_eq!(entry["ip"], "127.0.0.1");
    assert_eq!(entry["status"], 200);
}

#[tokio::test]
async fn graceful_shutdown_stops_server_and_closes_container() {
    let server = RunningServer::start().await;
    let addr = server.addr;

    let (container, state, sink) = server.shutdown().await;

    assert_eq!(state, ServerState::Stopped);
    assert!(container.is_closed());
    assert!(container.close().is_ok());
    assert!(reqwest::get(format!("http://{addr}/health")).await.is_err());

    let logs = sink.contents();
    assert!(logs.contains("application_startup"));
    assert!(logs.contains("application_shutdown_started"));
    assert!(logs.contains("application_shutdown_complete"));
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_requests() {
    let server = RunningServer::start_with(
        |container| {
            let router = Router::new().route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    "done"
                }),
            );
            Some(with_middleware(router, container))
        },
        |server| server.with_grace_period(Duration::from_secs(5)),
    )
    .await;

    let url = server.url("/slow");
    let request = tokio::spawn(async move { reqwest::get(url).await?.text().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, state, _) = server.shutdown().await;

    assert_eq!(state, ServerState::Stopped);
    assert_eq!(request.await.unwrap().unwrap(), "done");
}

#[tokio::test]
async fn shutdown_gives_up_after_grace_period() {
    let server = RunningServer::start_with(
        |container| {
            let router = Router::new().route(
                "/stuck",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(8)).await;
                    "late"
                }),
            );
            Some(with_middleware(router, container))
        },
        |server| server.with_grace_period(Duration::from_millis(200)),
    )
    .await;

    let url = server.url("/stuck");
    let request = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let (container, state, sink) = server.shutdown().await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(state, ServerState::Stopped);
    assert!(container.is_closed());
    assert!(sink.contents().contains("server_shutdown_grace_period_elapsed"));

    let outcome = tokio::time::timeout(Duration::from_secs(2), request)
        .await
        .expect("stuck connection was left open")
        .unwrap();
    assert!(outcome.is_err(), "stuck request completed: {outcome:?}");
}

#[tokio::test]
async fn idle_keep_alive_connection_is_closed() {
    let server = RunningServer::start_with(
        |_| None,
        |server| server.with_idle_timeout(Duration::from_millis(200)),
    )
    .await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut received = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut received)).await;

    assert!(read.is_ok(), "idle connection was left open");
    assert!(String::from_utf8_lossy(&received).starts_with("HTTP/1.1 200 OK"));

    server.shutdown().await;
}
