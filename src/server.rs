//! HTTP server lifecycle.
//!
//! ```text
//! Constructed ──serve──▶ Running ──signal──▶ ShuttingDown ──drained/grace──▶ Stopped
//! ```
//!
//! Each accepted connection runs in its own task. Shutdown stops accepting,
//! asks every connection to finish its current request, and waits for at most
//! the grace period. Connections still open after that are aborted. The
//! container is closed last.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use crate::api::create_router;
use crate::constants;
use crate::container::Container;
use crate::error::ServerError;
use crate::logger::Logger;
use crate::utils::shutdown_signal;

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Built, not yet accepting connections.
    Constructed,
    /// Accepting connections.
    Running,
    /// No longer accepting; draining in-flight requests.
    ShuttingDown,
    /// Fully stopped and dependencies closed.
    Stopped,
}

/// HTTP server bound to a dependency container.
#[derive(Debug)]
pub struct Server {
    router: Router,
    container: Arc<Container>,
    grace_period: Duration,
    idle_timeout: Duration,
    state: watch::Sender<ServerState>,
}

impl Server {
    /// Build a server exposing the standard API.
    pub fn new(container: Arc<Container>) -> Self {
        let router = create_router(&container);
        Self::from_router(container, router)
    }

    /// Build a server around a caller-supplied router.
    pub fn from_router(container: Arc<Container>, router: Router) -> Self {
        let (state, _) = watch::channel(ServerState::Constructed);
        Self {
            router,
            container,
            grace_period: constants::SHUTDOWN_GRACE_PERIOD,
            idle_timeout: constants::IDLE_TIMEOUT,
            state,
        }
    }

    /// Override how long shutdown waits for in-flight requests.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Override how long a connection may sit without traffic.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The router served by this server.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Bind the configured `host:port`.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.container.settings().bind_address();
        TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })
    }

    /// Bind, serve, and shut down on SIGINT/SIGTERM.
    pub async fn start(self) -> Result<(), ServerError> {
        let listener = self.bind().await.inspect_err(|e| {
            self.container
                .logger()
                .in_scope(|| error!(error = %e, "server_bind_failed"));
        })?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// Returns an error if the listener fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let logger = self.container.logger().clone();
        let settings = self.container.settings();
        let address = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| settings.bind_address());

        logger.in_scope(|| {
            info!(
                app_name = %settings.app_name,
                version = %settings.app_version,
                host = %settings.host,
                port = settings.port,
                debug = settings.debug,
                log_level = %settings.log_level,
                log_format = %settings.log_format,
                "application_startup"
            )
        });

        let (drain_tx, drain_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        self.state.send_replace(ServerState::Running);
        logger.in_scope(|| info!(address = %address, "application_startup_complete"));

        tokio::pin!(shutdown);
        let failure = loop {
            tokio::select! {
                () = &mut shutdown => break None,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            self.router.clone(),
                            self.idle_timeout,
                            drain_rx.clone(),
                            logger.clone(),
                        ));
                    }
                    Err(e) if is_connection_error(&e) => {}
                    Err(e) => break Some(e),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };
        drop(listener);

        if let Some(e) = failure {
            connections.shutdown().await;
            self.state.send_replace(ServerState::Stopped);
            let err = ServerError::Serve(e);
            logger.in_scope(|| error!(error = %err, "server_failed"));
            return Err(err);
        }

        self.state.send_replace(ServerState::ShuttingDown);
        logger.in_scope(|| {
            info!(
                grace_period_secs = self.grace_period.as_secs_f64(),
                open_connections = connections.len(),
                "application_shutdown_started"
            )
        });
        drain_tx.send_replace(true);

        let drained = tokio::time::timeout(self.grace_period, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            logger.in_scope(|| {
                warn!(
                    dropped_connections = connections.len(),
                    "server_shutdown_grace_period_elapsed"
                )
            });
            connections.shutdown().await;
        }

        if let Err(e) = self.container.close() {
            logger.in_scope(|| error!(error = %e, "dependencies_close_error"));
        }

        self.state.send_replace(ServerState::Stopped);
        logger.in_scope(|| info!("application_shutdown_complete"));
        Ok(())
    }
}

/// Errors that end one accepted connection but leave the listener usable.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

/// Serve HTTP/1 or HTTP/2 on one connection until it closes, goes idle, or
/// the server starts draining.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    idle_timeout: Duration,
    mut draining: watch::Receiver<bool>,
    logger: Logger,
) {
    let activity = Activity::new();
    let io = TokioIo::new(TrackedStream {
        inner: stream,
        activity: activity.clone(),
    });
    let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        router.clone().oneshot(request)
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(constants::HEADER_READ_TIMEOUT);
    let connection = builder.serve_connection(io, service);
    tokio::pin!(connection);

    let mut closing = false;
    loop {
        let idle_deadline = activity.last() + idle_timeout;
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    logger.in_scope(|| debug!(peer = %peer, error = %e, "connection_error"));
                }
                break;
            }
            _ = draining.changed(), if !closing => {
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
            () = tokio::time::sleep_until(idle_deadline.into()), if !closing => {
                if activity.last().elapsed() >= idle_timeout {
                    logger.in_scope(|| debug!(peer = %peer, "connection_idle_timeout"));
                    closing = true;
                    connection.as_mut().graceful_shutdown();
                }
            }
        }
    }
}

/// When bytes last moved on a connection.
#[derive(Debug, Clone)]
struct Activity {
    opened: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Activity {
    fn new() -> Self {
        Self {
            opened: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn touch(&self) {
        let ms = u64::try_from(self.opened.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.store(ms, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.opened + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// TCP stream that records traffic in an [`Activity`].
struct TrackedStream {
    inner: TcpStream,
    activity: Activity,
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if buf.filled().len() > before {
            this.activity.touch();
        }
        poll
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            this.activity.touch();
        }
        poll
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            this.activity.touch();
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
