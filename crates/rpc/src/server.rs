use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use filelink_registry::RegistryStore;
use filelink_relay::{RelayError, RelayResolver, StreamingProxy};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admin::{self, AdminError, AdminGateway};
use crate::landing;
use crate::stream;

/// Upper bound on an uploaded backup artifact.
pub const MAX_RESTORE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryStore>,
    pub resolver: Arc<RelayResolver>,
    pub proxy: Arc<StreamingProxy>,
    pub admin: Arc<AdminGateway>,
    /// Countdown shown on the landing page before the stream starts.
    pub landing_delay: Duration,
    pub start_time: Instant,
    pub req_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        registry: Arc<RegistryStore>,
        resolver: Arc<RelayResolver>,
        proxy: Arc<StreamingProxy>,
        admin: Arc<AdminGateway>,
        landing_delay: Duration,
    ) -> Self {
        Self {
            registry,
            resolver,
            proxy,
            admin,
            landing_delay,
            start_time: Instant::now(),
            req_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn record_request(&self) -> u64 {
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

pub(crate) type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    files: usize,
    uptime_secs: u64,
    req_total: u64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub(crate) fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub(crate) fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound => ApiError::not_found("File not found"),
            // Cause is logged by the relay; the client only learns that it failed.
            RelayError::UpstreamUnavailable(_) => ApiError::internal("Upstream unavailable"),
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Forbidden => ApiError::forbidden("Forbidden"),
            AdminError::MalformedSnapshot(msg) => {
                ApiError::bad_request(format!("Malformed backup: {msg}"))
            }
            AdminError::Registry(err) => ApiError::internal(format!("registry failure: {err}")),
        }
    }
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn start_server<F>(state: AppState, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let shared = Arc::new(state);
    let app = build_router(shared);
    let listener = bind_listener(addr).await?;
    info!(
        addr = %listener.local_addr().context("listener has no local address")?,
        "HTTP server listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/ping", get(handle_ping))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/file/:token", get(landing::handle_landing))
        .route("/stream/:token", get(stream::handle_stream))
        .route("/admin", get(admin::handle_admin_panel))
        .route("/admin/delete/:token", get(admin::handle_admin_delete))
        .route("/admin/backup", get(admin::handle_admin_backup))
        .route(
            "/admin/restore",
            post(admin::handle_admin_restore).layer(DefaultBodyLimit::max(MAX_RESTORE_BYTES)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_root(State(state): State<SharedState>) -> &'static str {
    state.record_request();
    "Bot is Running."
}

async fn handle_ping(State(state): State<SharedState>) -> &'static str {
    state.record_request();
    "pong"
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request();
    Json(HealthResponse {
        status: "ok",
        files: state.registry.len(),
        uptime_secs: state.uptime_seconds(),
        req_total,
    })
}

async fn handle_metrics(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let req_total = state.record_request();
    let uptime = state.uptime_seconds();
    let files = state.registry.len();
    let relay = state.proxy.stats().snapshot();

    let mut metrics =
        "# HELP filelink_http_requests_total Total number of HTTP requests handled\n".to_string();
    metrics.push_str("# TYPE filelink_http_requests_total counter\n");
    metrics.push_str(&format!("filelink_http_requests_total {req_total}\n"));
    metrics.push_str("# HELP filelink_uptime_seconds Uptime of the server in seconds\n");
    metrics.push_str("# TYPE filelink_uptime_seconds gauge\n");
    metrics.push_str(&format!("filelink_uptime_seconds {uptime}\n"));
    metrics.push_str("# HELP filelink_registry_files Number of registered files\n");
    metrics.push_str("# TYPE filelink_registry_files gauge\n");
    metrics.push_str(&format!("filelink_registry_files {files}\n"));
    metrics.push_str("# HELP filelink_relay_streams_total Relayed streams by outcome\n");
    metrics.push_str("# TYPE filelink_relay_streams_total counter\n");
    metrics.push_str(&format!(
        "filelink_relay_streams_total{{outcome=\"started\"}} {}\n",
        relay.started
    ));
    metrics.push_str(&format!(
        "filelink_relay_streams_total{{outcome=\"completed\"}} {}\n",
        relay.completed
    ));
    metrics.push_str(&format!(
        "filelink_relay_streams_total{{outcome=\"failed\"}} {}\n",
        relay.failed
    ));
    metrics.push_str(&format!(
        "filelink_relay_streams_total{{outcome=\"cancelled\"}} {}\n",
        relay.cancelled
    ));
    metrics.push_str("# HELP filelink_relay_streams_active Streams currently being relayed\n");
    metrics.push_str("# TYPE filelink_relay_streams_active gauge\n");
    metrics.push_str(&format!("filelink_relay_streams_active {}\n", relay.active()));
    metrics.push_str("# HELP filelink_relay_bytes_total Bytes forwarded to clients\n");
    metrics.push_str("# TYPE filelink_relay_bytes_total counter\n");
    metrics.push_str(&format!("filelink_relay_bytes_total {}\n", relay.bytes));

    let mut response = Response::new(Body::from(metrics));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}
