//! HTTP server hosting the rate limited routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::layer::{InterceptorConfig, RateLimitLayer};
use crate::error::Result;
use crate::ratelimit::{EndpointLimit, RateLimiter};

/// Shared state for the built-in routes.
#[derive(Clone)]
struct AppState {
    limiter: Arc<RateLimiter>,
    config: Arc<InterceptorConfig>,
}

/// Body of `GET /ratelimit/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Whether the layer enforces limits
    pub enabled: bool,
    /// Counter store backend name
    pub backend: &'static str,
    /// Window length shared by all categories
    pub window_seconds: u64,
    /// Multiplier applied to privileged callers
    pub privileged_multiplier: f64,
    /// Quota table, `default` first
    pub limits: Vec<EndpointLimit>,
    /// Path prefixes that bypass rate limiting
    pub excluded_paths: Vec<String>,
    /// Path prefixes where the multiplier applies
    pub admin_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct Placeholder {
    path: String,
    category: String,
}

/// Build the router with the rate limit layer applied.
///
/// `/health` sits under the layer too and is skipped through the excluded
/// path list, like any other route.
pub fn router(limiter: Arc<RateLimiter>, config: InterceptorConfig) -> Router {
    let state = AppState {
        limiter: Arc::clone(&limiter),
        config: Arc::new(config.clone()),
    };

    Router::new()
        .route("/health", get(health))
        .route("/ratelimit/status", get(status))
        .route("/api/{*rest}", get(placeholder).post(placeholder))
        .with_state(state)
        .layer(RateLimitLayer::new(limiter, config))
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    let policy = state.limiter.policy();
    Json(StatusReport {
        enabled: state.config.enabled,
        backend: state.limiter.backend_name(),
        window_seconds: policy.default_window(),
        privileged_multiplier: policy.privileged_multiplier(),
        limits: policy.limits(),
        excluded_paths: state.config.excluded_paths.clone(),
        admin_paths: state.config.admin_paths.clone(),
    })
}

async fn placeholder(State(state): State<AppState>, request: Request) -> Json<Placeholder> {
    let path = request.uri().path().to_string();
    let category = state.config.rules.classify(&path).to_string();
    Json(Placeholder { path, category })
}

/// HTTP server for the rate limited service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Router to serve
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
