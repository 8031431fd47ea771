//! # relight: background replacement and relighting service
//!
//! `relight` exposes a single HTTP endpoint that takes a subject image (plus optional background
//! and light references) stored in S3, runs the Stability AI "replace background and relight"
//! edit on it, and stores the generated image back in S3.
//!
//! ## Request Flow
//!
//! A `POST /api/v1/replace-background-relight` request is validated by the JSON extractor, then
//! handed to the [`pipeline::Pipeline`], which:
//!
//! 1. downloads the referenced images from the configured bucket ([`storage`]),
//! 2. submits them to the vendor and polls until the job has finished ([`vendor`]),
//! 3. rejects output flagged by the vendor's content classifier,
//! 4. uploads the result under `transformed_images/` and returns its public URL.
//!
//! Vendor jobs can run for minutes. Polling is async, so a slow job only occupies its own task.
//!
//! ## Observability
//!
//! Logs are JSON lines produced by `tracing` ([`telemetry`]). Each request's events carry a
//! correlation id and the caller's vendor id. Pipeline metrics live in a Prometheus registry
//! ([`metrics`]) and are served at `/metrics` together with HTTP request metrics.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use relight::{Application, config::{Args, Config}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod errors;
mod log_dedup;
pub mod metrics;
mod openapi;
pub mod pipeline;
pub mod storage;
pub mod telemetry;
#[cfg(test)]
mod test_utils;
pub mod vendor;

use axum::{
    Json, Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    config::Config,
    metrics::{MetricsRecorder, PipelineMetrics},
    openapi::ApiDoc,
    pipeline::Pipeline,
    storage::S3ObjectStore,
    vendor::{PollPolicy, StabilityClient},
};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .pipeline(Arc::new(pipeline))
///     .metrics(Arc::new(metrics.clone()))
///     .registry(registry)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<Pipeline>,
    pub metrics: Arc<dyn MetricsRecorder>,
    /// Registry holding the pipeline collectors, rendered at `/metrics`
    pub registry: Registry,
}

/// Return the process-wide HTTP metrics handle, installing the global recorder on first use.
///
/// The `metrics` facade accepts a single global recorder, so every router built in this process
/// shares it. If another recorder was installed first, a detached handle is returned and HTTP
/// metrics are not exported.
pub fn get_or_install_prometheus_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Global metrics recorder already installed; HTTP metrics will not be exported");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

async fn render_metrics(handle: PrometheusHandle, registry: Registry) -> impl IntoResponse {
    let mut body = handle.render();

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode pipeline metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics".to_string());
    }
    body.push_str(&String::from_utf8_lossy(&buffer));

    (StatusCode::OK, body)
}

/// Build the application router.
///
/// Routes:
/// - `POST /api/v1/replace-background-relight`
/// - `GET /health`
/// - `GET /api-docs/openapi.json` and `/docs`
/// - `GET /metrics` when metrics are enabled. Added after the HTTP metrics layer, so scrapes are
///   not themselves counted.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route(
            "/replace-background-relight",
            post(api::handlers::relight::replace_background_relight),
        )
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/health", get(api::handlers::health::health_check))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if state.config.enable_metrics {
        let handle = get_or_install_prometheus_handle();
        let registry = state.registry.clone();

        router = router.layer(PrometheusMetricLayer::new()).route(
            "/metrics",
            get(move || render_metrics(handle.clone(), registry.clone())),
        );
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The HTTP server with its dependencies wired up.
///
/// 1. **Create**: [`Application::new`] builds the metrics registry, the S3 and Stability clients
///    and the router
/// 2. **Serve**: [`Application::serve`] binds to the configured address and handles requests until
///    the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with all clients initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        // Serialized form omits the vendor key and the storage secret
        debug!(
            config = %serde_json::to_string(&config).unwrap_or_default(),
            "Resolved configuration"
        );

        let registry = Registry::new();
        let pipeline_metrics = PipelineMetrics::new(&registry)
            .map_err(|e| anyhow::anyhow!("Failed to create pipeline metrics: {}", e))?;
        let metrics: Arc<dyn MetricsRecorder> = Arc::new(pipeline_metrics);

        let store = S3ObjectStore::from_config(&config.storage).await?;
        let vendor = StabilityClient::new(&config.vendor, config.stability_key())?;

        let pipeline = Pipeline::builder()
            .store(Arc::new(store))
            .vendor(Arc::new(vendor))
            .metrics(metrics.clone())
            .bucket(config.bucket())
            .poll_policy(PollPolicy::from(&config.vendor))
            .build();

        let state = AppState::builder()
            .config(config.clone())
            .pipeline(Arc::new(pipeline))
            .metrics(metrics)
            .registry(registry)
            .build();

        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "relight listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
