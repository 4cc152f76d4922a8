//! API server: the REST surface over the cached model plus the Prometheus
//! exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use mmm_core::config::AppConfig;
use mmm_model::ModelRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: AppConfig,
    registry: Arc<ModelRegistry>,
}

impl ApiServer {
    pub fn new(config: AppConfig, registry: Arc<ModelRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            start_time: Instant::now(),
        };

        Router::new()
            // Allocation planning
            .route("/v1/allocations/score", post(rest::score_allocation))
            .route("/v1/allocations/breakdown", post(rest::allocation_breakdown))
            // Model lifecycle
            .route("/v1/model/diagnostics", get(rest::model_diagnostics))
            .route("/v1/model/retrain", post(rest::retrain_model))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics exporter on a separate port. No-op when metrics are
    /// disabled. Must run inside the tokio runtime.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            return Ok(());
        }

        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
