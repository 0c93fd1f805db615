use crate::{
    config::ServerConfig, inference_service::InferenceService, ort_service::OrtModelService,
    routes::api_routes, telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};

#[derive(Clone)]
pub struct SharedState {
    pub inference_service: Arc<InferenceService<OrtModelService>>,
    pub metrics: Arc<Metrics>,
    pub request_timeout: Duration,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(
        inference_service: InferenceService<OrtModelService>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState {
            inference_service: Arc::new(inference_service),
            metrics,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        };

        let router = Router::new()
            .merge(api_routes())
            .with_state(app_state)
            .layer(DefaultBodyLimit::max(config.get_body_limit_bytes()))
            .layer(metrics_layer);

        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Inference service listening on {}", self.listener.local_addr()?);

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
