use anyhow::{Context, Result};
use axum::{routing::get, Router};
use futures::future::ready;
use tokio::task::JoinHandle;
use tracing::info;

use ordered_consumer::{
    config::Config,
    metrics::{serve, setup_metrics_routes},
    service::PipelineService,
};

pub async fn index() -> &'static str {
    "ordered consumer service"
}

fn start_server(config: &Config) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(|| ready("ok")));
    let router = setup_metrics_routes(router);

    let bind = config.bind_address();

    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting ordered consumer service");

    let config =
        Config::init_with_defaults().context("Failed to load configuration from environment")?;

    info!("Configuration loaded: {:?}", config);

    // Liveness routes plus the prometheus endpoint
    let server_handle = start_server(&config);
    info!("Started metrics server on {}", config.bind_address());

    // Run the consumer pipeline (blocks until shutdown)
    let service = PipelineService::new(config);
    service.run().await?;

    server_handle.abort();

    Ok(())
}
