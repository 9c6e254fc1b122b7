//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::Config;
use crate::router::Router as ProviderRouter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProviderRouter>,
    pub http_client: Client,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build state from config with a fresh upstream client.
    pub fn from_config(config: Config) -> reqwest::Result<Self> {
        // Only a connect timeout; the pipeline owns the overall deadline.
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            router: Arc::new(ProviderRouter::new(&config.providers)),
            http_client,
            config: Arc::new(config),
        })
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let max_concurrent = state.config.server.max_concurrent_requests.max(1);

    Router::new()
        .route("/api/getChat", post(handlers::get_chat))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(GlobalConcurrencyLimitLayer::new(max_concurrent)),
        )
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = AppState::from_config(config)?;

    for provider in state.router.providers() {
        tracing::info!(
            provider = %provider.name,
            kind = %provider.adapter.kind(),
            model = %provider.model,
            has_key = provider.adapter.has_api_key(),
            "Configured provider"
        );
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chatstream server");

    axum::serve(listener, app).await?;

    Ok(())
}
