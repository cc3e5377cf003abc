//! Axum-based HTTP and WebSocket server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::connection::handle_media_stream;
use crate::state::GatewayState;
use crate::webhook::webhook_handler;

/// Build the gateway router.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/media-stream", get(media_stream_handler))
        .route("/webhook", post(webhook_handler))
        .route("/assets/{id}", get(asset_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = match crate::metrics::install_prometheus_recorder() {
        Ok(handle) => app.route(
            "/metrics",
            get(move || std::future::ready(handle.render())),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder unavailable");
            app
        }
    };

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the gateway server and run until ctrl-c.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16, bind: Option<String>) -> anyhow::Result<()> {
    let bind_addr = bind
        .or_else(|| state.config.gateway.as_ref().and_then(|g| g.bind.clone()))
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let app = build_router(state.clone());

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");
    info!(
        public_url = %state.public_url(),
        stream_url = %format!("{}/media-stream", state.config.stream_url()),
        "Telephony endpoints"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(state, socket))
}

async fn asset_handler(
    Path(id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    match state.assets.get(&id) {
        Some(asset) => ([(header::CONTENT_TYPE, asset.mime)], asset.bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let active_calls = state.registry.len().await;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "active_calls": active_calls,
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
