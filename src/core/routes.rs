use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::core::AppState;
use crate::features::inbound;
use crate::types::WebhookEnvelope;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/webhook", post(webhook_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "auction-scout",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Always 200: the platform retries anything else, and failures here are ours to log.
async fn webhook_handler(State(state): State<Arc<AppState>>, body: String) -> StatusCode {
    match serde_json::from_str::<WebhookEnvelope>(&body) {
        Ok(envelope) => {
            info!("webhook: {} event(s)", envelope.events.len());
            tokio::spawn(async move {
                inbound::handle_envelope(&state, envelope).await;
            });
        }
        Err(e) => warn!("webhook: unparseable body ignored: {}", e),
    }
    StatusCode::OK
}
