use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::info;

use crate::state::AppState;

/// GET /api/health
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/stripe/config retrieves the Stripe publishable key.
#[tracing::instrument(skip(state))]
pub async fn stripe_config_handler(State(state): State<AppState>) -> Json<Value> {
    info!("Handling stripe config request");
    Json(json!({ "publishable_key": state.config.stripe.publishable_key }))
}
