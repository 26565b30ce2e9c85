use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::CurrentCustomer;
use crate::database::SubscriptionStatus;
use crate::error::AppError;
use crate::handlers::subscription_summary;
use crate::state::AppState;

/// GET /api/billing/subscription
#[tracing::instrument(skip_all, fields(customer_id = %customer.id))]
pub async fn current_subscription_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Value>, AppError> {
    Ok(Json(subscription_summary(&state, customer.id).await?))
}

/// POST /api/billing/portal returns a Stripe billing portal URL.
#[tracing::instrument(skip_all, fields(customer_id = %customer.id))]
pub async fn portal_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Value>, AppError> {
    let stripe_customer_id = customer
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| AppError::bad_request("No billing account found"))?;

    let url = state
        .billing
        .create_portal_session(stripe_customer_id, &state.url("/dashboard/billing"))
        .await?;
    Ok(Json(json!({ "url": url })))
}

/// POST /api/billing/cancel cancels the active subscription at period end.
#[tracing::instrument(skip_all, fields(customer_id = %customer.id))]
pub async fn cancel_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Value>, AppError> {
    let mut subscription = state
        .storage
        .current_subscription(customer.id)
        .await?
        .filter(|s| s.status == SubscriptionStatus::Active)
        .ok_or_else(|| AppError::not_found("No active subscription"))?;
    let stripe_subscription_id = subscription
        .stripe_subscription_id
        .clone()
        .ok_or_else(|| AppError::not_found("No active subscription"))?;

    state
        .billing
        .cancel_at_period_end(&stripe_subscription_id)
        .await?;

    subscription.cancel_at_period_end = true;
    subscription.updated_at = Utc::now();
    state.storage.update_subscription(&subscription).await?;
    info!(
        "Subscription {} will cancel at {:?}",
        subscription.id, subscription.current_period_end
    );

    Ok(Json(json!({ "subscription": subscription })))
}
