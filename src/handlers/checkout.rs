use std::collections::HashMap;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::auth::CurrentCustomer;
use crate::database::{Customer, Plan, Subscription};
use crate::error::AppError;
use crate::handlers::find_plan;
use crate::state::AppState;
use crate::stripe_client::{CheckoutSessionRequest, CreatedCheckoutSession, LineItem};
use crate::validation::{AppPath, ValidatedJson};

/// Placeholder Stripe substitutes into the success URL.
pub(crate) const SESSION_ID_TEMPLATE: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub plan_id: String,
}

/// Returns the tenant's Stripe customer id, creating the Stripe customer on
/// first use.
async fn ensure_stripe_customer(
    state: &AppState,
    customer: &mut Customer,
) -> Result<String, AppError> {
    if let Some(id) = &customer.stripe_customer_id {
        return Ok(id.clone());
    }

    let metadata = HashMap::from([("customer_id".to_string(), customer.id.to_string())]);
    let stripe_id = state
        .billing
        .create_customer(&customer.email, &customer.company_name, metadata)
        .await?;

    customer.stripe_customer_id = Some(stripe_id.clone());
    customer.updated_at = Utc::now();
    state.storage.update_customer(customer).await?;
    Ok(stripe_id)
}

/// Opens a Stripe Checkout session selling `plan` to `customer` and records
/// the pending subscription the webhook later activates.
pub(crate) async fn start_saas_checkout(
    state: &AppState,
    mut customer: Customer,
    plan: &Plan,
) -> Result<CreatedCheckoutSession, AppError> {
    let stripe_customer_id = ensure_stripe_customer(state, &mut customer).await?;

    let metadata = HashMap::from([
        ("customer_id".to_string(), customer.id.to_string()),
        ("plan_id".to_string(), plan.id.clone()),
        ("kind".to_string(), "saas".to_string()),
    ]);
    let session = state
        .billing
        .create_checkout_session(CheckoutSessionRequest {
            stripe_customer_id: Some(stripe_customer_id),
            customer_email: None,
            line_item: LineItem::Price(plan.stripe_price_id.clone()),
            success_url: state.url(&format!("/checkout/success?session_id={SESSION_ID_TEMPLATE}")),
            cancel_url: state.url("/pricing"),
            metadata,
        })
        .await?;

    let subscription = Subscription::pending(customer.id, plan.id.clone(), session.id.clone());
    state.storage.insert_subscription(&subscription).await?;
    info!(
        "Created pending subscription {} for customer {} on plan {}",
        subscription.id, customer.id, plan.id
    );
    Ok(session)
}

/// POST /api/checkout starts a SaaS plan checkout for the logged-in tenant.
#[tracing::instrument(skip_all, fields(customer_id = %customer.id, plan_id = %payload.plan_id))]
pub async fn create_checkout_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    ValidatedJson(payload): ValidatedJson<CheckoutRequest>,
) -> Result<Json<Value>, AppError> {
    let plan = find_plan(&state, &payload.plan_id).await?;
    let session = start_saas_checkout(&state, customer, &plan).await?;
    Ok(Json(json!({ "session_id": session.id, "url": session.url })))
}

/// GET /api/checkout/session/{session_id} reports what became of a checkout.
#[tracing::instrument(skip(state, customer), fields(customer_id = %customer.id))]
pub async fn checkout_session_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    AppPath(session_id): AppPath<String>,
) -> Result<Json<Value>, AppError> {
    let subscription = state
        .storage
        .get_subscription_by_checkout_session(&session_id)
        .await?
        .filter(|s| s.customer_id == customer.id)
        .ok_or_else(|| AppError::not_found("Checkout session not found"))?;

    Ok(Json(json!({
        "session_id": session_id,
        "status": subscription.status,
        "subscription": subscription,
    })))
}
