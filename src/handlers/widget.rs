use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentCustomer;
use crate::database::Customer;
use crate::embed::{self, EmbedSnippets, DEFAULT_WIDGET_TITLE};
use crate::error::AppError;
use crate::handlers::checkout::SESSION_ID_TEMPLATE;
use crate::state::AppState;
use crate::stripe_client::{CheckoutSessionRequest, LineItem};
use crate::validation::{AppPath, ValidatedJson};

const DEFAULT_BRAND_COLOR: &str = "#2563eb";

#[derive(Debug, Deserialize, Validate)]
pub struct WidgetCheckoutRequest {
    pub service_plan_id: Uuid,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
}

async fn tenant(state: &AppState, customer_id: Uuid) -> Result<Customer, AppError> {
    state
        .storage
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::not_found("Customer not found"))
}

/// GET /api/widget/{customer_id}/config is what the embedded widget loads.
#[tracing::instrument(skip(state))]
pub async fn widget_config_handler(
    State(state): State<AppState>,
    AppPath(customer_id): AppPath<Uuid>,
) -> Result<Json<Value>, AppError> {
    let customer = tenant(&state, customer_id).await?;
    let service_plans: Vec<_> = state
        .storage
        .list_service_plans(customer.id)
        .await?
        .into_iter()
        .filter(|plan| plan.is_active)
        .collect();

    Ok(Json(json!({
        "customer_id": customer.id,
        "company_name": customer.company_name,
        "brand_color": customer.brand_color.as_deref().unwrap_or(DEFAULT_BRAND_COLOR),
        "widget_title": customer.widget_title.as_deref().unwrap_or(DEFAULT_WIDGET_TITLE),
        "logo_url": customer.logo_url,
        "service_plans": service_plans,
    })))
}

/// GET /api/widget/embed
pub async fn embed_code_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Json<EmbedSnippets> {
    Json(embed::snippets(&state.config.app_base_url, &customer))
}

/// POST /api/widget/{customer_id}/checkout sells one of the tenant's service
/// plans to a homeowner.
#[tracing::instrument(skip(state, payload), fields(service_plan_id = %payload.service_plan_id))]
pub async fn widget_checkout_handler(
    State(state): State<AppState>,
    AppPath(customer_id): AppPath<Uuid>,
    ValidatedJson(payload): ValidatedJson<WidgetCheckoutRequest>,
) -> Result<Json<Value>, AppError> {
    let customer = tenant(&state, customer_id).await?;
    let plan = state
        .storage
        .get_service_plan(payload.service_plan_id)
        .await?
        .filter(|plan| plan.customer_id == customer.id && plan.is_active)
        .ok_or_else(|| AppError::not_found("Service plan not found"))?;

    let metadata = HashMap::from([
        ("kind".to_string(), "widget".to_string()),
        ("customer_id".to_string(), customer.id.to_string()),
        ("service_plan_id".to_string(), plan.id.to_string()),
    ]);
    let session = state
        .billing
        .create_checkout_session(CheckoutSessionRequest {
            stripe_customer_id: None,
            customer_email: Some(payload.email.trim().to_lowercase()),
            line_item: LineItem::Recurring {
                name: format!("{} - {}", customer.company_name, plan.name),
                description: plan.description.clone(),
                unit_amount: plan.price_cents,
                interval: plan.interval,
            },
            success_url: state.url(&format!(
                "/widget/{}/success?session_id={SESSION_ID_TEMPLATE}",
                customer.id
            )),
            cancel_url: state.url(&format!("/widget/{}", customer.id)),
            metadata,
        })
        .await?;
    info!(
        "Created widget checkout session {} for service plan {}",
        session.id, plan.id
    );

    Ok(Json(json!({ "session_id": session.id, "url": session.url })))
}
