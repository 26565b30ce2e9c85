use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use validator::Validate;

use crate::auth::CurrentCustomer;
use crate::database::models::LinkUnavailable;
use crate::database::{Customer, Plan, SubscriptionLink};
use crate::error::AppError;
use crate::handlers::checkout::start_saas_checkout;
use crate::handlers::find_plan;
use crate::state::AppState;
use crate::validation::{AppPath, ValidatedJson};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLinkRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub plan_id: String,
}

fn public_url(state: &AppState, token: &str) -> String {
    state.url(&format!("/subscribe/{token}"))
}

/// Resolves a token to a link that can still be redeemed, with its plan and
/// owning tenant.
async fn redeemable_link(
    state: &AppState,
    token: &str,
) -> Result<(SubscriptionLink, Plan, Customer), AppError> {
    let link = state
        .storage
        .get_link_by_token(token)
        .await?
        .ok_or_else(|| AppError::not_found("Subscription link not found"))?;

    link.check_redeemable(Utc::now()).map_err(|reason| {
        warn!("Subscription link {} rejected: {reason}", link.id);
        AppError::bad_request(reason.to_string())
    })?;

    let plan = find_plan(state, &link.plan_id).await?;
    let customer = state
        .storage
        .get_customer(link.customer_id)
        .await?
        .ok_or_else(|| AppError::not_found("Customer not found"))?;
    Ok((link, plan, customer))
}

/// POST /api/subscription-links creates a single-use invite to subscribe.
#[tracing::instrument(skip_all, fields(customer_id = %customer.id, plan_id = %payload.plan_id))]
pub async fn create_link_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    ValidatedJson(payload): ValidatedJson<CreateLinkRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let plan = find_plan(&state, &payload.plan_id).await?;
    let link = SubscriptionLink::new(customer.id, plan.id, Utc::now());
    state.storage.insert_link(&link).await?;
    info!("Created subscription link {} expiring {}", link.id, link.expires_at);

    let url = public_url(&state, &link.token);
    Ok((StatusCode::CREATED, Json(json!({ "link": link, "url": url }))))
}

/// GET /api/subscription-links/{token} is public: it backs the landing page
/// the link opens.
#[tracing::instrument(skip_all)]
pub async fn get_link_handler(
    State(state): State<AppState>,
    AppPath(token): AppPath<String>,
) -> Result<Json<Value>, AppError> {
    let (link, plan, customer) = redeemable_link(&state, &token).await?;
    Ok(Json(json!({
        "token": link.token,
        "expires_at": link.expires_at,
        "plan": plan,
        "company_name": customer.company_name,
    })))
}

/// POST /api/subscription-links/{token}/checkout redeems the link.
#[tracing::instrument(skip_all)]
pub async fn redeem_link_handler(
    State(state): State<AppState>,
    AppPath(token): AppPath<String>,
) -> Result<Json<Value>, AppError> {
    let (link, plan, customer) = redeemable_link(&state, &token).await?;
    if !state.storage.claim_link(&link.token, Utc::now()).await? {
        warn!("Subscription link {} was redeemed concurrently", link.id);
        return Err(AppError::bad_request(LinkUnavailable::Used.to_string()));
    }

    let session = match start_saas_checkout(&state, customer, &plan).await {
        Ok(session) => session,
        Err(e) => {
            if let Err(release) = state.storage.release_link(&link.token).await {
                error!("Failed to reopen subscription link {}: {release}", link.id);
            }
            return Err(e);
        }
    };
    info!("Subscription link {} redeemed by session {}", link.id, session.id);

    Ok(Json(json!({ "session_id": session.id, "url": session.url })))
}
