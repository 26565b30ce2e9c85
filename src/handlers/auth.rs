use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::auth::{end_session, hash_password, start_session, verify_password, CurrentCustomer};
use crate::database::Customer;
use crate::error::AppError;
use crate::handlers::find_plan;
use crate::state::AppState;
use crate::validation::{validate_not_blank, ValidatedJson};

/// Body of `POST /api/auth/register` and `POST /api/auth/trial`.
/// `plan_id` is only read by trial signup.
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
    #[validate(custom(function = "validate_not_blank", message = "must not be empty"))]
    pub name: String,
    #[validate(custom(function = "validate_not_blank", message = "must not be empty"))]
    pub company_name: String,
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub password: String,
}

/// Hashing is CPU bound, keep it off the async workers.
async fn hash_off_thread(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::internal(format!("Task join error: {e}")))?
}

async fn verify_off_thread(password: String, stored: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| AppError::internal(format!("Task join error: {e}")))?
}

async fn create_customer(state: &AppState, payload: &SignupRequest) -> Result<Customer, AppError> {
    let email = payload.email.trim().to_lowercase();
    if state.storage.get_customer_by_email(&email).await?.is_some() {
        warn!("Registration rejected, email already in use");
        return Err(AppError::bad_request("Email already registered"));
    }

    let password_hash = hash_off_thread(payload.password.clone()).await?;
    Ok(Customer::new(
        email,
        payload.name.trim().to_string(),
        payload.company_name.trim().to_string(),
        password_hash,
    ))
}

/// POST /api/auth/register creates a tenant account and logs it in.
#[tracing::instrument(skip_all, fields(email = %payload.email))]
pub async fn register_handler(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let customer = create_customer(&state, &payload).await?;
    state.storage.insert_customer(&customer).await?;
    info!("Registered customer {}", customer.id);

    state.notifier.notify(
        "customer.registered",
        json!({
            "customer_id": customer.id,
            "email": customer.email,
            "name": customer.name,
            "company_name": customer.company_name,
        }),
    );

    let cookie = start_session(&state, customer.id).await?;
    Ok((StatusCode::CREATED, [(SET_COOKIE, cookie)], Json(customer)))
}

/// POST /api/auth/trial creates a tenant account with a free trial window.
#[tracing::instrument(skip_all, fields(email = %payload.email))]
pub async fn trial_handler(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let plan = match payload.plan_id.as_deref() {
        Some(plan_id) => Some(find_plan(&state, plan_id).await?),
        None => None,
    };

    let mut customer = create_customer(&state, &payload).await?;
    customer.trial_ends_at = Some(Utc::now() + Duration::days(state.config.trial_days));
    customer.selected_plan_id = plan.map(|p| p.id);
    state.storage.insert_customer(&customer).await?;
    info!(
        "Started trial for customer {} until {:?}",
        customer.id, customer.trial_ends_at
    );

    state.notifier.notify(
        "trial.started",
        json!({
            "customer_id": customer.id,
            "email": customer.email,
            "company_name": customer.company_name,
            "plan_id": customer.selected_plan_id,
            "trial_ends_at": customer.trial_ends_at,
        }),
    );

    let cookie = start_session(&state, customer.id).await?;
    Ok((StatusCode::CREATED, [(SET_COOKIE, cookie)], Json(customer)))
}

/// POST /api/auth/login
#[tracing::instrument(skip_all, fields(email = %payload.email))]
pub async fn login_handler(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = payload.email.trim().to_lowercase();
    let Some(customer) = state.storage.get_customer_by_email(&email).await? else {
        info!("Login failed: unknown email");
        return Err(AppError::unauthorized("Invalid email or password"));
    };

    if !verify_off_thread(payload.password, customer.password_hash.clone()).await? {
        info!("Login failed: wrong password for customer {}", customer.id);
        return Err(AppError::unauthorized("Invalid email or password"));
    }

    let cookie = start_session(&state, customer.id).await?;
    info!("Customer {} logged in", customer.id);
    Ok(([(SET_COOKIE, cookie)], Json(customer)))
}

/// POST /api/auth/logout
#[tracing::instrument(skip_all)]
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let cookie = end_session(&state, &headers).await?;
    Ok(([(SET_COOKIE, cookie)], Json(json!({ "success": true }))))
}

/// GET /api/auth/me
pub async fn me_handler(CurrentCustomer(customer): CurrentCustomer) -> Json<Customer> {
    Json(customer)
}
