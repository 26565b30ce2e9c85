use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentCustomer;
use crate::database::{BillingInterval, ServicePlan};
use crate::error::AppError;
use crate::state::AppState;
use crate::validation::{validate_not_blank, AppPath, ValidatedJson};

fn default_interval() -> BillingInterval {
    BillingInterval::Month
}

fn default_active() -> bool {
    true
}

/// A service plan as tenants submit it, from the CRUD routes or the
/// onboarding services step.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServicePlanInput {
    #[validate(custom(function = "validate_not_blank", message = "must not be empty"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[validate(range(min = 0, message = "must not be negative"))]
    pub price_cents: i64,
    #[serde(default = "default_interval")]
    pub interval: BillingInterval,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: Option<i32>,
}

impl ServicePlanInput {
    pub fn into_plan(self, customer_id: Uuid, default_sort_order: i32) -> ServicePlan {
        let now = Utc::now();
        let mut plan = ServicePlan {
            id: Uuid::new_v4(),
            customer_id,
            name: String::new(),
            description: None,
            price_cents: 0,
            interval: BillingInterval::Month,
            features: Vec::new(),
            is_active: true,
            sort_order: default_sort_order,
            created_at: now,
            updated_at: now,
        };
        self.apply_to(&mut plan);
        plan
    }

    pub fn apply_to(self, plan: &mut ServicePlan) {
        plan.name = self.name.trim().to_string();
        plan.description = self.description.filter(|d| !d.trim().is_empty());
        plan.price_cents = self.price_cents;
        plan.interval = self.interval;
        plan.features = self
            .features
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        plan.is_active = self.is_active;
        if let Some(sort_order) = self.sort_order {
            plan.sort_order = sort_order;
        }
        plan.updated_at = Utc::now();
    }
}

/// Loads a service plan owned by `customer_id`. Plans of other tenants are
/// reported as missing.
async fn owned_plan(state: &AppState, customer_id: Uuid, id: Uuid) -> Result<ServicePlan, AppError> {
    state
        .storage
        .get_service_plan(id)
        .await?
        .filter(|plan| plan.customer_id == customer_id)
        .ok_or_else(|| AppError::not_found("Service plan not found"))
}

/// GET /api/service-plans
#[tracing::instrument(skip_all, fields(customer_id = %customer.id))]
pub async fn list_service_plans_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Vec<ServicePlan>>, AppError> {
    Ok(Json(state.storage.list_service_plans(customer.id).await?))
}

/// POST /api/service-plans
#[tracing::instrument(skip_all, fields(customer_id = %customer.id))]
pub async fn create_service_plan_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    ValidatedJson(payload): ValidatedJson<ServicePlanInput>,
) -> Result<(StatusCode, Json<ServicePlan>), AppError> {
    let existing = state.storage.list_service_plans(customer.id).await?;
    let next_sort_order = i32::try_from(existing.len()).unwrap_or(i32::MAX);

    let plan = payload.into_plan(customer.id, next_sort_order);
    state.storage.insert_service_plan(&plan).await?;
    info!("Created service plan {}", plan.id);
    Ok((StatusCode::CREATED, Json(plan)))
}

/// PUT /api/service-plans/{id}
#[tracing::instrument(skip(state, customer, payload), fields(customer_id = %customer.id))]
pub async fn update_service_plan_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    AppPath(id): AppPath<Uuid>,
    ValidatedJson(payload): ValidatedJson<ServicePlanInput>,
) -> Result<Json<ServicePlan>, AppError> {
    let mut plan = owned_plan(&state, customer.id, id).await?;
    payload.apply_to(&mut plan);
    state.storage.update_service_plan(&plan).await?;
    info!("Updated service plan {}", plan.id);
    Ok(Json(plan))
}

/// DELETE /api/service-plans/{id}
#[tracing::instrument(skip(state, customer), fields(customer_id = %customer.id))]
pub async fn delete_service_plan_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    let plan = owned_plan(&state, customer.id, id).await?;
    state.storage.delete_service_plan(plan.id).await?;
    info!("Deleted service plan {}", plan.id);
    Ok(StatusCode::NO_CONTENT)
}
