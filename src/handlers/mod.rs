use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::Plan;
use crate::error::AppError;
use crate::state::AppState;

pub mod auth;
pub mod billing;
pub mod checkout;
pub mod customer;
pub mod links;
pub mod misc;
pub mod plans;
pub mod service_plans;
pub mod widget;

pub(crate) async fn find_plan(state: &AppState, plan_id: &str) -> Result<Plan, AppError> {
    state
        .storage
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| AppError::not_found("Plan not found"))
}

/// The tenant's current subscription with its plan inlined, or `null`.
pub(crate) async fn subscription_summary(
    state: &AppState,
    customer_id: Uuid,
) -> Result<Value, AppError> {
    let Some(subscription) = state.storage.current_subscription(customer_id).await? else {
        return Ok(Value::Null);
    };
    let plan = state.storage.get_plan(&subscription.plan_id).await?;

    let mut body = serde_json::to_value(&subscription)
        .map_err(|e| AppError::internal(format!("Failed to serialize subscription: {e}")))?;
    body["plan"] = json!(plan);
    Ok(body)
}
