use axum::{extract::State, Json};
use tracing::info;

use crate::database::Plan;
use crate::error::AppError;
use crate::handlers::find_plan;
use crate::state::AppState;
use crate::validation::AppPath;

/// GET /api/plans lists the SaaS tiers in display order.
#[tracing::instrument(skip(state))]
pub async fn list_plans_handler(State(state): State<AppState>) -> Result<Json<Vec<Plan>>, AppError> {
    let plans = state.storage.list_plans().await?;
    info!("Returning {} plans", plans.len());
    Ok(Json(plans))
}

/// GET /api/plans/{id}
#[tracing::instrument(skip(state))]
pub async fn get_plan_handler(
    State(state): State<AppState>,
    AppPath(plan_id): AppPath<String>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(find_plan(&state, &plan_id).await?))
}
