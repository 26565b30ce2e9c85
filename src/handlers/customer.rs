use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::auth::CurrentCustomer;
use crate::database::Customer;
use crate::embed;
use crate::error::AppError;
use crate::handlers::service_plans::ServicePlanInput;
use crate::handlers::subscription_summary;
use crate::state::AppState;
use crate::validation::{
    parse_payload, validate_hex_color, validate_not_blank, AppJson, AppPath, ValidatedJson,
};

/// The onboarding wizard, in order. Step numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingStep {
    Business = 1,
    Services = 2,
    Branding = 3,
    Plan = 4,
    Review = 5,
}

impl OnboardingStep {
    pub const ALL: [Self; 5] = [
        Self::Business,
        Self::Services,
        Self::Branding,
        Self::Plan,
        Self::Review,
    ];

    pub fn number(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Business => "business",
            Self::Services => "services",
            Self::Branding => "branding",
            Self::Plan => "plan",
            Self::Review => "review",
        }
    }

    /// Accepts the step name or its number.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|step| step.name() == raw || step.number().to_string() == raw)
    }

    /// A step can be saved once every earlier step has been saved.
    pub fn check_reachable(self, current_step: i32) -> Result<(), AppError> {
        if self.number() > current_step + 1 {
            return Err(AppError::bad_request(format!(
                "Complete onboarding step {} before {}",
                current_step + 1,
                self.name()
            )));
        }
        Ok(())
    }
}

fn onboarding_state(customer: &Customer) -> Value {
    let steps: Vec<Value> = OnboardingStep::ALL
        .iter()
        .map(|step| {
            json!({
                "number": step.number(),
                "name": step.name(),
                "completed": step.number() <= customer.onboarding_step,
            })
        })
        .collect();
    json!({
        "current_step": customer.onboarding_step,
        "completed": customer.onboarding_completed,
        "steps": steps,
    })
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(custom(function = "validate_not_blank", message = "must not be empty"))]
    pub name: Option<String>,
    #[validate(custom(function = "validate_not_blank", message = "must not be empty"))]
    pub company_name: Option<String>,
    #[validate(length(max = 32, message = "is too long"))]
    pub phone: Option<String>,
    pub industry: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub website: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BusinessStep {
    #[validate(custom(function = "validate_not_blank", message = "must not be empty"))]
    pub company_name: String,
    pub industry: Option<String>,
    #[validate(length(max = 32, message = "is too long"))]
    pub phone: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub website: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ServicesStep {
    #[validate(length(min = 1, message = "add at least one service plan"), nested)]
    pub services: Vec<ServicePlanInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BrandingStep {
    #[validate(custom(function = "validate_hex_color", message = "must be a hex color like #1a73e8"))]
    pub brand_color: Option<String>,
    #[validate(length(max = 80, message = "is too long"))]
    pub widget_title: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub logo_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlanStep {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub plan_id: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// GET /api/customer/profile
pub async fn get_profile_handler(CurrentCustomer(customer): CurrentCustomer) -> Json<Customer> {
    Json(customer)
}

/// PATCH /api/customer/profile updates only the fields present in the body.
#[tracing::instrument(skip_all, fields(customer_id = %customer.id))]
pub async fn update_profile_handler(
    State(state): State<AppState>,
    CurrentCustomer(mut customer): CurrentCustomer,
    ValidatedJson(payload): ValidatedJson<UpdateProfileRequest>,
) -> Result<Json<Customer>, AppError> {
    if let Some(name) = payload.name {
        customer.name = name.trim().to_string();
    }
    if let Some(company_name) = payload.company_name {
        customer.company_name = company_name.trim().to_string();
    }
    if payload.phone.is_some() {
        customer.phone = non_empty(payload.phone);
    }
    if payload.industry.is_some() {
        customer.industry = non_empty(payload.industry);
    }
    if payload.website.is_some() {
        customer.website = non_empty(payload.website);
    }
    customer.updated_at = Utc::now();

    state.storage.update_customer(&customer).await?;
    info!("Updated profile");
    Ok(Json(customer))
}

/// GET /api/customer/onboarding
pub async fn get_onboarding_handler(CurrentCustomer(customer): CurrentCustomer) -> Json<Value> {
    Json(onboarding_state(&customer))
}

/// PUT /api/customer/onboarding/{step} saves one wizard step.
#[tracing::instrument(skip(state, customer, body), fields(customer_id = %customer.id))]
pub async fn save_onboarding_step_handler(
    State(state): State<AppState>,
    CurrentCustomer(mut customer): CurrentCustomer,
    AppPath(step): AppPath<String>,
    AppJson(body): AppJson<Value>,
) -> Result<Json<Value>, AppError> {
    let step = OnboardingStep::parse(&step)
        .ok_or_else(|| AppError::not_found(format!("Unknown onboarding step: {step}")))?;
    step.check_reachable(customer.onboarding_step)?;

    match step {
        OnboardingStep::Business => {
            let payload: BusinessStep = parse_payload(body)?;
            customer.company_name = payload.company_name.trim().to_string();
            customer.industry = non_empty(payload.industry);
            customer.phone = non_empty(payload.phone);
            customer.website = non_empty(payload.website);
        }
        OnboardingStep::Services => {
            let payload: ServicesStep = parse_payload(body)?;
            let plans: Vec<_> = payload
                .services
                .into_iter()
                .zip(0..)
                .map(|(input, index)| input.into_plan(customer.id, index))
                .collect();
            state
                .storage
                .replace_service_plans(customer.id, &plans)
                .await?;
            info!("Saved {} service plans", plans.len());
        }
        OnboardingStep::Branding => {
            let payload: BrandingStep = parse_payload(body)?;
            customer.brand_color = non_empty(payload.brand_color).map(|c| c.to_lowercase());
            customer.widget_title = non_empty(payload.widget_title);
            customer.logo_url = non_empty(payload.logo_url);
        }
        OnboardingStep::Plan => {
            let payload: PlanStep = parse_payload(body)?;
            let plan = state
                .storage
                .get_plan(&payload.plan_id)
                .await?
                .ok_or_else(|| AppError::bad_request(format!("Unknown plan: {}", payload.plan_id)))?;
            customer.selected_plan_id = Some(plan.id);
        }
        OnboardingStep::Review => {
            customer.onboarding_completed = true;
        }
    }

    customer.onboarding_step = customer.onboarding_step.max(step.number());
    customer.updated_at = Utc::now();
    state.storage.update_customer(&customer).await?;
    info!("Saved onboarding step {}", step.name());

    Ok(Json(onboarding_state(&customer)))
}

/// GET /api/customer/dashboard gathers everything the dashboard home renders.
#[tracing::instrument(skip_all, fields(customer_id = %customer.id))]
pub async fn dashboard_handler(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Value>, AppError> {
    let subscription = subscription_summary(&state, customer.id).await?;
    let service_plans = state.storage.list_service_plans(customer.id).await?;
    let active = service_plans.iter().filter(|p| p.is_active).count();

    Ok(Json(json!({
        "onboarding": onboarding_state(&customer),
        "subscription": subscription,
        "service_plan_count": service_plans.len(),
        "active_service_plan_count": active,
        "trialing": customer.is_trialing(Utc::now()),
        "embed": embed::snippets(&state.config.app_base_url, &customer),
        "customer": customer,
    })))
}
