use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod database;
pub mod embed;
pub mod error;
pub mod handlers;
pub mod pricing;
pub mod state;
pub mod status_feed;
pub mod stripe_client;
pub mod stripe_webhook;
pub mod validation;
pub mod websocket_handler;
pub mod zapier;

use handlers::{auth as auth_api, billing, checkout, customer, links, misc, plans, service_plans, widget};
pub use state::AppState;
use stripe_webhook::webhook_handler;
use websocket_handler::checkout_status_ws_handler;

/// Every `/api` route of the service.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(misc::health_handler))
        .route("/api/stripe/config", get(misc::stripe_config_handler))
        // auth
        .route("/api/auth/register", post(auth_api::register_handler))
        .route("/api/auth/trial", post(auth_api::trial_handler))
        .route("/api/auth/login", post(auth_api::login_handler))
        .route("/api/auth/logout", post(auth_api::logout_handler))
        .route("/api/auth/me", get(auth_api::me_handler))
        // plans and checkout
        .route("/api/plans", get(plans::list_plans_handler))
        .route("/api/plans/{id}", get(plans::get_plan_handler))
        .route("/api/checkout", post(checkout::create_checkout_handler))
        .route(
            "/api/checkout/session/{session_id}",
            get(checkout::checkout_session_handler),
        )
        .route("/api/checkout/status", get(checkout_status_ws_handler))
        .route("/api/webhook", post(webhook_handler))
        // tenant account
        .route(
            "/api/customer/profile",
            get(customer::get_profile_handler).patch(customer::update_profile_handler),
        )
        .route("/api/customer/onboarding", get(customer::get_onboarding_handler))
        .route(
            "/api/customer/onboarding/{step}",
            put(customer::save_onboarding_step_handler),
        )
        .route("/api/customer/dashboard", get(customer::dashboard_handler))
        .route(
            "/api/service-plans",
            get(service_plans::list_service_plans_handler)
                .post(service_plans::create_service_plan_handler),
        )
        .route(
            "/api/service-plans/{id}",
            put(service_plans::update_service_plan_handler)
                .delete(service_plans::delete_service_plan_handler),
        )
        // subscription links
        .route("/api/subscription-links", post(links::create_link_handler))
        .route("/api/subscription-links/{token}", get(links::get_link_handler))
        .route(
            "/api/subscription-links/{token}/checkout",
            post(links::redeem_link_handler),
        )
        // billing
        .route(
            "/api/billing/subscription",
            get(billing::current_subscription_handler),
        )
        .route("/api/billing/portal", post(billing::portal_handler))
        .route("/api/billing/cancel", post(billing::cancel_handler))
        // widget
        .route("/api/widget/embed", get(widget::embed_code_handler))
        .route(
            "/api/widget/{customer_id}/config",
            get(widget::widget_config_handler),
        )
        .route(
            "/api/widget/{customer_id}/checkout",
            post(widget::widget_checkout_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
