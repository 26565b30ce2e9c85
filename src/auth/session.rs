//! Cookie sessions backed by the sessions table.
//!
//! The cookie carries an opaque random token; the session row maps it to a
//! customer and an expiry.

use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use cookie::{Cookie, SameSite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::{Customer, Session};
use crate::error::AppError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "sp_session";

/// Creates a session row for `customer_id` and returns the `Set-Cookie` value.
/// Expired sessions are swept first.
pub async fn start_session(state: &AppState, customer_id: Uuid) -> Result<String, AppError> {
    match state.storage.delete_expired_sessions(Utc::now()).await {
        Ok(0) => {}
        Ok(swept) => debug!(swept, "Removed expired sessions"),
        Err(e) => warn!("Failed to sweep expired sessions: {e}"),
    }

    let session = Session::new(customer_id, Duration::hours(state.config.session_ttl_hours));
    state.storage.insert_session(&session).await?;
    info!(%customer_id, "Session started");
    Ok(session_cookie(&session.token, &state.config).to_string())
}

/// Deletes the session named by the request cookie, if any, and returns the
/// `Set-Cookie` value that clears it.
pub async fn end_session(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    if let Some(token) = session_token(headers) {
        state.storage.delete_session(&token).await?;
    }
    Ok(removal_cookie().to_string())
}

pub fn session_cookie(token: &str, config: &Config) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(cookie::time::Duration::hours(config.session_ttl_hours))
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    cookie.make_removal();
    cookie
}

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| Cookie::split_parse(raw.to_string()))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// The logged-in tenant. Rejects with 401 when the session is missing,
/// unknown or expired.
pub struct CurrentCustomer(pub Customer);

impl FromRequestParts<AppState> for CurrentCustomer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("Not authenticated"))?;

        let session = state
            .storage
            .get_session(&token)
            .await?
            .ok_or_else(|| AppError::unauthorized("Not authenticated"))?;

        if session.is_expired(Utc::now()) {
            debug!(customer_id = %session.customer_id, "Session expired");
            state.storage.delete_session(&token).await?;
            return Err(AppError::unauthorized("Session expired"));
        }

        let customer = state
            .storage
            .get_customer(session.customer_id)
            .await?
            .ok_or_else(|| AppError::unauthorized("Not authenticated"))?;

        Ok(Self(customer))
    }
}
