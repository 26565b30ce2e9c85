use std::collections::HashMap;

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Request, State},
    Json,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{error, info, trace, warn};

use crate::database::{Subscription, SubscriptionStatus};
use crate::error::AppError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing stripe-signature header")]
    MissingHeader,
    #[error("Signature header has no timestamp")]
    MissingTimestamp,
    #[error("Signature header has no v1 signature")]
    MissingSignature,
    #[error("Webhook timestamp outside tolerance")]
    TimestampOutOfTolerance,
    #[error("Invalid webhook signature")]
    Mismatch,
}

/// Checks a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=<hex>...]`)
/// against the raw request body.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    let matched = signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|provided| bool::from(provided.ct_eq(expected.as_slice())));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub subscription: Option<String>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub lines: Option<InvoiceLines>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLines {
    #[serde(default)]
    pub data: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    pub period: Option<Period>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Period {
    pub start: i64,
    pub end: i64,
}

impl InvoiceObject {
    /// The service period the invoice pays for. Line items carry the current
    /// period; the invoice-level fields are a fallback.
    fn service_period(&self) -> Option<Period> {
        self.lines
            .as_ref()
            .and_then(|lines| lines.data.iter().find_map(|line| line.period))
            .or(match (self.period_start, self.period_end) {
                (Some(start), Some(end)) => Some(Period { start, end }),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Ignored,
    Duplicate,
}

impl WebhookOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Ignored => "ignored",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Extractor for verified Stripe webhook events.
pub struct StripeEvent(pub WebhookEvent);

impl FromRequest<AppState> for StripeEvent {
    type Rejection = AppError;

    async fn from_request(req: Request<Body>, state: &AppState) -> Result<Self, Self::Rejection> {
        trace!("Received webhook event");
        let signature = req
            .headers()
            .get("stripe-signature")
            .ok_or(SignatureError::MissingHeader)
            .and_then(|value| value.to_str().map_err(|_| SignatureError::MissingHeader))
            .map_err(|e| {
                error!("Rejecting webhook: {e}");
                AppError::bad_request(e.to_string())
            })?
            .to_string();

        let payload = Bytes::from_request(req, state).await.map_err(|e| {
            error!("Encountered error {e:?} when reading webhook payload");
            AppError::bad_request("Unreadable webhook payload")
        })?;

        verify_signature(
            &payload,
            &signature,
            &state.config.stripe.webhook_secret,
            Utc::now().timestamp(),
        )
        .map_err(|e| {
            error!("Error verifying webhook signature: {e}");
            AppError::bad_request(format!("Webhook Error: {e}"))
        })?;

        let event: WebhookEvent = serde_json::from_slice(&payload).map_err(|e| {
            error!("Error parsing webhook event: {e}");
            AppError::bad_request("Webhook Error: malformed event payload")
        })?;
        trace!("Event: {} {}", event.id, event.event_type);
        Ok(Self(event))
    }
}

/// Webhook handler that processes Stripe events.
pub async fn webhook_handler(
    State(state): State<AppState>,
    StripeEvent(event): StripeEvent,
) -> Result<Json<Value>, AppError> {
    let outcome = process_event(&state, &event).await?;
    Ok(Json(json!({ "received": true, "outcome": outcome.as_str() })))
}

#[tracing::instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
pub async fn process_event(
    state: &AppState,
    event: &WebhookEvent,
) -> Result<WebhookOutcome, AppError> {
    let claimed = state
        .storage
        .claim_webhook_event(&event.id, &event.event_type, Utc::now())
        .await?;
    if !claimed {
        info!("Skipping already processed event {}", event.id);
        return Ok(WebhookOutcome::Duplicate);
    }

    let result = dispatch(state, event).await;
    // Only processed events stay claimed; anything else may be redelivered.
    if !matches!(result, Ok(WebhookOutcome::Processed)) {
        if let Err(e) = state.storage.release_webhook_event(&event.id).await {
            error!("Failed to release webhook event {}: {e}", event.id);
        }
    }
    result
}

async fn dispatch(state: &AppState, event: &WebhookEvent) -> Result<WebhookOutcome, AppError> {
    let object = event.data.object.clone();
    let outcome = match event.event_type.as_str() {
        "checkout.session.completed" => checkout_completed(state, parse(object)?).await?,
        "invoice.paid" => invoice_paid(state, parse(object)?).await?,
        "invoice.payment_failed" => invoice_payment_failed(state, parse(object)?).await?,
        "customer.subscription.updated" => subscription_updated(state, parse(object)?).await?,
        "customer.subscription.deleted" => subscription_deleted(state, parse(object)?).await?,
        other => {
            info!("Unhandled event type: {other}");
            WebhookOutcome::Ignored
        }
    };
    Ok(outcome)
}

fn parse<T: for<'de> Deserialize<'de>>(object: Value) -> Result<T, AppError> {
    serde_json::from_value(object).map_err(|e| {
        error!("Unexpected webhook object shape: {e}");
        AppError::bad_request(format!("Webhook Error: {e}"))
    })
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

async fn checkout_completed(
    state: &AppState,
    session: CheckoutSessionObject,
) -> Result<WebhookOutcome, AppError> {
    if session.metadata.get("kind").map(String::as_str) == Some("widget") {
        let email = session
            .customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
            .or(session.customer_email.clone());
        info!("Widget checkout completed: session={}", session.id);
        state.notifier.notify(
            "widget.checkout.completed",
            json!({
                "tenant_id": session.metadata.get("customer_id"),
                "service_plan_id": session.metadata.get("service_plan_id"),
                "email": email,
                "checkout_session_id": session.id,
                "stripe_subscription_id": session.subscription,
            }),
        );
        return Ok(WebhookOutcome::Processed);
    }

    let Some(mut subscription) = state
        .storage
        .get_subscription_by_checkout_session(&session.id)
        .await?
    else {
        warn!("No subscription for checkout session {}", session.id);
        return Ok(WebhookOutcome::Ignored);
    };

    subscription.status = SubscriptionStatus::Active;
    if session.subscription.is_some() {
        subscription.stripe_subscription_id = session.subscription.clone();
    }
    subscription.updated_at = Utc::now();
    state.storage.update_subscription(&subscription).await?;
    info!(
        "Subscription {} activated by checkout session {}",
        subscription.id, session.id
    );

    if let Some(mut customer) = state.storage.get_customer(subscription.customer_id).await? {
        if customer.stripe_customer_id.is_none() && session.customer.is_some() {
            customer.stripe_customer_id = session.customer.clone();
            customer.updated_at = Utc::now();
            state.storage.update_customer(&customer).await?;
        }
        state.notifier.notify(
            "subscription.activated",
            json!({
                "customer_id": customer.id,
                "email": customer.email,
                "company_name": customer.company_name,
                "plan_id": subscription.plan_id,
            }),
        );
    }

    broadcast_status(state, &subscription).await;
    Ok(WebhookOutcome::Processed)
}

async fn invoice_paid(state: &AppState, invoice: InvoiceObject) -> Result<WebhookOutcome, AppError> {
    let Some(mut subscription) = find_by_stripe_id(state, invoice.subscription.as_deref()).await?
    else {
        return Ok(WebhookOutcome::Ignored);
    };

    subscription.status = SubscriptionStatus::Active;
    if let Some(period) = invoice.service_period() {
        subscription.current_period_start = timestamp(Some(period.start));
        subscription.current_period_end = timestamp(Some(period.end));
    }
    subscription.updated_at = Utc::now();
    state.storage.update_subscription(&subscription).await?;
    info!("Invoice {} paid for subscription {}", invoice.id, subscription.id);

    broadcast_status(state, &subscription).await;
    Ok(WebhookOutcome::Processed)
}

async fn invoice_payment_failed(
    state: &AppState,
    invoice: InvoiceObject,
) -> Result<WebhookOutcome, AppError> {
    let Some(mut subscription) = find_by_stripe_id(state, invoice.subscription.as_deref()).await?
    else {
        return Ok(WebhookOutcome::Ignored);
    };

    subscription.status = SubscriptionStatus::PastDue;
    subscription.updated_at = Utc::now();
    state.storage.update_subscription(&subscription).await?;
    warn!("Invoice {} failed for subscription {}", invoice.id, subscription.id);

    broadcast_status(state, &subscription).await;
    Ok(WebhookOutcome::Processed)
}

async fn subscription_updated(
    state: &AppState,
    object: SubscriptionObject,
) -> Result<WebhookOutcome, AppError> {
    let Some(mut subscription) = find_by_stripe_id(state, Some(&object.id)).await? else {
        return Ok(WebhookOutcome::Ignored);
    };

    subscription.status = SubscriptionStatus::from_stripe(&object.status);
    if let Some(start) = timestamp(object.current_period_start) {
        subscription.current_period_start = Some(start);
    }
    if let Some(end) = timestamp(object.current_period_end) {
        subscription.current_period_end = Some(end);
    }
    subscription.cancel_at_period_end = object.cancel_at_period_end;
    subscription.updated_at = Utc::now();
    state.storage.update_subscription(&subscription).await?;
    info!(
        "Subscription {} updated: stripe_status={}, status={}",
        subscription.id, object.status, subscription.status
    );

    broadcast_status(state, &subscription).await;
    Ok(WebhookOutcome::Processed)
}

async fn subscription_deleted(
    state: &AppState,
    object: SubscriptionObject,
) -> Result<WebhookOutcome, AppError> {
    let Some(mut subscription) = find_by_stripe_id(state, Some(&object.id)).await? else {
        return Ok(WebhookOutcome::Ignored);
    };

    subscription.status = SubscriptionStatus::Cancelled;
    subscription.cancel_at_period_end = false;
    subscription.updated_at = Utc::now();
    state.storage.update_subscription(&subscription).await?;
    info!("Subscription {} cancelled", subscription.id);

    broadcast_status(state, &subscription).await;
    Ok(WebhookOutcome::Processed)
}

async fn find_by_stripe_id(
    state: &AppState,
    stripe_id: Option<&str>,
) -> Result<Option<Subscription>, AppError> {
    let Some(stripe_id) = stripe_id else {
        info!("Event carries no subscription id");
        return Ok(None);
    };
    let found = state.storage.get_subscription_by_stripe_id(stripe_id).await?;
    if found.is_none() {
        warn!("No local subscription for Stripe subscription {stripe_id}");
    }
    Ok(found)
}

async fn broadcast_status(state: &AppState, subscription: &Subscription) {
    let Some(session_id) = subscription.stripe_checkout_session_id.as_deref() else {
        return;
    };
    let update = json!({
        "type": "subscription_status_update",
        "session_id": session_id,
        "subscription_id": subscription.id,
        "status": subscription.status,
        "timestamp": Utc::now().to_rfc3339(),
    });
    state
        .status_feed
        .broadcast_message(session_id, &update.to_string())
        .await;
}
