use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::schema::{
    customers, plans, service_plans, sessions, subscription_links, subscriptions, webhook_events,
};

/// Random 32-byte token, hex encoded. Used for session cookies and invite links.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[ExistingTypePath = "crate::database::schema::sql_types::SubscriptionStatus"]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    PastDue,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::PastDue => "past_due",
        }
    }

    /// Billed in Stripe right now, as opposed to awaiting checkout or ended.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::PastDue)
    }

    /// Collapses Stripe's subscription statuses onto ours.
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "active" | "trialing" => Self::Active,
            "past_due" | "unpaid" => Self::PastDue,
            "canceled" | "incomplete_expired" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[ExistingTypePath = "crate::database::schema::sql_types::BillingInterval"]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

/// A home-service business account.
#[derive(
    Queryable, Selectable, Insertable, AsChangeset, Identifiable, Debug, Clone, Serialize,
)]
#[diesel(table_name = customers)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub company_name: String,
    pub phone: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub stripe_customer_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub onboarding_step: i32,
    pub onboarding_completed: bool,
    pub selected_plan_id: Option<String>,
    pub brand_color: Option<String>,
    pub widget_title: Option<String>,
    pub logo_url: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(email: String, name: String, company_name: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            name,
            company_name,
            phone: None,
            industry: None,
            website: None,
            stripe_customer_id: None,
            password_hash,
            onboarding_step: 0,
            onboarding_completed: false,
            selected_plan_id: None,
            brand_color: None,
            widget_title: None,
            logo_url: None,
            trial_ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_trialing(&self, now: DateTime<Utc>) -> bool {
        self.trial_ends_at.is_some_and(|ends| ends > now)
    }
}

/// A SaaS pricing tier backed by a Stripe price.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, Serialize)]
#[diesel(table_name = plans)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub interval: BillingInterval,
    pub stripe_price_id: String,
    pub features: Vec<String>,
    pub sort_order: i32,
}

#[derive(
    Queryable, Selectable, Insertable, AsChangeset, Identifiable, Debug, Clone, Serialize,
)]
#[diesel(table_name = subscriptions)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub stripe_subscription_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A subscription created when checkout starts, before Stripe confirms it.
    pub fn pending(customer_id: Uuid, plan_id: String, checkout_session_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_id,
            plan_id,
            status: SubscriptionStatus::Pending,
            stripe_subscription_id: None,
            stripe_checkout_session_id: Some(checkout_session_id),
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Why a subscription link can no longer be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkUnavailable {
    #[error("This subscription link has already been used")]
    Used,
    #[error("This subscription link has expired")]
    Expired,
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Identifiable, Debug, Clone, Serialize)]
#[diesel(table_name = subscription_links)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionLink {
    pub id: Uuid,
    pub token: String,
    pub customer_id: Uuid,
    pub plan_id: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionLink {
    pub const TTL_DAYS: i64 = 7;

    pub fn new(customer_id: Uuid, plan_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: generate_token(),
            customer_id,
            plan_id,
            expires_at: now + Duration::days(Self::TTL_DAYS),
            is_used: false,
            used_at: None,
            created_at: now,
        }
    }

    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), LinkUnavailable> {
        if self.is_used {
            return Err(LinkUnavailable::Used);
        }
        if self.expires_at <= now {
            return Err(LinkUnavailable::Expired);
        }
        Ok(())
    }

    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.is_used = true;
        self.used_at = Some(now);
    }
}

/// A tenant-defined maintenance offering, rendered by the widget.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Identifiable, Debug, Clone, Serialize)]
#[diesel(table_name = service_plans)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ServicePlan {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub interval: BillingInterval,
    pub features: Vec<String>,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Session {
    pub token: String,
    pub customer_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(customer_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token: generate_token(),
            customer_id,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = webhook_events)]
pub struct NewWebhookEvent<'a> {
    pub id: &'a str,
    pub event_type: &'a str,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_status_mapping() {
        assert_eq!(SubscriptionStatus::from_stripe("active"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_stripe("trialing"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_stripe("past_due"), SubscriptionStatus::PastDue);
        assert_eq!(SubscriptionStatus::from_stripe("unpaid"), SubscriptionStatus::PastDue);
        assert_eq!(SubscriptionStatus::from_stripe("canceled"), SubscriptionStatus::Cancelled);
        assert_eq!(
            SubscriptionStatus::from_stripe("incomplete_expired"),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(SubscriptionStatus::from_stripe("incomplete"), SubscriptionStatus::Pending);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SubscriptionStatus::PastDue).unwrap();
        assert_eq!(json, "\"past_due\"");
    }

    #[test]
    fn test_link_expires_seven_days_out() {
        let now = Utc::now();
        let link = SubscriptionLink::new(Uuid::new_v4(), "starter".into(), now);
        assert_eq!(link.expires_at - now, Duration::days(7));
        assert_eq!(link.token.len(), 64);
        assert!(link.check_redeemable(now).is_ok());
    }

    #[test]
    fn test_link_lifecycle() {
        let now = Utc::now();
        let mut link = SubscriptionLink::new(Uuid::new_v4(), "starter".into(), now);
        assert_eq!(
            link.check_redeemable(now + Duration::days(8)),
            Err(LinkUnavailable::Expired)
        );

        link.mark_used(now);
        assert_eq!(link.check_redeemable(now), Err(LinkUnavailable::Used));
        assert_eq!(link.used_at, Some(now));
    }

    #[test]
    fn test_customer_email_is_normalized() {
        let customer = Customer::new(
            "  Owner@Example.COM ".into(),
            "Pat".into(),
            "Cool Air HVAC".into(),
            "hash".into(),
        );
        assert_eq!(customer.email, "owner@example.com");
        assert!(!customer.is_trialing(Utc::now()));
    }

    #[test]
    fn test_customer_serialization_hides_password_hash() {
        let customer = Customer::new("a@b.co".into(), "A".into(), "B".into(), "secret".into());
        let json = serde_json::to_value(&customer).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["company_name"], "B");
    }
}
