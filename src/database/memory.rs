use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{Customer, Plan, ServicePlan, Session, Subscription, SubscriptionLink};
use super::{Storage, StorageError, StorageResult};

#[derive(Default)]
struct Tables {
    customers: HashMap<Uuid, Customer>,
    plans: HashMap<String, Plan>,
    subscriptions: HashMap<Uuid, Subscription>,
    links: HashMap<String, SubscriptionLink>,
    service_plans: HashMap<Uuid, ServicePlan>,
    sessions: HashMap<String, Session>,
    webhook_events: HashMap<String, (String, DateTime<Utc>)>,
}

/// Process-local store used when `DATABASE_URL` is unset and by the tests.
#[derive(Default)]
pub struct MemStorage {
    tables: RwLock<Tables>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn insert_customer(&self, customer: &Customer) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.customers.values().any(|c| c.email == customer.email) {
            return Err(StorageError::Conflict("Email already registered".to_string()));
        }
        tables.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn get_customer(&self, id: Uuid) -> StorageResult<Option<Customer>> {
        Ok(self.tables.read().await.customers.get(&id).cloned())
    }

    async fn get_customer_by_email(&self, email: &str) -> StorageResult<Option<Customer>> {
        let tables = self.tables.read().await;
        Ok(tables.customers.values().find(|c| c.email == email).cloned())
    }

    async fn get_customer_by_stripe_id(&self, stripe_id: &str) -> StorageResult<Option<Customer>> {
        let tables = self.tables.read().await;
        Ok(tables
            .customers
            .values()
            .find(|c| c.stripe_customer_id.as_deref() == Some(stripe_id))
            .cloned())
    }

    async fn update_customer(&self, customer: &Customer) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables
            .customers
            .values()
            .any(|c| c.id != customer.id && c.email == customer.email)
        {
            return Err(StorageError::Conflict("Email already registered".to_string()));
        }
        match tables.customers.get_mut(&customer.id) {
            Some(slot) => {
                *slot = customer.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound("Customer")),
        }
    }

    async fn upsert_plan(&self, plan: &Plan) -> StorageResult<()> {
        self.tables.write().await.plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn list_plans(&self) -> StorageResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.tables.read().await.plans.values().cloned().collect();
        plans.sort_by_key(|p| p.sort_order);
        Ok(plans)
    }

    async fn get_plan(&self, id: &str) -> StorageResult<Option<Plan>> {
        Ok(self.tables.read().await.plans.get(id).cloned())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.customers.contains_key(&subscription.customer_id) {
            return Err(StorageError::NotFound("Customer"));
        }
        if !tables.plans.contains_key(&subscription.plan_id) {
            return Err(StorageError::NotFound("Plan"));
        }
        tables.subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription_by_checkout_session(
        &self,
        session_id: &str,
    ) -> StorageResult<Option<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .find(|s| s.stripe_checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn get_subscription_by_stripe_id(
        &self,
        stripe_id: &str,
    ) -> StorageResult<Option<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(stripe_id))
            .cloned())
    }

    async fn current_subscription(&self, customer_id: Uuid) -> StorageResult<Option<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter(|s| s.customer_id == customer_id)
            .max_by_key(|s| (s.status.is_live(), s.created_at))
            .cloned())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        match tables.subscriptions.get_mut(&subscription.id) {
            Some(slot) => {
                *slot = subscription.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound("Subscription")),
        }
    }

    async fn insert_link(&self, link: &SubscriptionLink) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.links.contains_key(&link.token) {
            return Err(StorageError::Conflict("Duplicate link token".to_string()));
        }
        tables.links.insert(link.token.clone(), link.clone());
        Ok(())
    }

    async fn get_link_by_token(&self, token: &str) -> StorageResult<Option<SubscriptionLink>> {
        Ok(self.tables.read().await.links.get(token).cloned())
    }

    async fn update_link(&self, link: &SubscriptionLink) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        match tables.links.get_mut(&link.token) {
            Some(slot) => {
                *slot = link.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound("Subscription link")),
        }
    }

    async fn claim_link(&self, token: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(link) = tables.links.get_mut(token) else {
            return Ok(false);
        };
        if link.check_redeemable(now).is_err() {
            return Ok(false);
        }
        link.mark_used(now);
        Ok(true)
    }

    async fn release_link(&self, token: &str) -> StorageResult<()> {
        if let Some(link) = self.tables.write().await.links.get_mut(token) {
            link.is_used = false;
            link.used_at = None;
        }
        Ok(())
    }

    async fn list_service_plans(&self, customer_id: Uuid) -> StorageResult<Vec<ServicePlan>> {
        let tables = self.tables.read().await;
        let mut plans: Vec<ServicePlan> = tables
            .service_plans
            .values()
            .filter(|p| p.customer_id == customer_id)
            .cloned()
            .collect();
        plans.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(plans)
    }

    async fn get_service_plan(&self, id: Uuid) -> StorageResult<Option<ServicePlan>> {
        Ok(self.tables.read().await.service_plans.get(&id).cloned())
    }

    async fn insert_service_plan(&self, plan: &ServicePlan) -> StorageResult<()> {
        self.tables.write().await.service_plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn update_service_plan(&self, plan: &ServicePlan) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        match tables.service_plans.get_mut(&plan.id) {
            Some(slot) => {
                *slot = plan.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound("Service plan")),
        }
    }

    async fn delete_service_plan(&self, id: Uuid) -> StorageResult<()> {
        match self.tables.write().await.service_plans.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound("Service plan")),
        }
    }

    async fn replace_service_plans(
        &self,
        customer_id: Uuid,
        plans: &[ServicePlan],
    ) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        tables.service_plans.retain(|_, p| p.customer_id != customer_id);
        for plan in plans {
            tables.service_plans.insert(plan.id, plan.clone());
        }
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, token: &str) -> StorageResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> StorageResult<()> {
        self.tables.write().await.sessions.remove(token);
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| !session.is_expired(now));
        Ok(before - tables.sessions.len())
    }

    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
        received_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.webhook_events.contains_key(event_id) {
            return Ok(false);
        }
        tables
            .webhook_events
            .insert(event_id.to_string(), (event_type.to_string(), received_at));
        Ok(true)
    }

    async fn release_webhook_event(&self, event_id: &str) -> StorageResult<()> {
        self.tables.write().await.webhook_events.remove(event_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{BillingInterval, SubscriptionStatus};

    fn customer(email: &str) -> Customer {
        Customer::new(email.into(), "Pat".into(), "Pat's Pest Control".into(), "h".into())
    }

    fn plan(id: &str, sort_order: i32) -> Plan {
        Plan {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            price_cents: 4900,
            interval: BillingInterval::Month,
            stripe_price_id: format!("price_{id}"),
            features: vec![],
            sort_order,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemStorage::new();
        store.insert_customer(&customer("a@example.com")).await.unwrap();
        let err = store.insert_customer(&customer("a@example.com")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_plans_are_ordered() {
        let store = MemStorage::new();
        store.upsert_plan(&plan("enterprise", 3)).await.unwrap();
        store.upsert_plan(&plan("starter", 1)).await.unwrap();
        store.upsert_plan(&plan("professional", 2)).await.unwrap();
        let ids: Vec<String> = store.list_plans().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["starter", "professional", "enterprise"]);
    }

    #[tokio::test]
    async fn test_subscription_requires_known_customer_and_plan() {
        let store = MemStorage::new();
        let sub = Subscription::pending(Uuid::new_v4(), "starter".into(), "cs_1".into());
        assert!(matches!(
            store.insert_subscription(&sub).await,
            Err(StorageError::NotFound("Customer"))
        ));
    }

    #[tokio::test]
    async fn test_newest_subscription_wins_among_pending() {
        let store = MemStorage::new();
        let c = customer("b@example.com");
        store.insert_customer(&c).await.unwrap();
        store.upsert_plan(&plan("starter", 1)).await.unwrap();

        let mut first = Subscription::pending(c.id, "starter".into(), "cs_1".into());
        first.created_at -= chrono::Duration::hours(1);
        let second = Subscription::pending(c.id, "starter".into(), "cs_2".into());
        store.insert_subscription(&first).await.unwrap();
        store.insert_subscription(&second).await.unwrap();

        let current = store.current_subscription(c.id).await.unwrap().unwrap();
        assert_eq!(current.stripe_checkout_session_id.as_deref(), Some("cs_2"));
    }

    #[tokio::test]
    async fn test_live_subscription_outranks_newer_pending() {
        let store = MemStorage::new();
        let c = customer("c@example.com");
        store.insert_customer(&c).await.unwrap();
        store.upsert_plan(&plan("starter", 1)).await.unwrap();

        let mut active = Subscription::pending(c.id, "starter".into(), "cs_1".into());
        active.created_at -= chrono::Duration::hours(1);
        active.status = SubscriptionStatus::Active;
        let abandoned = Subscription::pending(c.id, "starter".into(), "cs_2".into());
        store.insert_subscription(&active).await.unwrap();
        store.insert_subscription(&abandoned).await.unwrap();

        let current = store.current_subscription(c.id).await.unwrap().unwrap();
        assert_eq!(current.id, active.id);
    }

    #[tokio::test]
    async fn test_link_is_claimed_once() {
        let store = MemStorage::new();
        let c = customer("d@example.com");
        let link = SubscriptionLink::new(c.id, "starter".into(), Utc::now());
        store.insert_link(&link).await.unwrap();

        assert!(store.claim_link(&link.token, Utc::now()).await.unwrap());
        assert!(!store.claim_link(&link.token, Utc::now()).await.unwrap());

        store.release_link(&link.token).await.unwrap();
        let reopened = store.get_link_by_token(&link.token).await.unwrap().unwrap();
        assert!(!reopened.is_used);
        assert!(reopened.used_at.is_none());
    }

    #[tokio::test]
    async fn test_expired_link_cannot_be_claimed() {
        let store = MemStorage::new();
        let created = Utc::now() - chrono::Duration::days(8);
        let link = SubscriptionLink::new(Uuid::new_v4(), "starter".into(), created);
        store.insert_link(&link).await.unwrap();

        assert!(!store.claim_link(&link.token, Utc::now()).await.unwrap());
        assert!(!store.claim_link("missing", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_webhook_events_are_claimed_once() {
        let store = MemStorage::new();
        let now = Utc::now();
        assert!(store.claim_webhook_event("evt_1", "invoice.paid", now).await.unwrap());
        assert!(!store.claim_webhook_event("evt_1", "invoice.paid", now).await.unwrap());

        store.release_webhook_event("evt_1").await.unwrap();
        assert!(store.claim_webhook_event("evt_1", "invoice.paid", now).await.unwrap());
    }
}
