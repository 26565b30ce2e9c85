use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::error;
use uuid::Uuid;

use super::models::{
    Customer, NewWebhookEvent, Plan, ServicePlan, Session, Subscription, SubscriptionLink,
    SubscriptionStatus,
};
use super::schema::{
    customers, plans, service_plans, sessions, subscription_links, subscriptions, webhook_events,
};
use super::{get_conn, PgPool, Storage, StorageError, StorageResult};

/// Diesel-backed store. Blocking queries run on tokio's blocking pool.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, query: F) -> StorageResult<T>
    where
        F: FnOnce(&mut PgConnection) -> QueryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            query(&mut conn).map_err(map_diesel_error)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("Task join error: {e}")))?
    }
}

fn map_diesel_error(err: DieselError) -> StorageError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            let message = match info.constraint_name() {
                Some(name) if name.contains("email") => "Email already registered",
                _ => "Record already exists",
            };
            StorageError::Conflict(message.to_string())
        }
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
            error!("Foreign key violation: {}", info.message());
            StorageError::NotFound("Referenced record")
        }
        other => {
            error!("Database query failed: {other}");
            StorageError::Backend(other.to_string())
        }
    }
}

fn expect_one(rows: usize, what: &'static str) -> StorageResult<()> {
    if rows == 0 {
        Err(StorageError::NotFound(what))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn insert_customer(&self, customer: &Customer) -> StorageResult<()> {
        let customer = customer.clone();
        self.run(move |conn| {
            diesel::insert_into(customers::table)
                .values(&customer)
                .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn get_customer(&self, id: Uuid) -> StorageResult<Option<Customer>> {
        self.run(move |conn| {
            customers::table
                .find(id)
                .select(Customer::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn get_customer_by_email(&self, email: &str) -> StorageResult<Option<Customer>> {
        let email = email.to_string();
        self.run(move |conn| {
            customers::table
                .filter(customers::email.eq(email))
                .select(Customer::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn get_customer_by_stripe_id(&self, stripe_id: &str) -> StorageResult<Option<Customer>> {
        let stripe_id = stripe_id.to_string();
        self.run(move |conn| {
            customers::table
                .filter(customers::stripe_customer_id.eq(stripe_id))
                .select(Customer::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn update_customer(&self, customer: &Customer) -> StorageResult<()> {
        let customer = customer.clone();
        let rows = self
            .run(move |conn| {
                diesel::update(customers::table.find(customer.id))
                    .set(&customer)
                    .execute(conn)
            })
            .await?;
        expect_one(rows, "Customer")
    }

    async fn upsert_plan(&self, plan: &Plan) -> StorageResult<()> {
        let plan = plan.clone();
        self.run(move |conn| {
            diesel::insert_into(plans::table)
                .values(&plan)
                .on_conflict(plans::id)
                .do_update()
                .set(&plan)
                .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn list_plans(&self) -> StorageResult<Vec<Plan>> {
        self.run(|conn| {
            plans::table
                .order(plans::sort_order.asc())
                .select(Plan::as_select())
                .load(conn)
        })
        .await
    }

    async fn get_plan(&self, id: &str) -> StorageResult<Option<Plan>> {
        let id = id.to_string();
        self.run(move |conn| {
            plans::table
                .find(id)
                .select(Plan::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> StorageResult<()> {
        let subscription = subscription.clone();
        self.run(move |conn| {
            diesel::insert_into(subscriptions::table)
                .values(&subscription)
                .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn get_subscription_by_checkout_session(
        &self,
        session_id: &str,
    ) -> StorageResult<Option<Subscription>> {
        let session_id = session_id.to_string();
        self.run(move |conn| {
            subscriptions::table
                .filter(subscriptions::stripe_checkout_session_id.eq(session_id))
                .select(Subscription::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn get_subscription_by_stripe_id(
        &self,
        stripe_id: &str,
    ) -> StorageResult<Option<Subscription>> {
        let stripe_id = stripe_id.to_string();
        self.run(move |conn| {
            subscriptions::table
                .filter(subscriptions::stripe_subscription_id.eq(stripe_id))
                .select(Subscription::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn current_subscription(&self, customer_id: Uuid) -> StorageResult<Option<Subscription>> {
        self.run(move |conn| {
            let live = subscriptions::table
                .filter(subscriptions::customer_id.eq(customer_id))
                .filter(
                    subscriptions::status
                        .eq(SubscriptionStatus::Active)
                        .or(subscriptions::status.eq(SubscriptionStatus::PastDue)),
                )
                .order(subscriptions::created_at.desc())
                .select(Subscription::as_select())
                .first(conn)
                .optional()?;
            if live.is_some() {
                return Ok(live);
            }
            subscriptions::table
                .filter(subscriptions::customer_id.eq(customer_id))
                .order(subscriptions::created_at.desc())
                .select(Subscription::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn update_subscription(&self, subscription: &Subscription) -> StorageResult<()> {
        let subscription = subscription.clone();
        let rows = self
            .run(move |conn| {
                diesel::update(subscriptions::table.find(subscription.id))
                    .set(&subscription)
                    .execute(conn)
            })
            .await?;
        expect_one(rows, "Subscription")
    }

    async fn insert_link(&self, link: &SubscriptionLink) -> StorageResult<()> {
        let link = link.clone();
        self.run(move |conn| {
            diesel::insert_into(subscription_links::table)
                .values(&link)
                .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn get_link_by_token(&self, token: &str) -> StorageResult<Option<SubscriptionLink>> {
        let token = token.to_string();
        self.run(move |conn| {
            subscription_links::table
                .filter(subscription_links::token.eq(token))
                .select(SubscriptionLink::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn update_link(&self, link: &SubscriptionLink) -> StorageResult<()> {
        let link = link.clone();
        let rows = self
            .run(move |conn| {
                diesel::update(subscription_links::table.find(link.id))
                    .set(&link)
                    .execute(conn)
            })
            .await?;
        expect_one(rows, "Subscription link")
    }

    async fn claim_link(&self, token: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let token = token.to_string();
        let rows = self
            .run(move |conn| {
                diesel::update(
                    subscription_links::table
                        .filter(subscription_links::token.eq(token))
                        .filter(subscription_links::is_used.eq(false))
                        .filter(subscription_links::expires_at.gt(now)),
                )
                .set((
                    subscription_links::is_used.eq(true),
                    subscription_links::used_at.eq(Some(now)),
                ))
                .execute(conn)
            })
            .await?;
        Ok(rows == 1)
    }

    async fn release_link(&self, token: &str) -> StorageResult<()> {
        let token = token.to_string();
        self.run(move |conn| {
            diesel::update(subscription_links::table.filter(subscription_links::token.eq(token)))
                .set((
                    subscription_links::is_used.eq(false),
                    subscription_links::used_at.eq(None::<DateTime<Utc>>),
                ))
                .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn list_service_plans(&self, customer_id: Uuid) -> StorageResult<Vec<ServicePlan>> {
        self.run(move |conn| {
            service_plans::table
                .filter(service_plans::customer_id.eq(customer_id))
                .order((service_plans::sort_order.asc(), service_plans::created_at.asc()))
                .select(ServicePlan::as_select())
                .load(conn)
        })
        .await
    }

    async fn get_service_plan(&self, id: Uuid) -> StorageResult<Option<ServicePlan>> {
        self.run(move |conn| {
            service_plans::table
                .find(id)
                .select(ServicePlan::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn insert_service_plan(&self, plan: &ServicePlan) -> StorageResult<()> {
        let plan = plan.clone();
        self.run(move |conn| {
            diesel::insert_into(service_plans::table)
                .values(&plan)
                .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn update_service_plan(&self, plan: &ServicePlan) -> StorageResult<()> {
        let plan = plan.clone();
        let rows = self
            .run(move |conn| {
                diesel::update(service_plans::table.find(plan.id))
                    .set(&plan)
                    .execute(conn)
            })
            .await?;
        expect_one(rows, "Service plan")
    }

    async fn delete_service_plan(&self, id: Uuid) -> StorageResult<()> {
        let rows = self
            .run(move |conn| diesel::delete(service_plans::table.find(id)).execute(conn))
            .await?;
        expect_one(rows, "Service plan")
    }

    async fn replace_service_plans(
        &self,
        customer_id: Uuid,
        plans: &[ServicePlan],
    ) -> StorageResult<()> {
        let plans = plans.to_vec();
        self.run(move |conn| {
            conn.transaction::<_, DieselError, _>(|conn| {
                diesel::delete(
                    service_plans::table.filter(service_plans::customer_id.eq(customer_id)),
                )
                .execute(conn)?;
                if !plans.is_empty() {
                    diesel::insert_into(service_plans::table)
                        .values(&plans)
                        .execute(conn)?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn insert_session(&self, session: &Session) -> StorageResult<()> {
        let session = session.clone();
        self.run(move |conn| {
            diesel::insert_into(sessions::table)
                .values(&session)
                .execute(conn)
        })
        .await
        .map(|_| ())
    }

    async fn get_session(&self, token: &str) -> StorageResult<Option<Session>> {
        let token = token.to_string();
        self.run(move |conn| {
            sessions::table
                .find(token)
                .select(Session::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn delete_session(&self, token: &str) -> StorageResult<()> {
        let token = token.to_string();
        self.run(move |conn| diesel::delete(sessions::table.find(token)).execute(conn))
            .await
            .map(|_| ())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        self.run(move |conn| {
            diesel::delete(sessions::table.filter(sessions::expires_at.le(now))).execute(conn)
        })
        .await
    }

    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
        received_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let event_id = event_id.to_string();
        let event_type = event_type.to_string();
        let rows = self
            .run(move |conn| {
                diesel::insert_into(webhook_events::table)
                    .values(NewWebhookEvent {
                        id: &event_id,
                        event_type: &event_type,
                        received_at,
                    })
                    .on_conflict_do_nothing()
                    .execute(conn)
            })
            .await?;
        Ok(rows == 1)
    }

    async fn release_webhook_event(&self, event_id: &str) -> StorageResult<()> {
        let event_id = event_id.to_string();
        self.run(move |conn| {
            diesel::delete(webhook_events::table.filter(webhook_events::id.eq(event_id)))
                .execute(conn)
        })
        .await
        .map(|_| ())
    }
}
