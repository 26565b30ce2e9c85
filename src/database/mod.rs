use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use r2d2::{Pool, PooledConnection};
use tracing::{error, info};
use uuid::Uuid;

pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;

pub use memory::MemStorage;
pub use models::{
    BillingInterval, Customer, Plan, ServicePlan, Session, Subscription, SubscriptionLink,
    SubscriptionStatus,
};
pub use postgres::PgStorage;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for every record the API reads or writes.
///
/// Updates are whole-record writes: callers load a row, change fields and
/// hand the row back.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_customer(&self, customer: &Customer) -> StorageResult<()>;
    async fn get_customer(&self, id: Uuid) -> StorageResult<Option<Customer>>;
    async fn get_customer_by_email(&self, email: &str) -> StorageResult<Option<Customer>>;
    async fn get_customer_by_stripe_id(&self, stripe_id: &str) -> StorageResult<Option<Customer>>;
    async fn update_customer(&self, customer: &Customer) -> StorageResult<()>;

    async fn upsert_plan(&self, plan: &Plan) -> StorageResult<()>;
    async fn list_plans(&self) -> StorageResult<Vec<Plan>>;
    async fn get_plan(&self, id: &str) -> StorageResult<Option<Plan>>;

    async fn insert_subscription(&self, subscription: &Subscription) -> StorageResult<()>;
    async fn get_subscription_by_checkout_session(
        &self,
        session_id: &str,
    ) -> StorageResult<Option<Subscription>>;
    async fn get_subscription_by_stripe_id(
        &self,
        stripe_id: &str,
    ) -> StorageResult<Option<Subscription>>;
    /// The subscription a customer is billed on: the newest active or past
    /// due one, falling back to the newest of any status.
    async fn current_subscription(&self, customer_id: Uuid) -> StorageResult<Option<Subscription>>;
    async fn update_subscription(&self, subscription: &Subscription) -> StorageResult<()>;

    async fn insert_link(&self, link: &SubscriptionLink) -> StorageResult<()>;
    async fn get_link_by_token(&self, token: &str) -> StorageResult<Option<SubscriptionLink>>;
    async fn update_link(&self, link: &SubscriptionLink) -> StorageResult<()>;
    /// Marks an unused, unexpired link as used. Returns `false` when the link
    /// was no longer redeemable.
    async fn claim_link(&self, token: &str, now: DateTime<Utc>) -> StorageResult<bool>;
    /// Reopens a claimed link whose checkout could not be started.
    async fn release_link(&self, token: &str) -> StorageResult<()>;

    async fn list_service_plans(&self, customer_id: Uuid) -> StorageResult<Vec<ServicePlan>>;
    async fn get_service_plan(&self, id: Uuid) -> StorageResult<Option<ServicePlan>>;
    async fn insert_service_plan(&self, plan: &ServicePlan) -> StorageResult<()>;
    async fn update_service_plan(&self, plan: &ServicePlan) -> StorageResult<()>;
    async fn delete_service_plan(&self, id: Uuid) -> StorageResult<()>;
    /// Swaps a tenant's whole service catalogue in one step.
    async fn replace_service_plans(
        &self,
        customer_id: Uuid,
        plans: &[ServicePlan],
    ) -> StorageResult<()>;

    async fn insert_session(&self, session: &Session) -> StorageResult<()>;
    async fn get_session(&self, token: &str) -> StorageResult<Option<Session>>;
    async fn delete_session(&self, token: &str) -> StorageResult<()>;
    /// Removes sessions that expired before `now`. Returns how many went.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize>;

    /// Claims a Stripe event id for processing. Returns `false` when another
    /// delivery already holds it.
    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
        received_at: DateTime<Utc>,
    ) -> StorageResult<bool>;
    /// Gives up a claim so a redelivery of the event is processed again.
    async fn release_webhook_event(&self, event_id: &str) -> StorageResult<()>;
}

pub fn create_db_pool(database_url: &str) -> Result<PgPool, StorageError> {
    info!("Connecting to database");

    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(5)
        .build(manager)
        .map_err(|e| {
            error!("Failed to create database connection pool: {}", e);
            StorageError::Backend(e.to_string())
        })?;

    // Verify connection works
    let _conn = get_conn(&pool)?;

    info!("Successfully connected to database");
    Ok(pool)
}

pub fn get_conn(pool: &PgPool) -> Result<PgPooledConnection, StorageError> {
    pool.get().map_err(|e| {
        error!("Failed to get database connection from pool: {}", e);
        StorageError::Backend(e.to_string())
    })
}
