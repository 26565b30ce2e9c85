use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, Client, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval, CreateCustomer, Currency, Customer,
    CustomerId, Subscription, SubscriptionId, UpdateSubscription,
};
use tracing::{error, info};

use crate::database::BillingInterval;
use crate::error::AppError;

/// What a checkout session sells.
#[derive(Debug, Clone, PartialEq)]
pub enum LineItem {
    /// A price that already exists in Stripe (the SaaS tiers).
    Price(String),
    /// A recurring price built inline (tenant service plans sold via the widget).
    Recurring {
        name: String,
        description: Option<String>,
        unit_amount: i64,
        interval: BillingInterval,
    },
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub stripe_customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub line_item: LineItem,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// The slice of the Stripe API the handlers use.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Returns the new Stripe customer id.
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<String, AppError>;

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CreatedCheckoutSession, AppError>;

    /// Returns the portal URL.
    async fn create_portal_session(
        &self,
        stripe_customer_id: &str,
        return_url: &str,
    ) -> Result<String, AppError>;

    async fn cancel_at_period_end(&self, stripe_subscription_id: &str) -> Result<(), AppError>;
}

pub struct StripeGateway {
    client: Client,
}

impl StripeGateway {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(secret_key.to_string()),
        }
    }
}

fn stripe_error(context: &str, e: impl std::fmt::Debug + std::fmt::Display) -> AppError {
    error!("{context}: {e:?}");
    AppError::Stripe(format!("{context}: {e}"))
}

fn parse_customer_id(id: &str) -> Result<CustomerId, AppError> {
    id.parse::<CustomerId>()
        .map_err(|e| stripe_error("Invalid Stripe customer id", e))
}

fn price_data(
    name: String,
    description: Option<String>,
    unit_amount: i64,
    interval: BillingInterval,
) -> CreateCheckoutSessionLineItemsPriceData {
    CreateCheckoutSessionLineItemsPriceData {
        currency: Currency::USD,
        product: None,
        product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
            description,
            images: None,
            metadata: None,
            name,
            tax_code: None,
        }),
        recurring: Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
            interval: match interval {
                BillingInterval::Month => CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                BillingInterval::Year => CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Year,
            },
            interval_count: None,
        }),
        tax_behavior: None,
        unit_amount: Some(unit_amount),
        unit_amount_decimal: None,
    }
}

#[async_trait]
impl BillingGateway for StripeGateway {
    #[tracing::instrument(skip(self, metadata))]
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<String, AppError> {
        let customer = Customer::create(
            &self.client,
            CreateCustomer {
                name: Some(name),
                email: Some(email),
                metadata: Some(metadata),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| stripe_error("Error creating customer", e))?;
        info!("Created customer with id: {}", customer.id);
        Ok(customer.id.to_string())
    }

    #[tracing::instrument(skip(self, request))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CreatedCheckoutSession, AppError> {
        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.metadata = Some(request.metadata.clone());

        match request.stripe_customer_id.as_deref() {
            Some(id) => params.customer = Some(parse_customer_id(id)?),
            None => params.customer_email = request.customer_email.as_deref(),
        }

        let line_item = match request.line_item.clone() {
            LineItem::Price(price) => CreateCheckoutSessionLineItems {
                price: Some(price),
                quantity: Some(1),
                ..Default::default()
            },
            LineItem::Recurring {
                name,
                description,
                unit_amount,
                interval,
            } => CreateCheckoutSessionLineItems {
                price_data: Some(price_data(name, description, unit_amount, interval)),
                quantity: Some(1),
                ..Default::default()
            },
        };
        params.line_items = Some(vec![line_item]);

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| stripe_error("Error creating checkout session", e))?;
        info!("Created checkout session with id: {}", session.id);

        Ok(CreatedCheckoutSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn create_portal_session(
        &self,
        stripe_customer_id: &str,
        return_url: &str,
    ) -> Result<String, AppError> {
        let mut params = CreateBillingPortalSession::new(parse_customer_id(stripe_customer_id)?);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client, params)
            .await
            .map_err(|e| stripe_error("Error creating billing portal session", e))?;
        info!("Created billing portal session with id: {}", session.id);
        Ok(session.url)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_at_period_end(&self, stripe_subscription_id: &str) -> Result<(), AppError> {
        let id = stripe_subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| stripe_error("Invalid Stripe subscription id", e))?;

        let mut params = UpdateSubscription::new();
        params.cancel_at_period_end = Some(true);

        Subscription::update(&self.client, &id, params)
            .await
            .map_err(|e| stripe_error("Error cancelling subscription", e))?;
        info!("Scheduled cancellation of subscription {}", stripe_subscription_id);
        Ok(())
    }
}
