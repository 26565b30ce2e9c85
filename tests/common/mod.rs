#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use serviceplan_pro::{
    app,
    config::{Config, PlanPrices, StripeKeys},
    database::MemStorage,
    error::AppError,
    pricing::seed_plans,
    stripe_client::{BillingGateway, CheckoutSessionRequest, CreatedCheckoutSession},
    zapier::ZapierNotifier,
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const PASSWORD: &str = "correct horse battery";

/// Records every Stripe call instead of making it.
#[derive(Default)]
pub struct FakeGateway {
    pub customers: Mutex<Vec<(String, String)>>,
    pub checkouts: Mutex<Vec<CheckoutSessionRequest>>,
    pub portals: Mutex<Vec<String>>,
    pub cancellations: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn checkouts(&self) -> Vec<CheckoutSessionRequest> {
        self.checkouts.lock().unwrap().clone()
    }

    pub fn customer_count(&self) -> usize {
        self.customers.lock().unwrap().len()
    }

    pub fn cancellations(&self) -> Vec<String> {
        self.cancellations.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingGateway for FakeGateway {
    async fn create_customer(
        &self,
        email: &str,
        _name: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<String, AppError> {
        let mut customers = self.customers.lock().unwrap();
        let id = format!("cus_test_{}", customers.len() + 1);
        customers.push((id.clone(), email.to_string()));
        Ok(id)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CreatedCheckoutSession, AppError> {
        let mut checkouts = self.checkouts.lock().unwrap();
        checkouts.push(request);
        let id = format!("cs_test_{}", checkouts.len());
        Ok(CreatedCheckoutSession {
            url: Some(format!("https://checkout.stripe.test/{id}")),
            id,
        })
    }

    async fn create_portal_session(
        &self,
        stripe_customer_id: &str,
        _return_url: &str,
    ) -> Result<String, AppError> {
        self.portals
            .lock()
            .unwrap()
            .push(stripe_customer_id.to_string());
        Ok(format!("https://billing.stripe.test/{stripe_customer_id}"))
    }

    async fn cancel_at_period_end(&self, stripe_subscription_id: &str) -> Result<(), AppError> {
        self.cancellations
            .lock()
            .unwrap()
            .push(stripe_subscription_id.to_string());
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: None,
        stripe: StripeKeys {
            secret_key: "sk_test_123".into(),
            publishable_key: "pk_test_123".into(),
            webhook_secret: WEBHOOK_SECRET.into(),
        },
        plan_prices: PlanPrices::default(),
        zapier_webhook_url: None,
        app_base_url: "https://app.test".into(),
        session_ttl_hours: 24,
        cookie_secure: false,
        trial_days: 14,
        log_json: false,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `name=value` of the session cookie set by the response.
    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub storage: Arc<MemStorage>,
    pub gateway: Arc<FakeGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        let config = test_config();
        let storage = Arc::new(MemStorage::new());
        seed_plans(storage.as_ref(), &config.plan_prices)
            .await
            .unwrap();
        let gateway = Arc::new(FakeGateway::default());

        let state = AppState::new(
            config,
            storage.clone(),
            gateway.clone(),
            ZapierNotifier::disabled(),
        );
        Self {
            router: app(state.clone()),
            state,
            storage,
            gateway,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        cookie: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        self.call(Method::GET, uri, None, cookie).await
    }

    pub async fn post(&self, uri: &str, body: Value, cookie: Option<&str>) -> TestResponse {
        self.call(Method::POST, uri, Some(body), cookie).await
    }

    pub async fn put(&self, uri: &str, body: Value, cookie: Option<&str>) -> TestResponse {
        self.call(Method::PUT, uri, Some(body), cookie).await
    }

    /// Registers a tenant and returns its session cookie and id.
    pub async fn register(&self, email: &str) -> (String, String) {
        let response = self
            .post(
                "/api/auth/register",
                json!({
                    "email": email,
                    "password": PASSWORD,
                    "name": "Pat Owner",
                    "company_name": "Cool Air HVAC",
                }),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        let cookie = response.session_cookie().unwrap();
        let id = response.body["id"].as_str().unwrap().to_string();
        (cookie, id)
    }

    /// Starts a checkout for `plan_id` and returns the Stripe session id.
    pub async fn checkout(&self, cookie: &str, plan_id: &str) -> String {
        let response = self
            .post("/api/checkout", json!({ "plan_id": plan_id }), Some(cookie))
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        response.body["session_id"].as_str().unwrap().to_string()
    }

    pub async fn webhook(&self, event: Value) -> TestResponse {
        let payload = event.to_string();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/webhook")
            .header("stripe-signature", sign(&payload, WEBHOOK_SECRET))
            .body(Body::from(payload))
            .unwrap();
        self.send(request).await
    }
}

/// A `stripe-signature` header for `payload` signed now.
pub fn sign(payload: &str, secret: &str) -> String {
    let timestamp = Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn event(id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": id,
        "object": "event",
        "type": event_type,
        "data": { "object": object },
    })
}
