mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use common::{TestApp, PASSWORD};
use serviceplan_pro::database::{Session, Storage};

fn signup(email: &str) -> serde_json::Value {
    json!({
        "email": email,
        "password": PASSWORD,
        "name": "Pat Owner",
        "company_name": "Green Lawns",
    })
}

#[tokio::test]
async fn register_creates_customer_and_session() {
    let app = TestApp::new().await;

    let response = app.post("/api/auth/register", signup("Owner@Example.com"), None).await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["email"], "owner@example.com");
    assert_eq!(response.body["company_name"], "Green Lawns");
    assert_eq!(response.body["onboarding_step"], 0);
    assert!(response.body.get("password_hash").is_none());

    let set_cookie = response
        .headers
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(set_cookie.starts_with("sp_session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let app = TestApp::new().await;
    app.register("owner@example.com").await;

    let response = app.post("/api/auth/register", signup("OWNER@example.com"), None).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["message"], "Email already registered");
}

#[tokio::test]
async fn register_validates_input() {
    let app = TestApp::new().await;

    let response = app
        .post(
            "/api/auth/register",
            json!({
                "email": "not-an-email",
                "password": "short",
                "name": "Pat",
                "company_name": "  ",
            }),
            None,
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let message = response.body["message"].as_str().unwrap();
    assert!(message.starts_with("Validation failed"));
    assert!(message.contains("email"));
    assert!(message.contains("password"));
    assert!(message.contains("company_name"));
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .post("/api/auth/register", json!({ "email": "a@b.co" }), None)
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON"));
}

#[tokio::test]
async fn login_checks_password() {
    let app = TestApp::new().await;
    app.register("owner@example.com").await;

    let wrong = app
        .post(
            "/api/auth/login",
            json!({ "email": "owner@example.com", "password": "wrong password" }),
            None,
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.body["message"], "Invalid email or password");

    let unknown = app
        .post(
            "/api/auth/login",
            json!({ "email": "nobody@example.com", "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);

    let ok = app
        .post(
            "/api/auth/login",
            json!({ "email": "Owner@Example.com", "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(ok.status, StatusCode::OK);
    let cookie = ok.session_cookie().unwrap();

    let me = app.get("/api/auth/me", Some(&cookie)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["email"], "owner@example.com");
}

#[tokio::test]
async fn me_requires_a_session() {
    let app = TestApp::new().await;

    let anonymous = app.get("/api/auth/me", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let forged = app.get("/api/auth/me", Some("sp_session=deadbeef")).await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
    assert_eq!(forged.body["message"], "Not authenticated");
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = TestApp::new().await;
    let (cookie, _) = app.register("owner@example.com").await;

    let response = app
        .call(Method::POST, "/api/auth/logout", None, Some(&cookie))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response
        .headers
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .contains("Max-Age=0"));

    let me = app.get("/api/auth/me", Some(&cookie)).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trial_signup_sets_trial_window_and_plan() {
    let app = TestApp::new().await;
    let mut body = signup("trial@example.com");
    body["plan_id"] = json!("professional");

    let response = app.post("/api/auth/trial", body, None).await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["selected_plan_id"], "professional");
    let ends: DateTime<Utc> =
        serde_json::from_value(response.body["trial_ends_at"].clone()).unwrap();
    let expected = Utc::now() + Duration::days(14);
    assert!((expected - ends).num_seconds().abs() < 60);
    assert!(response.session_cookie().is_some());
}

#[tokio::test]
async fn trial_signup_rejects_unknown_plan() {
    let app = TestApp::new().await;
    let mut body = signup("trial@example.com");
    body["plan_id"] = json!("platinum");

    let response = app.post("/api/auth/trial", body, None).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["message"], "Plan not found");
}

#[tokio::test]
async fn public_endpoints() {
    let app = TestApp::new().await;

    let health = app.get("/api/health", None).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body, json!({ "status": "ok" }));

    let stripe = app.get("/api/stripe/config", None).await;
    assert_eq!(stripe.body["publishable_key"], "pk_test_123");

    let plans = app.get("/api/plans", None).await;
    let ids: Vec<&str> = plans.body.as_array().unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["starter", "professional", "enterprise"]);

    let missing = app.get("/api/plans/platinum", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_sweeps_expired_sessions() {
    let app = TestApp::new().await;
    let (cookie, customer_id) = app.register("owner@example.com").await;
    let customer_id = customer_id.parse().unwrap();

    let stale = Session::new(customer_id, Duration::hours(-1));
    app.storage.insert_session(&stale).await.unwrap();

    let login = app
        .post(
            "/api/auth/login",
            json!({ "email": "owner@example.com", "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(login.status, StatusCode::OK);

    assert!(app.storage.get_session(&stale.token).await.unwrap().is_none());
    let me = app.get("/api/auth/me", Some(&cookie)).await;
    assert_eq!(me.status, StatusCode::OK);
}

#[tokio::test]
async fn onboarding_rejections_render_as_json() {
    let app = TestApp::new().await;
    let (cookie, _) = app.register("owner@example.com").await;

    let malformed = app
        .send(
            Request::builder()
                .method(Method::PUT)
                .uri("/api/customer/onboarding/business")
                .header("content-type", "application/json")
                .header("cookie", &cookie)
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert!(malformed.body["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON"));

    let untyped = app
        .send(
            Request::builder()
                .method(Method::PUT)
                .uri("/api/customer/onboarding/business")
                .header("cookie", &cookie)
                .body(Body::from(r#"{"company_name":"Frosty HVAC"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(untyped.status, StatusCode::BAD_REQUEST);
    assert!(untyped.body["message"].is_string());
}

#[tokio::test]
async fn malformed_ids_in_paths_render_as_json() {
    let app = TestApp::new().await;
    let (cookie, _) = app.register("owner@example.com").await;

    let service_plan = app
        .call(Method::DELETE, "/api/service-plans/not-a-uuid", None, Some(&cookie))
        .await;
    assert_eq!(service_plan.status, StatusCode::BAD_REQUEST);
    assert!(service_plan.body["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid path"));

    let widget = app.get("/api/widget/not-a-uuid/config", None).await;
    assert_eq!(widget.status, StatusCode::BAD_REQUEST);
    assert!(widget.body["message"].is_string());
}
