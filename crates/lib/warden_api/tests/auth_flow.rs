//! Integration tests: build the router over in-memory stores and drive the
//! auth endpoints end to end.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use chrono::Duration;
use serde_json::{Value, json};
use tower::ServiceExt;
use warden_api::config::ApiConfig;
use warden_api::{AppState, router};
use warden_core::auth::jwt::{TokenConfig, TokenService};
use warden_core::auth::service::AuthService;
use warden_core::config::AuthConfig;
use warden_core::models::auth::TokenSubject;
use warden_core::store::memory::{MemoryLoginAttemptStore, MemoryUserStore};

const SECRET: &str = "integration-secret";
const PASSWORD: &str = "Str0ng!Pw";

fn app() -> Router {
    app_with(ApiConfig::default())
}

fn app_with(api: ApiConfig) -> Router {
    let mut config = AuthConfig::with_secret(SECRET);
    config.password.bcrypt_cost = 4;
    let auth = Arc::new(AuthService::new(
        &config,
        Arc::new(MemoryUserStore::new()),
        Arc::new(MemoryLoginAttemptStore::new()),
    ));
    router(AppState::new(auth, api))
}

fn json_request(method: &str, uri: &str, ip: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "192.0.2.50")
        .header("authorization", format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn read_json(resp: Response<Body>) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("parse JSON")
}

fn set_cookie(resp: &Response<Body>) -> String {
    resp.headers()
        .get("set-cookie")
        .expect("set-cookie header")
        .to_str()
        .unwrap()
        .to_string()
}

async fn register(app: &Router, email: &str, username: &str, ip: &str) -> Value {
    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            ip,
            json!({
                "email": email,
                "username": username,
                "password": PASSWORD,
                "confirmPassword": PASSWORD,
            }),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::CREATED);
    read_json(resp).await
}

async fn login(app: &Router, identifier: &str, password: &str, ip: &str) -> Response<Body> {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            ip,
            json!({ "emailOrUsername": identifier, "password": password }),
        ))
        .await
        .expect("request")
}

#[tokio::test]
async fn register_sets_cookie_and_rejects_duplicates() {
    let app = app();

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            "192.0.2.1",
            json!({
                "email": "Alice@Example.com",
                "username": "alice",
                "name": "Alice",
                "password": PASSWORD,
                "confirmPassword": PASSWORD,
            }),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::CREATED);
    let cookie = set_cookie(&resp);
    assert!(cookie.starts_with("auth-token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));

    let json = read_json(resp).await;
    assert_eq!(json["message"], "Registration successful");
    assert_eq!(json["user"]["email"], "alice@example.com");
    assert_eq!(json["user"]["username"], "alice");
    assert!(json["user"].get("passwordHash").is_none());
    assert!(json["tokens"]["accessToken"].is_string());
    assert!(json["tokens"]["refreshToken"].is_string());
    assert_eq!(json["tokens"]["expiresIn"], 604_800);

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            "192.0.2.1",
            json!({
                "email": "alice@example.com",
                "password": PASSWORD,
                "confirmPassword": PASSWORD,
            }),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(resp).await["code"], "DUPLICATE_EMAIL");
}

#[tokio::test]
async fn register_without_confirmation() {
    let app = app();
    let resp = app
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            "192.0.2.20",
            json!({ "email": "a@x.com", "password": PASSWORD }),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = read_json(resp).await;
    assert_eq!(json["user"]["email"], "a@x.com");
    assert!(json["tokens"]["accessToken"].is_string());
}

#[tokio::test]
async fn register_reports_field_errors() {
    let app = app();
    let resp = app
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            "192.0.2.2",
            json!({
                "email": "not-an-email",
                "password": "weak",
                "confirmPassword": "other",
            }),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = read_json(resp).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = json["details"]
        .as_array()
        .expect("details array")
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password"));
    assert!(fields.contains(&"confirmPassword"));
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "192.0.2.3")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.expect("request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(resp).await["code"], "INVALID_BODY");
}

#[tokio::test]
async fn login_by_email_or_username() {
    let app = app();
    register(&app, "bob@example.com", "bob", "192.0.2.4").await;

    let resp = login(&app, "BOB@example.com", PASSWORD, "192.0.2.4").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookie(&resp).starts_with("auth-token="));
    let json = read_json(resp).await;
    assert_eq!(json["message"], "Login successful");
    assert_eq!(json["user"]["email"], "bob@example.com");

    let resp = login(&app, "bob", PASSWORD, "192.0.2.4").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_and_unknown_user_look_the_same() {
    let app = app();
    register(&app, "carol@example.com", "carol", "192.0.2.5").await;

    let wrong = login(&app, "carol", "Wr0ng!Password", "192.0.2.5").await;
    let unknown = login(&app, "nobody", PASSWORD, "192.0.2.5").await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(wrong).await, read_json(unknown).await);
}

#[tokio::test]
async fn repeated_failed_logins_are_throttled() {
    let app = app();
    register(&app, "dave@example.com", "dave", "192.0.2.6").await;

    for _ in 0..5 {
        let resp = login(&app, "dave", "Wr0ng!Password", "192.0.2.6").await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    // Even the right password is refused while the identifier is throttled.
    let resp = login(&app, "dave", PASSWORD, "192.0.2.6").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = resp.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=900).contains(&retry_after));
    assert_eq!(resp.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(read_json(resp).await["code"], "RATE_LIMITED");

    // The budget is per identifier.
    register(&app, "erin@example.com", "erin", "192.0.2.7").await;
    let resp = login(&app, "erin", PASSWORD, "192.0.2.7").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_endpoint_is_rate_limited_per_ip() {
    let app = app();
    for i in 0..5 {
        register(&app, &format!("user{i}@example.com"), &format!("user{i}"), "192.0.2.8").await;
    }
    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            "192.0.2.8",
            json!({
                "email": "late@example.com",
                "password": PASSWORD,
                "confirmPassword": PASSWORD,
            }),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_reset_budget_without_proxy() {
    let app = app_with(ApiConfig {
        trust_proxy: false,
        ..ApiConfig::default()
    });
    for i in 0..5 {
        let ip = format!("192.0.2.{i}");
        register(&app, &format!("user{i}@example.com"), &format!("user{i}"), &ip).await;
    }
    let resp = app
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            "192.0.2.99",
            json!({ "email": "late@example.com", "password": PASSWORD }),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn me_requires_a_valid_token() {
    let app = app();
    let json = register(&app, "frank@example.com", "frank", "192.0.2.9").await;
    let token = json["tokens"]["accessToken"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(resp).await["code"], "AUTH_REQUIRED");

    let resp = app
        .clone()
        .oneshot(authed("GET", "/api/auth/me", &token, None))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(read_json(resp).await["user"]["username"], "frank");

    // Cookie-only clients are accepted too.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header("cookie", format!("auth-token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);

    let expired = TokenService::new(TokenConfig {
        access_ttl: Duration::seconds(-30),
        ..TokenConfig::new(SECRET.into())
    })
    .issue_access(&TokenSubject {
        id: json["user"]["id"].as_str().unwrap().into(),
        email: "frank@example.com".into(),
        username: Some("frank".into()),
    })
    .unwrap();
    let resp = app
        .clone()
        .oneshot(authed("GET", "/api/auth/me", &expired, None))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(resp).await["code"], "TOKEN_EXPIRED");

    let resp = app
        .oneshot(authed("GET", "/api/auth/me", "forged.token.value", None))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(resp).await["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn profile_update_and_conflicts() {
    let app = app();
    register(&app, "gina@example.com", "gina", "192.0.2.10").await;
    let json = register(&app, "hank@example.com", "hank", "192.0.2.10").await;
    let token = json["tokens"]["accessToken"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            "/api/auth/profile",
            &token,
            Some(json!({ "name": "Hank Hill", "username": "hank2" })),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    let json = read_json(resp).await;
    assert_eq!(json["message"], "Profile updated successfully");
    assert_eq!(json["user"]["name"], "Hank Hill");
    assert_eq!(json["user"]["username"], "hank2");

    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            "/api/auth/profile",
            &token,
            Some(json!({ "username": "gina" })),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(resp).await["code"], "DUPLICATE_USERNAME");
}

#[tokio::test]
async fn change_password_then_login_with_new_one() {
    let app = app();
    let json = register(&app, "ivy@example.com", "ivy", "192.0.2.11").await;
    let token = json["tokens"]["accessToken"].as_str().unwrap().to_string();
    let new_password = "N3w!Secret";

    let resp = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/auth/change-password",
            &token,
            Some(json!({
                "currentPassword": "Wr0ng!Password",
                "newPassword": new_password,
                "confirmNewPassword": new_password,
            })),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(resp).await["code"], "INCORRECT_PASSWORD");

    let resp = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/auth/change-password",
            &token,
            Some(json!({
                "currentPassword": PASSWORD,
                "newPassword": new_password,
                "confirmNewPassword": new_password,
            })),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        read_json(resp).await["message"],
        "Password changed successfully"
    );

    let old = login(&app, "ivy", PASSWORD, "192.0.2.11").await;
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);
    let new = login(&app, "ivy", new_password, "192.0.2.11").await;
    assert_eq!(new.status(), StatusCode::OK);
}

#[tokio::test]
async fn delete_account_needs_confirmation() {
    let app = app();
    let json = register(&app, "jack@example.com", "jack", "192.0.2.12").await;
    let token = json["tokens"]["accessToken"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(authed(
            "DELETE",
            "/api/auth/delete-account",
            &token,
            Some(json!({ "confirmation": "yes please" })),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(resp).await["code"], "INVALID_CONFIRMATION");

    let resp = app
        .clone()
        .oneshot(authed(
            "DELETE",
            "/api/auth/delete-account",
            &token,
            Some(json!({ "confirmation": "DELETE_MY_ACCOUNT" })),
        ))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookie(&resp).contains("Max-Age=0"));

    // The token still verifies but its subject is gone.
    let resp = app
        .clone()
        .oneshot(authed("GET", "/api/auth/me", &token, None))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(resp).await["code"], "USER_NOT_FOUND");

    let resp = login(&app, "jack", PASSWORD, "192.0.2.12").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_clears_cookie() {
    let app = app();
    let resp = app
        .oneshot(json_request("POST", "/api/auth/logout", "192.0.2.13", json!({})))
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = set_cookie(&resp);
    assert!(cookie.starts_with("auth-token=;"));
    assert!(cookie.contains("Max-Age=0"));
    assert_eq!(read_json(resp).await["message"], "Logged out successfully");
}

#[tokio::test]
async fn preflight_and_response_headers() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/auth/login")
                .header("origin", "http://localhost:3000")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "http://localhost:3000"
    );
    assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
    assert_eq!(headers["access-control-allow-credentials"], "true");
    assert_eq!(headers["access-control-max-age"], "86400");
    assert_eq!(headers["x-frame-options"], "DENY");

    // Unlisted origins get no allow-origin header.
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .header("origin", "https://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!resp.headers().contains_key("access-control-allow-origin"));
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(
        resp.headers()["referrer-policy"],
        "strict-origin-when-cross-origin"
    );
}
