//! Router-level tests: full HTTP stack over an in-memory database

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use careerhub::api::{build_router, AppState};
use careerhub::config::Config;
use careerhub::db::{create_test_pool, migrations};
use careerhub::services::{LogMailer, LogPushSender, Mailer};

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

struct TestApp {
    server: TestServer,
    _storage: TempDir,
}

async fn spawn_app_with_mailer(mailer: Arc<dyn Mailer>) -> TestApp {
    spawn_app_with(mailer, |_| {}).await
}

async fn spawn_app_with(mailer: Arc<dyn Mailer>, configure: impl FnOnce(&mut Config)) -> TestApp {
    let storage = tempfile::tempdir().unwrap();
    let pool = create_test_pool().await.unwrap();
    migrations::run_migrations(&pool).await.unwrap();

    let mut config = Config::default();
    config.storage.local_path = storage.path().to_path_buf();
    config.storage.public_url = "http://localhost/storage".to_string();
    config.storage.signing_secret = "test-secret".to_string();
    configure(&mut config);

    let state = AppState::new(pool, &config, mailer, Arc::new(LogPushSender));
    let server = TestServer::new(build_router(state, "http://localhost:3000")).unwrap();
    TestApp {
        server,
        _storage: storage,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with_mailer(Arc::new(LogMailer)).await
}

/// Register an account, returning (user id, session token)
async fn register(server: &TestServer, email: &str, name: &str) -> (i64, String) {
    let response = server
        .post("/api/v1/auth/register")
        .json(&json!({
            "email": email,
            "password": "password123",
            "display_name": name,
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    (
        body["user"]["id"].as_i64().unwrap(),
        body["token"].as_str().unwrap().to_string(),
    )
}

/// Split a presigned URL into its local path and query pairs
fn split_presigned(url: &str) -> (String, Vec<(String, String)>) {
    let rest = url.strip_prefix("http://localhost").unwrap();
    let (path, query) = rest.split_once('?').unwrap();
    let params = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (path.to_string(), params)
}

#[tokio::test]
async fn test_health() {
    let app = spawn_app().await;
    let response = app.server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/api/v1/auth/register")
        .json(&json!({
            "email": "Admin@Example.com",
            "password": "password123",
            "display_name": "Ada",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));
    let body: Value = response.json();
    assert_eq!(body["user"]["role"], "admin");
    assert_eq!(body["user"]["email"], "admin@example.com");
    assert!(body["user"].get("password_hash").is_none());

    let (_, member_token) = register(&app.server, "bob@example.com", "Bob").await;
    let me: Value = app
        .server
        .get("/api/v1/auth/me")
        .authorization_bearer(&member_token)
        .await
        .json();
    assert_eq!(me["role"], "member");

    let response = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "bob@example.com", "password": "password123" }))
        .await;
    response.assert_status_ok();

    // The session cookie works as well as the bearer header
    let token = response.json::<Value>()["token"].as_str().unwrap().to_string();
    app.server
        .get("/api/v1/auth/me")
        .add_header(
            header::COOKIE,
            HeaderValue::from_str(&format!("session={}", token)).unwrap(),
        )
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_duplicate_email_conflicts() {
    let app = spawn_app().await;
    register(&app.server, "ada@example.com", "Ada").await;

    let response = app
        .server
        .post("/api/v1/auth/register")
        .json(&json!({
            "email": "ADA@example.com",
            "password": "password123",
            "display_name": "Ada again",
        }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = spawn_app().await;
    let response = app.server.get("/api/v1/auth/me").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"]["code"], "UNAUTHORIZED");

    app.server
        .get("/api/v1/notifications")
        .authorization_bearer("not-a-session")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_is_throttled_per_email() {
    let app = spawn_app().await;
    register(&app.server, "ada@example.com", "Ada").await;

    for _ in 0..5 {
        app.server
            .post("/api/v1/auth/login")
            .json(&json!({ "email": "ada@example.com", "password": "wrong-password" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    // Even the right password is refused while limited
    let response = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "ada@example.com", "password": "password123" }))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "RATE_LIMIT");
    assert!(body["error"]["details"]["retry_after"].as_i64().unwrap() > 0);
    assert!(response.headers().get(header::RETRY_AFTER).is_some());
}

#[tokio::test]
async fn test_login_is_throttled_per_ip() {
    let app = spawn_app_with(Arc::new(LogMailer), |config| {
        config.server.trust_proxy_headers = true;
    })
    .await;
    let forwarded = HeaderName::from_static("x-forwarded-for");

    for i in 0..10 {
        app.server
            .post("/api/v1/auth/login")
            .add_header(forwarded.clone(), HeaderValue::from_static("203.0.113.5"))
            .json(&json!({ "email": format!("user{}@example.com", i), "password": "password123" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    app.server
        .post("/api/v1/auth/login")
        .add_header(forwarded, HeaderValue::from_static("203.0.113.5"))
        .json(&json!({ "email": "other@example.com", "password": "password123" }))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_forwarded_for_is_ignored_unless_trusted() {
    let app = spawn_app().await;
    let forwarded = HeaderName::from_static("x-forwarded-for");

    // without a trusted proxy the header does not name the client, so
    // one address in it cannot exhaust the per-IP budget
    for i in 0..12 {
        app.server
            .post("/api/v1/auth/login")
            .add_header(forwarded.clone(), HeaderValue::from_static("203.0.113.5"))
            .json(&json!({ "email": format!("user{}@example.com", i), "password": "password123" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let app = spawn_app().await;
    let (_, token) = register(&app.server, "ada@example.com", "Ada").await;

    let response = app
        .server
        .post("/api/v1/auth/logout")
        .authorization_bearer(&token)
        .await;
    response.assert_status(StatusCode::NO_CONTENT);
    assert!(response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("Max-Age=0"));

    app.server
        .get("/api/v1/auth/me")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password_keeps_current_session_only() {
    let app = spawn_app().await;
    let (_, first) = register(&app.server, "ada@example.com", "Ada").await;
    let second = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "ada@example.com", "password": "password123" }))
        .await
        .json::<Value>()["token"]
        .as_str()
        .unwrap()
        .to_string();

    app.server
        .put("/api/v1/auth/password")
        .authorization_bearer(&first)
        .json(&json!({ "current_password": "nope-nope", "new_password": "newpassword1" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .put("/api/v1/auth/password")
        .authorization_bearer(&first)
        .json(&json!({ "current_password": "password123", "new_password": "newpassword1" }))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    app.server
        .get("/api/v1/auth/me")
        .authorization_bearer(&first)
        .await
        .assert_status_ok();
    app.server
        .get("/api/v1/auth/me")
        .authorization_bearer(&second)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let mailer = Arc::new(RecordingMailer::default());
    let app = spawn_app_with_mailer(mailer.clone()).await;
    let (_, old_token) = register(&app.server, "ada@example.com", "Ada").await;

    // Unknown addresses get the same answer and no mail
    app.server
        .post("/api/v1/auth/password-reset")
        .json(&json!({ "email": "nobody@example.com" }))
        .await
        .assert_status(StatusCode::ACCEPTED);
    assert!(mailer.sent.lock().unwrap().is_empty());

    app.server
        .post("/api/v1/auth/password-reset")
        .json(&json!({ "email": "ada@example.com" }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let body = {
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ada@example.com");
        sent[0].1.clone()
    };
    let encoded = body
        .split("token=")
        .nth(1)
        .unwrap()
        .split_whitespace()
        .next()
        .unwrap();
    let token = urlencoding::decode(encoded).unwrap().into_owned();

    app.server
        .post("/api/v1/auth/password-reset/confirm")
        .json(&json!({ "token": token, "new_password": "brandnew123" }))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    // Token is single use and old sessions are gone
    app.server
        .post("/api/v1/auth/password-reset/confirm")
        .json(&json!({ "token": token, "new_password": "another123" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.server
        .get("/api/v1/auth/me")
        .authorization_bearer(&old_token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "ada@example.com", "password": "brandnew123" }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_password_reset_is_rate_limited() {
    let app = spawn_app().await;
    register(&app.server, "ada@example.com", "Ada").await;

    for _ in 0..3 {
        app.server
            .post("/api/v1/auth/password-reset")
            .json(&json!({ "email": "ada@example.com" }))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    let response = app
        .server
        .post("/api/v1/auth/password-reset")
        .json(&json!({ "email": "ada@example.com" }))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(response.json::<Value>()["error"]["details"]["retry_after"]
        .as_i64()
        .unwrap()
        > 0);
}

#[tokio::test]
async fn test_admin_routes() {
    let app = spawn_app().await;
    let (_, admin) = register(&app.server, "admin@example.com", "Admin").await;
    let (member_id, member) = register(&app.server, "bob@example.com", "Bob").await;

    app.server
        .get("/api/v1/admin/users")
        .authorization_bearer(&member)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let users: Value = app
        .server
        .get("/api/v1/admin/users")
        .authorization_bearer(&admin)
        .await
        .json();
    assert_eq!(users["total"], 2);

    let response = app
        .server
        .put(&format!("/api/v1/admin/users/{}/status", member_id))
        .authorization_bearer(&admin)
        .json(&json!({ "status": "banned" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "banned");

    // Banning revokes sessions and blocks new logins
    app.server
        .get("/api/v1/auth/me")
        .authorization_bearer(&member)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    let response = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "bob@example.com", "password": "password123" }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["error"]["code"], "USER_BANNED");

    let report: Value = app
        .server
        .post("/api/v1/admin/maintenance")
        .authorization_bearer(&admin)
        .await
        .json();
    assert_eq!(report["released_locks"], 0);
}

#[tokio::test]
async fn test_document_upload_and_download() {
    let app = spawn_app().await;
    let (_, owner) = register(&app.server, "ada@example.com", "Ada").await;
    let (_, stranger) = register(&app.server, "bob@example.com", "Bob").await;

    app.server
        .post("/api/v1/documents")
        .authorization_bearer(&owner)
        .json(&json!({ "file_name": "virus.exe", "content_type": "application/x-msdownload", "size_bytes": 10 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let response = app
        .server
        .post("/api/v1/documents")
        .authorization_bearer(&owner)
        .json(&json!({ "file_name": "cv.pdf", "content_type": "application/pdf", "size_bytes": 11 }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let ticket: Value = response.json();
    let id = ticket["document"]["id"].as_str().unwrap().to_string();
    assert_eq!(ticket["document"]["status"], "pending");
    assert_eq!(ticket["upload"]["method"], "PUT");

    // Not uploaded yet
    app.server
        .post(&format!("/api/v1/documents/{}/confirm", id))
        .authorization_bearer(&owner)
        .await
        .assert_status(StatusCode::CONFLICT);

    let (path, params) = split_presigned(ticket["upload"]["url"].as_str().unwrap());

    // A tampered signature is refused
    let mut request = app.server.put(&path);
    for (key, value) in &params {
        let value = if key == "signature" { "00".repeat(32) } else { value.clone() };
        request = request.add_query_param(key, value);
    }
    request
        .bytes("hello world".into())
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let mut request = app.server.put(&path);
    for (key, value) in &params {
        request = request.add_query_param(key, value);
    }
    request.bytes("hello world".into()).await.assert_status_ok();

    let document: Value = app
        .server
        .post(&format!("/api/v1/documents/{}/confirm", id))
        .authorization_bearer(&owner)
        .await
        .json();
    assert_eq!(document["status"], "uploaded");
    assert_eq!(document["size_bytes"], 11);

    app.server
        .get(&format!("/api/v1/documents/{}/download", id))
        .authorization_bearer(&stranger)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let link: Value = app
        .server
        .get(&format!("/api/v1/documents/{}/download", id))
        .authorization_bearer(&owner)
        .await
        .json();
    let (path, params) = split_presigned(link["url"].as_str().unwrap());
    let mut request = app.server.get(&path);
    for (key, value) in &params {
        request = request.add_query_param(key, value);
    }
    let response = request.await;
    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), b"hello world");

    // A GET link cannot be replayed as an upload
    let mut request = app.server.put(&path);
    for (key, value) in &params {
        request = request.add_query_param(key, value);
    }
    request
        .bytes("overwrite".into())
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let listed: Value = app
        .server
        .get("/api/v1/documents")
        .authorization_bearer(&owner)
        .await
        .json();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    app.server
        .delete(&format!("/api/v1/documents/{}", id))
        .authorization_bearer(&owner)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    let listed: Value = app
        .server
        .get("/api/v1/documents")
        .authorization_bearer(&owner)
        .await
        .json();
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_booking_flow() {
    let app = spawn_app().await;
    let (mentor_id, mentor) = register(&app.server, "mentor@example.com", "Mia").await;
    let (_, mentee) = register(&app.server, "mentee@example.com", "Max").await;
    let (_, rival) = register(&app.server, "rival@example.com", "Rae").await;

    app.server
        .put("/api/v1/mentors/me")
        .authorization_bearer(&mentor)
        .json(&json!({
            "headline": "Staff engineer",
            "bio": "Ten years of backend work",
            "hourly_rate_cents": 9000,
        }))
        .await
        .assert_status_ok();

    let mentors: Value = app.server.get("/api/v1/mentors").await.json();
    assert_eq!(mentors.as_array().unwrap().len(), 1);
    assert!(mentors[0].get("booking_version").is_none());

    let start = Utc::now() + Duration::days(2);
    let end = start + Duration::minutes(30);
    let slot = json!({
        "mentor_id": mentor_id,
        "start_at": start.to_rfc3339(),
        "end_at": end.to_rfc3339(),
    });

    let response = app
        .server
        .post("/api/v1/bookings/locks")
        .authorization_bearer(&mentee)
        .json(&slot)
        .await;
    response.assert_status(StatusCode::CREATED);
    let lock_id = response.json::<Value>()["id"].as_str().unwrap().to_string();

    // The slot is held for the first mentee
    let response = app
        .server
        .post("/api/v1/bookings/locks")
        .authorization_bearer(&rival)
        .json(&slot)
        .await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"]["code"], "CONFLICT");

    let busy: Value = app
        .server
        .get(&format!("/api/v1/mentors/{}/busy", mentor_id))
        .add_query_param("from", start.to_rfc3339())
        .add_query_param("to", end.to_rfc3339())
        .await
        .json();
    assert_eq!(busy[0]["kind"], "lock");

    app.server
        .post(&format!("/api/v1/bookings/locks/{}/confirm", lock_id))
        .authorization_bearer(&rival)
        .json(&json!({}))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let response = app
        .server
        .post(&format!("/api/v1/bookings/locks/{}/confirm", lock_id))
        .authorization_bearer(&mentee)
        .json(&json!({ "payment_reference": "pay_123" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let session: Value = response.json();
    assert_eq!(session["status"], "confirmed");
    assert_eq!(session["price_cents"], 4500);

    let unread: Value = app
        .server
        .get("/api/v1/notifications/unread-count")
        .authorization_bearer(&mentor)
        .await
        .json();
    assert_eq!(unread["count"], 1);

    let sessions: Value = app
        .server
        .get("/api/v1/bookings")
        .add_query_param("role", "mentor")
        .authorization_bearer(&mentor)
        .await
        .json();
    assert_eq!(sessions.as_array().unwrap().len(), 1);

    // Completing is only possible after the session ends
    let id = session["id"].as_i64().unwrap();
    app.server
        .post(&format!("/api/v1/bookings/{}/complete", id))
        .authorization_bearer(&mentor)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let cancelled: Value = app
        .server
        .post(&format!("/api/v1/bookings/{}/cancel", id))
        .authorization_bearer(&mentee)
        .await
        .json();
    assert_eq!(cancelled["status"], "cancelled");

    // Freed slot can be booked again
    app.server
        .post("/api/v1/bookings/locks")
        .authorization_bearer(&rival)
        .json(&slot)
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_community_and_notifications() {
    let app = spawn_app().await;
    let (_, author) = register(&app.server, "ada@example.com", "Ada").await;
    let (_, reader) = register(&app.server, "bob@example.com", "Bob").await;

    app.server
        .post("/api/v1/posts")
        .json(&json!({ "title": "Hello", "body": "Anyone hiring?" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .post("/api/v1/posts")
        .authorization_bearer(&author)
        .json(&json!({ "title": "Hello", "body": "Anyone hiring?" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let post_id = response.json::<Value>()["id"].as_i64().unwrap();

    let comment: Value = app
        .server
        .post(&format!("/api/v1/posts/{}/comments", post_id))
        .authorization_bearer(&reader)
        .json(&json!({ "body": "We are!" }))
        .await
        .json();
    app.server
        .post(&format!("/api/v1/posts/{}/comments", post_id))
        .authorization_bearer(&reader)
        .json(&json!({ "body": "DM me", "parent_id": comment["id"] }))
        .await
        .assert_status(StatusCode::CREATED);

    let liked: Value = app
        .server
        .post(&format!("/api/v1/posts/{}/like", post_id))
        .authorization_bearer(&reader)
        .await
        .json();
    assert_eq!(liked["count"], 1);
    let liked: Value = app
        .server
        .post(&format!("/api/v1/posts/{}/like", post_id))
        .authorization_bearer(&reader)
        .await
        .json();
    assert_eq!(liked["count"], 1);

    // Anonymous and signed-in views of the same post
    let anonymous: Value = app
        .server
        .get(&format!("/api/v1/posts/{}", post_id))
        .await
        .json();
    assert_eq!(anonymous["comment_count"], 2);
    assert_eq!(anonymous["comments"].as_array().unwrap().len(), 2);
    assert_eq!(anonymous["liked"], false);
    let viewer: Value = app
        .server
        .get(&format!("/api/v1/posts/{}", post_id))
        .authorization_bearer(&reader)
        .await
        .json();
    assert_eq!(viewer["liked"], true);

    // Two comments collapse into one grouped notification
    let notifications: Value = app
        .server
        .get("/api/v1/notifications")
        .add_query_param("unread_only", true)
        .authorization_bearer(&author)
        .await
        .json();
    assert_eq!(notifications["total"], 2);
    let items = notifications["items"].as_array().unwrap();
    let comments = items
        .iter()
        .find(|n| n["kind"] == "post_comment")
        .unwrap();
    assert_eq!(comments["count"], 2);

    app.server
        .post(&format!("/api/v1/notifications/{}/read", comments["id"]))
        .authorization_bearer(&reader)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let marked: Value = app
        .server
        .post("/api/v1/notifications/read-all")
        .authorization_bearer(&author)
        .await
        .json();
    assert_eq!(marked["count"], 2);

    // Only the author edits; the reader cannot
    app.server
        .put(&format!("/api/v1/posts/{}", post_id))
        .authorization_bearer(&reader)
        .json(&json!({ "title": "Mine now" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
    app.server
        .delete(&format!("/api/v1/posts/{}", post_id))
        .authorization_bearer(&author)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server
        .get(&format!("/api/v1/posts/{}", post_id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notification_preferences_validation() {
    let app = spawn_app().await;
    let (_, token) = register(&app.server, "ada@example.com", "Ada").await;

    let prefs: Value = app
        .server
        .get("/api/v1/notifications/preferences")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(prefs["push_enabled"], true);

    app.server
        .put("/api/v1/notifications/preferences")
        .authorization_bearer(&token)
        .json(&json!({
            "push_enabled": true,
            "quiet_start_minute": 1440,
            "quiet_end_minute": 420,
            "utc_offset_minutes": 0,
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let prefs: Value = app
        .server
        .put("/api/v1/notifications/preferences")
        .authorization_bearer(&token)
        .json(&json!({
            "push_enabled": false,
            "quiet_start_minute": 1320,
            "quiet_end_minute": 420,
            "utc_offset_minutes": 120,
        }))
        .await
        .json();
    assert_eq!(prefs["quiet_start_minute"], 1320);
    assert_eq!(prefs["push_enabled"], false);
}
