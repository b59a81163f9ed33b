use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use podium_auth::client::HttpBackend;
use podium_auth::identity::{BackendError, IdentityProof, SessionBackend, SessionCredential};

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer "))
}

fn ada() -> Value {
    json!({
        "id": "u1",
        "email": "ada@example.com",
        "displayName": "Ada",
        "photoURL": "https://img.example.com/ada.png",
        "subscription": { "plan": "pro", "status": "active" },
        "isInstitutionUser": false,
        "hasPasswordProvider": true
    })
}

async fn exchange(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    match body.get("firebaseToken").and_then(|t| t.as_str()) {
        Some("good-proof") => (StatusCode::OK, Json(json!({ "token": "jwt-1", "user": ada() }))),
        Some("empty-token") => (StatusCode::OK, Json(json!({ "token": "", "user": ada() }))),
        Some("crash") => (StatusCode::INTERNAL_SERVER_ERROR, Json(Value::Null)),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid Firebase token" }))),
    }
}

async fn me(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    match bearer(&headers) {
        Some("jwt-1") | Some("jwt-2") => (StatusCode::OK, Json(json!({ "user": ada() }))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid token." }))),
    }
}

async fn refresh(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    match bearer(&headers) {
        Some("jwt-1") => (StatusCode::OK, Json(json!({ "token": "jwt-2" }))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid token." }))),
    }
}

async fn change_password(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if bearer(&headers) != Some("jwt-1") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid token." })));
    }
    if body.get("firebaseToken").and_then(|t| t.as_str()) != Some("fresh-proof") {
        return (StatusCode::FORBIDDEN, Json(json!({ "message": "Recent sign-in required" })));
    }
    let pw = body.get("newPassword").and_then(|p| p.as_str()).unwrap_or("");
    if pw.len() < 6 {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Password must be at least 6 characters" })));
    }
    (StatusCode::OK, Json(json!({ "success": true })))
}

async fn start_fake_backend() -> (JoinHandle<()>, String) {
    let app = Router::new()
        .route("/api/auth/firebase", post(exchange))
        .route("/api/auth/me", get(me))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/change-password", put(change_password));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind 127.0.0.1:0");
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("fake backend error: {e:?}");
        }
    });
    (handle, format!("http://127.0.0.1:{}/api", port))
}

fn client(base: &str) -> HttpBackend {
    HttpBackend::new(base, "firebase", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn exchange_returns_credential_and_identity() {
    let (server, base) = start_fake_backend().await;
    let backend = client(&base);

    let ex = backend.exchange(&IdentityProof::new("good-proof")).await.unwrap();
    assert_eq!(ex.credential, SessionCredential::new("jwt-1"));
    assert_eq!(ex.identity.id, "u1");
    assert_eq!(ex.identity.display_name.as_deref(), Some("Ada"));
    assert_eq!(ex.identity.photo_url.as_deref(), Some("https://img.example.com/ada.png"));
    assert_eq!(ex.identity.plan(), Some("pro"));
    assert!(ex.identity.has_password_provider);
    server.abort();
}

#[tokio::test]
async fn exchange_errors_are_classified() {
    let (server, base) = start_fake_backend().await;
    let backend = client(&base);

    let err = backend.exchange(&IdentityProof::new("forged")).await.unwrap_err();
    assert_eq!(err, BackendError::Rejected { status: 401, message: "Invalid Firebase token".into() });
    assert!(err.is_rejection());

    let err = backend.exchange(&IdentityProof::new("crash")).await.unwrap_err();
    assert_eq!(err, BackendError::Status { status: 500, message: "HTTP 500".into() });

    let err = backend.exchange(&IdentityProof::new("empty-token")).await.unwrap_err();
    assert!(matches!(err, BackendError::Malformed(_)));
    server.abort();
}

#[tokio::test]
async fn me_and_refresh_use_the_bearer_credential() {
    let (server, base) = start_fake_backend().await;
    let backend = client(&base);

    let id = backend.fetch_identity(&SessionCredential::new("jwt-1")).await.unwrap();
    assert_eq!(id.email.as_deref(), Some("ada@example.com"));

    let err = backend.fetch_identity(&SessionCredential::new("jwt-old")).await.unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(err.message(), "Invalid token.");

    let next = backend.reissue(&SessionCredential::new("jwt-1")).await.unwrap();
    assert_eq!(next, SessionCredential::new("jwt-2"));
    assert!(backend.reissue(&SessionCredential::new("jwt-old")).await.unwrap_err().is_rejection());
    server.abort();
}

#[tokio::test]
async fn change_password_sends_fresh_proof() {
    let (server, base) = start_fake_backend().await;
    let backend = client(&base);
    let cred = SessionCredential::new("jwt-1");

    backend.change_password(&cred, &IdentityProof::new("fresh-proof"), "battery staple").await.unwrap();

    let err = backend.change_password(&cred, &IdentityProof::new("fresh-proof"), "abc").await.unwrap_err();
    assert_eq!(err, BackendError::Status { status: 400, message: "Password must be at least 6 characters".into() });

    let err = backend.change_password(&cred, &IdentityProof::new("stale-proof"), "battery staple").await.unwrap_err();
    assert_eq!(err, BackendError::Rejected { status: 403, message: "Recent sign-in required".into() });
    server.abort();
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    // bind then drop to get a port nobody listens on
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind 127.0.0.1:0");
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let backend = client(&format!("http://127.0.0.1:{}/api", port));
    let err = backend.fetch_identity(&SessionCredential::new("jwt-1")).await.unwrap_err();
    assert!(matches!(err, BackendError::Unreachable(_)));
    assert_eq!(err.status(), None);
    assert!(!err.is_rejection());
}

#[test]
fn rejects_invalid_base_url() {
    assert!(HttpBackend::new("not a url", "firebase", Duration::from_secs(1)).is_err());
}
