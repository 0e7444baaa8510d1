use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use purian_waitlist::app;
use purian_waitlist::config::Settings;
use purian_waitlist::mail::{MailError, Mailer, WelcomeEmail};
use purian_waitlist::models::{NewSignup, WaitlistRecord};
use purian_waitlist::rate_limit::RateLimiter;
use purian_waitlist::state::AppState;
use purian_waitlist::store::{InsertOutcome, MemoryStore, StoreError, WaitlistStore};
use purian_waitlist::verify::{BotVerifier, VerifyError};

struct StubVerifier {
    accept: bool,
    // answer as if siteverify returned 503
    down: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl BotVerifier for StubVerifier {
    async fn verify(&self, _token: &str, _remote_ip: &str) -> Result<bool, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(VerifyError::Status(503));
        }
        Ok(self.accept)
    }
}

#[derive(Default)]
struct RecordingMailer {
    fail: AtomicBool,
    sent: Mutex<Vec<WelcomeEmail>>,
}

impl RecordingMailer {
    fn sent(&self) -> Vec<WelcomeEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &WelcomeEmail) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Rejected {
                status: 500,
                message: "resend is down".into(),
            });
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

// Store whose every call fails
struct BrokenStore;

#[async_trait]
impl WaitlistStore for BrokenStore {
    async fn latest_signup(&self, _email: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Err(StoreError::Rejected {
            status: 503,
            message: "connection refused to db.internal:5432".into(),
        })
    }

    async fn count_from_ip_since(&self, _ip: &str, _since: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn insert(&self, _signup: &NewSignup) -> Result<InsertOutcome, StoreError> {
        Ok(InsertOutcome::Inserted)
    }
}

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    mailer: Arc<RecordingMailer>,
    verifier: Arc<StubVerifier>,
}

fn harness_with(settings: Settings, accept_token: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mailer = Arc::new(RecordingMailer::default());
    let verifier = Arc::new(StubVerifier {
        accept: accept_token,
        down: AtomicBool::new(false),
        calls: AtomicUsize::new(0),
    });
    let state = Arc::new(AppState {
        rate_limiter: Arc::new(RateLimiter::new(5, Duration::from_secs(60))),
        store: store.clone(),
        mailer: mailer.clone(),
        verifier: verifier.clone(),
        settings,
    });
    Harness {
        app: app(state),
        store,
        mailer,
        verifier,
    }
}

fn harness() -> Harness {
    harness_with(Settings::default(), true)
}

fn post_json(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/subscribe")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response: Response<Body> = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn record(email: &str, ip: &str, age: chrono::Duration) -> WaitlistRecord {
    WaitlistRecord {
        email: email.to_string(),
        lang: "en".to_string(),
        ip: ip.to_string(),
        created_at: Utc::now() - age,
    }
}

#[tokio::test]
async fn german_signup_is_stored_and_welcomed_in_german() {
    let h = harness();

    let (status, body) = send(&h.app, post_json(json!({ "email": "a@b.de", "lang": "de", "token": "T" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let row = h.store.get("a@b.de").expect("row inserted");
    assert_eq!(row.lang, "de");
    assert_eq!(row.ip, "203.0.113.7");

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@b.de");
    assert_eq!(sent[0].subject, "Willkommen bei Purian");
}

#[tokio::test]
async fn email_is_lowercased_and_lang_defaults_to_english() {
    let h = harness();

    let (status, _) = send(&h.app, post_json(json!({ "email": "Ana@Example.COM", "token": "T" }))).await;

    assert_eq!(status, StatusCode::OK);
    let row = h.store.get("ana@example.com").expect("row under lowercased email");
    assert_eq!(row.lang, "en");
    assert_eq!(h.mailer.sent()[0].subject, "Welcome to Purian");
}

#[tokio::test]
async fn sixth_request_in_window_is_rate_limited() {
    let h = harness();

    for _ in 0..5 {
        let (status, _) = send(&h.app, post_json(json!({ "email": "not-an-email", "token": "T" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, body) = send(&h.app, post_json(json!({ "email": "a@b.de", "token": "T" }))).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].is_string());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn rate_limit_runs_before_method_check() {
    let h = harness();
    let get = || {
        Request::builder()
            .method("GET")
            .uri("/api/subscribe")
            .header("x-forwarded-for", "198.51.100.9")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..5 {
        let (status, body) = send(&h.app, get()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, json!({ "error": "Method not allowed" }));
    }
    let (status, _) = send(&h.app, get()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn non_json_content_type_is_rejected_before_parsing() {
    let h = harness();
    let req = Request::builder()
        .method("POST")
        .uri("/api/subscribe")
        .header("content-type", "text/plain")
        .body(Body::from(r#"{"email":"a@b.de","token":"T"}"#))
        .unwrap();

    let (status, _) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let h = harness();
    let padding = "x".repeat(11 * 1024);

    let (status, body) = send(&h.app, post_json(json!({ "email": "a@b.de", "lang": padding, "token": "T" }))).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({ "error": "Request body too large" }));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn unknown_field_is_rejected() {
    let h = harness();

    let (status, body) = send(
        &h.app,
        post_json(json!({ "email": "a@b.de", "token": "T", "name": "Ana" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Unexpected field: name" }));
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let h = harness();
    let req = Request::builder()
        .method("POST")
        .uri("/api/subscribe")
        .header("content-type", "application/json; charset=utf-8")
        .body(Body::from("{\"email\": "))
        .unwrap();

    let (status, body) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid JSON" }));
}

#[tokio::test]
async fn missing_token_is_rejected_without_verification() {
    let h = harness();

    let (status, _) = send(&h.app, post_json(json!({ "email": "a@b.de" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_email_makes_no_dependency_call() {
    let h = harness();

    for email in [json!("a@b"), json!("no spaces@b.de"), json!(42), json!(format!("{}@b.de", "a".repeat(320)))] {
        let (status, body) = send(&h.app, post_json(json!({ "email": email, "token": "T" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid email" }));
        assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.is_empty());
    }
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn failed_bot_check_never_reaches_the_store() {
    let h = harness_with(Settings::default(), false);

    let (status, body) = send(&h.app, post_json(json!({ "email": "a@b.de", "token": "bad" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Bot verification failed" }));
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 1);
    assert!(h.store.is_empty());
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn unreachable_bot_check_is_a_failed_check() {
    let h = harness();
    h.verifier.down.store(true, Ordering::SeqCst);

    let (status, body) = send(&h.app, post_json(json!({ "email": "a@b.de", "token": "T" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Bot verification failed" }));
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 1);
    assert!(h.store.is_empty());
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn empty_token_is_treated_as_missing() {
    let h = harness();

    let (status, body) = send(&h.app, post_json(json!({ "email": "a@b.de", "token": "" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Missing bot verification token" }));
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn repeat_signup_within_cooldown_is_silent() {
    let h = harness();

    let (first, _) = send(&h.app, post_json(json!({ "email": "a@b.de", "token": "T" }))).await;
    let (second, body) = send(&h.app, post_json(json!({ "email": "A@B.DE", "token": "T" }))).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn duplicate_insert_after_cooldown_succeeds_without_resending() {
    let h = harness();
    h.store.seed(record("a@b.de", "198.51.100.1", chrono::Duration::hours(25)));

    for _ in 0..3 {
        let (status, body) = send(&h.app, post_json(json!({ "email": "a@b.de", "token": "T" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    assert_eq!(h.store.len(), 1);
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn first_signup_then_resubmissions_send_one_email() {
    let h = harness();

    for email in ["a@b.de", "A@b.de", "a@B.DE"] {
        let (status, _) = send(&h.app, post_json(json!({ "email": email, "token": "T" }))).await;
        assert_eq!(status, StatusCode::OK);
    }
    // age the row past the cooldown; the unique email still blocks a resend
    h.store.seed(record("a@b.de", "203.0.113.7", chrono::Duration::hours(25)));
    let (status, _) = send(&h.app, post_json(json!({ "email": "a@b.de", "token": "T" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn too_many_signups_from_one_ip_are_throttled() {
    let h = harness();
    for i in 0..21 {
        h.store.seed(record(&format!("user{i}@b.de"), "203.0.113.7", chrono::Duration::minutes(30)));
    }

    let (status, body) = send(&h.app, post_json(json!({ "email": "new@b.de", "token": "T" }))).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({ "error": "Too many signups from this address" }));
    assert!(h.store.get("new@b.de").is_none());
}

#[tokio::test]
async fn twenty_recent_signups_from_one_ip_are_still_allowed() {
    let h = harness();
    for i in 0..20 {
        h.store.seed(record(&format!("user{i}@b.de"), "203.0.113.7", chrono::Duration::minutes(30)));
    }
    h.store.seed(record("old@b.de", "203.0.113.7", chrono::Duration::minutes(90)));

    let (status, _) = send(&h.app, post_json(json!({ "email": "new@b.de", "token": "T" }))).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn mail_failure_is_500_and_keeps_the_row() {
    let h = harness();
    h.mailer.fail.store(true, Ordering::SeqCst);

    let (status, body) = send(&h.app, post_json(json!({ "email": "a@b.de", "token": "T" }))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Email delivery failed" }));
    assert!(h.store.get("a@b.de").is_some());
}

#[tokio::test]
async fn storage_failure_does_not_leak_details() {
    let verifier = Arc::new(StubVerifier {
        accept: true,
        down: AtomicBool::new(false),
        calls: AtomicUsize::new(0),
    });
    let mailer = Arc::new(RecordingMailer::default());
    let state = Arc::new(AppState {
        rate_limiter: Arc::new(RateLimiter::new(5, Duration::from_secs(60))),
        store: Arc::new(BrokenStore),
        mailer: mailer.clone(),
        verifier,
        settings: Settings::default(),
    });

    let (status, body) = send(&app(state), post_json(json!({ "email": "a@b.de", "token": "T" }))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Storage error" }));
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn lenient_body_skips_content_type_and_field_checks() {
    let settings = Settings {
        strict_body: false,
        ..Settings::default()
    };
    let h = harness_with(settings, true);
    let req = Request::builder()
        .method("POST")
        .uri("/api/subscribe")
        .header("content-type", "text/plain")
        .body(Body::from(r#"{"email":"a@b.de","token":"T","source":"footer"}"#))
        .unwrap();

    let (status, _) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::OK);
    let row = h.store.get("a@b.de").unwrap();
    assert_eq!(row.ip, "unknown");
}

#[tokio::test]
async fn health_reports_healthy() {
    let h = harness();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
