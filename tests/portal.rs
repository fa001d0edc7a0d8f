//! End-to-end tests against a fake portal.
//!
//! The mock serves the CAS login flow and the form-engine endpoints; the
//! submit endpoint echoes whatever it receives, so verification runs against
//! real round-tripped payloads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use campusclock_core::config::{AppConfig, PortalConfig};
use campusclock_core::error::ClockError;
use campusclock_core::types::{Attempt, AttemptStatus, ClockOutcome, User};
use campusclock_notify::Notifier;
use campusclock_scheduler::execute_attempt;
use campusclock_security::Vault;
use campusclock_session::SessionClient;
use campusclock_store::ClockStore;
use campusclock_workflow::{ClockWorkflow, FieldFill};

const SESSION_COOKIE: &str = "SESSION=e2e-session";

const LOGIN_PAGE: &str = r#"<html><body>
    <form id="casLoginForm" action="/authserver/login" method="post">
        <input type="text" name="username" value=""/>
        <input type="password" name="password" value=""/>
        <input type="hidden" name="lt" value="LT-42-e2e"/>
        <input type="hidden" name="execution" value="e1s1"/>
        <input type="hidden" name="_eventId" value="submit"/>
        <input type="submit" value="Login"/>
    </form></body></html>"#;

// ─── Fixtures ─────────────────────────────────────────────

fn portal_config(server: &MockServer) -> PortalConfig {
    PortalConfig {
        ids_base: server.uri(),
        portal_base: server.uri(),
        accept_invalid_certs: false,
        ..Default::default()
    }
}

fn app_config(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.portal = portal_config(server);
    config.security.encrypt = false;
    config
}

fn standalone_user(username: &str) -> User {
    User {
        id: None,
        username: username.into(),
        password: "pw".into(),
        email: None,
        auto_clock: true,
        cookie: None,
    }
}

fn persisted_user(store: &ClockStore, username: &str) -> User {
    store
        .add_user(username, "pw", Some("student@example.edu"), true)
        .unwrap();
    store.get_user(username).unwrap().unwrap()
}

fn session(user: User, server: &MockServer, store: Option<Arc<ClockStore>>) -> SessionClient {
    SessionClient::new(user, portal_config(server), Vault::new(false), store).unwrap()
}

fn portal_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&FixedOffset::east_opt(8 * 3600).unwrap())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

// ─── Mock portal ──────────────────────────────────────────

/// CAS login flow: page, captcha probe, credential POST (sets the session
/// cookie), auth probe keyed on that cookie.
async fn mount_auth(server: &MockServer, captcha: bool) {
    Mock::given(method("GET"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/authserver/needCaptcha.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(if captcha { "true" } else { "false" }),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "SESSION=e2e-session; Path=/"),
        )
        .mount(server)
        .await;
    mount_auth_probe(server).await;
}

async fn mount_auth_probe(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/login/check"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login/check"))
        .respond_with(ResponseTemplate::new(302))
        .with_priority(10)
        .mount(server)
        .await;
}

async fn mount_business(server: &MockServer, start: Option<String>, end: Option<String>) {
    Mock::given(method("GET"))
        .and(path("/api/app/214/business/now"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"business": {
                "id": 3000,
                "endTime": null,
                "businessTimeList": [
                    {"nodeId": "approver", "startDate": null, "endDate": null},
                    {"nodeId": "owner", "startDate": start, "endDate": end}
                ]
            }}]
        })))
        .mount(server)
        .await;
}

/// An open owner window: started an hour ago, closes in three.
async fn mount_open_business(server: &MockServer) {
    let now = Utc::now();
    mount_business(
        server,
        Some(portal_time(now - Duration::hours(1))),
        Some(portal_time(now + Duration::hours(3))),
    )
    .await;
}

async fn mount_instance(server: &MockServer, editable: bool) {
    Mock::given(method("GET"))
        .and(path("/api/formEngine/business/3000/myFormInstance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": "inst-1",
                "editable": editable,
                "formData": [
                    {"name": "select_1584240106785", "title": "学生本人是否填写", "value": {"stringValue": ""}},
                    {"name": "input_temperature", "title": "体温 Temperature", "value": {"stringValue": "36.5"}},
                    {"name": "select_1582538939790", "value": {"stringValue": ""}}
                ]
            }
        })))
        .mount(server)
        .await;
}

/// Echoes the submitted formData back, so verification sees exactly what
/// the client sent.
struct EchoSubmission;

impl Respond for EchoSubmission {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({"data": {"formData": body["formData"]}}))
    }
}

/// Accepts the submission with a 200 but silently keeps its own value for
/// the self-reported field: the portal-misbehavior case.
struct StubbornSubmission;

impl Respond for StubbornSubmission {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut body: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
        if let Some(fields) = body["formData"].as_array_mut() {
            for field in fields {
                if field["name"] == "select_1584240106785" {
                    field["value"] = json!({"stringValue": "否"});
                }
            }
        }
        ResponseTemplate::new(200).set_body_json(json!({"data": {"formData": body["formData"]}}))
    }
}

fn submit_mock<R: Respond + Send + Sync + 'static>(responder: R) -> Mock {
    Mock::given(method("POST"))
        .and(path("/api/formEngine/formInstance/inst-1"))
        .respond_with(responder)
}

// ─── Notifier double ──────────────────────────────────────

#[derive(Clone, Default)]
struct Counting {
    inner: Arc<CountingInner>,
}

#[derive(Default)]
struct CountingInner {
    calls: AtomicUsize,
    last: Mutex<Option<Attempt>>,
}

impl Counting {
    fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    fn last(&self) -> Option<Attempt> {
        self.inner.last.lock().unwrap().clone()
    }

    fn boxed(&self) -> Vec<Box<dyn Notifier>> {
        vec![Box::new(self.clone())]
    }
}

#[async_trait]
impl Notifier for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    async fn notify(&self, _user: &User, attempt: &Attempt) -> campusclock_core::error::Result<()> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.last.lock().unwrap() = Some(attempt.clone());
        Ok(())
    }
}

// ─── Session properties ───────────────────────────────────

#[tokio::test]
async fn probe_is_idempotent_and_has_no_side_effects() {
    let server = MockServer::start().await;
    mount_auth_probe(&server).await;

    let session = session(standalone_user("20230001"), &server, None);
    assert!(!session.is_authenticated().await.unwrap());
    assert!(!session.is_authenticated().await.unwrap());
    // The probe never grew the jar.
    assert_eq!(session.cookie_snapshot().unwrap(), r#"{"cookies":[]}"#);
}

#[tokio::test]
async fn login_when_already_authenticated_is_probe_only() {
    let server = MockServer::start().await;
    mount_auth_probe(&server).await;
    Mock::given(method("GET"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/authserver/needCaptcha.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("false"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "SESSION=e2e-session; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session(standalone_user("20230001"), &server, None);
    session.login(false).await.unwrap();
    // Second login sees the live session and stops after the probe; the
    // expect(1) counts above verify no further portal traffic on drop.
    session.login(false).await.unwrap();
    assert!(session.is_authenticated().await.unwrap());
}

#[tokio::test]
async fn cookie_snapshot_reconstructs_an_authenticated_session() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;

    let store = Arc::new(ClockStore::open_in_memory().unwrap());
    let user = persisted_user(&store, "20230001");

    let mut first = session(user, &server, Some(store.clone()));
    first.login(false).await.unwrap();

    let stored = store.get_user("20230001").unwrap().unwrap();
    assert!(stored.id.is_some(), "login assigns the user id");
    assert!(stored.cookie.is_some(), "login persists the jar snapshot");

    // A brand-new client seeded only from the snapshot probes as live.
    let second = session(stored, &server, Some(store.clone()));
    assert!(second.is_authenticated().await.unwrap());
}

#[tokio::test]
async fn logout_clears_the_session() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    Mock::given(method("GET"))
        .and(path("/authserver/logout"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("set-cookie", "SESSION=e2e-session; Path=/; Max-Age=0"),
        )
        .mount(&server)
        .await;

    let mut session = session(standalone_user("20230001"), &server, None);
    session.login(false).await.unwrap();
    assert!(session.is_authenticated().await.unwrap());

    session.logout().await.unwrap();
    assert!(!session.is_authenticated().await.unwrap());
    assert_eq!(session.cookie_snapshot().unwrap(), r#"{"cookies":[]}"#);
}

#[tokio::test]
async fn captcha_probe_blocks_credential_submission() {
    let server = MockServer::start().await;
    mount_auth_probe(&server).await;
    Mock::given(method("GET"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/authserver/needCaptcha.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;
    // The credentials must never be posted once the captcha gate is up.
    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut session = session(standalone_user("20230001"), &server, None);
    let err = session.login(false).await.unwrap_err();
    assert!(matches!(err, ClockError::CaptchaRequired(_)));
}

// ─── Workflow properties ──────────────────────────────────

#[tokio::test]
async fn future_window_ends_benignly_without_submitting() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    let now = Utc::now();
    mount_business(
        &server,
        Some(portal_time(now + Duration::hours(2))),
        Some(portal_time(now + Duration::hours(5))),
    )
    .await;
    submit_mock(EchoSubmission).expect(0).mount(&server).await;

    let mut session = session(standalone_user("20230001"), &server, None);
    session.login(false).await.unwrap();
    let outcome = ClockWorkflow::new(&session).clock().await.unwrap();
    assert_eq!(outcome, ClockOutcome::NotYetOpen);
}

#[tokio::test]
async fn expired_window_ends_benignly_without_submitting() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    let now = Utc::now();
    mount_business(
        &server,
        Some(portal_time(now - Duration::hours(5))),
        Some(portal_time(now - Duration::hours(1))),
    )
    .await;
    submit_mock(EchoSubmission).expect(0).mount(&server).await;

    let mut session = session(standalone_user("20230001"), &server, None);
    session.login(false).await.unwrap();
    let outcome = ClockWorkflow::new(&session).clock().await.unwrap();
    assert_eq!(outcome, ClockOutcome::WindowExpired);
}

#[tokio::test]
async fn empty_business_list_is_an_error() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    Mock::given(method("GET"))
        .and(path("/api/app/214/business/now"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let mut session = session(standalone_user("20230001"), &server, None);
    session.login(false).await.unwrap();
    let err = ClockWorkflow::new(&session).clock().await.unwrap_err();
    assert!(matches!(err, ClockError::NoOpenBusiness));
}

#[tokio::test]
async fn echo_mismatch_fails_despite_http_success() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    mount_open_business(&server).await;
    mount_instance(&server, true).await;
    submit_mock(StubbornSubmission).mount(&server).await;

    let mut session = session(standalone_user("20230001"), &server, None);
    session.login(false).await.unwrap();
    let err = ClockWorkflow::new(&session).clock().await.unwrap_err();
    assert!(matches!(err, ClockError::ClockValidationFailed(_)));
}

#[tokio::test]
async fn same_day_attempts_do_not_share_state() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    mount_open_business(&server).await;
    mount_instance(&server, true).await;
    submit_mock(EchoSubmission).mount(&server).await;

    // Two runs for the same user with different injected values: each
    // verifies against its own fills, so any cross-talk would fail one.
    let fills = |a: &str, b: &str| {
        vec![
            FieldFill {
                name: "select_1584240106785".into(),
                value: json!({"stringValue": a}),
            },
            FieldFill {
                name: "select_1582538939790".into(),
                value: json!({"stringValue": b}),
            },
        ]
    };

    let mut s1 = session(standalone_user("20230001"), &server, None);
    s1.login(false).await.unwrap();
    let outcome1 = ClockWorkflow::with_fills(&s1, fills("first-run", "first-pledge"))
        .clock()
        .await
        .unwrap();

    let mut s2 = session(standalone_user("20230001"), &server, None);
    s2.login(false).await.unwrap();
    let outcome2 = ClockWorkflow::with_fills(&s2, fills("second-run", "second-pledge"))
        .clock()
        .await
        .unwrap();

    assert_eq!(outcome1, ClockOutcome::Submitted);
    assert_eq!(outcome2, ClockOutcome::Submitted);
}

// ─── Executor scenarios ───────────────────────────────────

fn pending_attempt(store: &Arc<ClockStore>, username: &str) -> (User, Attempt) {
    let user = persisted_user(store, username);
    let id = store.ensure_user_id(username).unwrap();
    let attempt = store.create_attempt(&id, Utc::now()).unwrap();
    (user, attempt)
}

#[tokio::test]
async fn successful_check_in_marks_success_and_notifies_once() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    mount_open_business(&server).await;
    mount_instance(&server, true).await;
    submit_mock(EchoSubmission).mount(&server).await;

    let store = Arc::new(ClockStore::open_in_memory().unwrap());
    let (user, attempt) = pending_attempt(&store, "20230001");
    let counter = Counting::default();

    execute_attempt(&store, &counter.boxed(), &app_config(&server), &user, &attempt.id)
        .await
        .unwrap();

    let finished = store.get_attempt(&attempt.id).unwrap().unwrap();
    assert_eq!(finished.status, AttemptStatus::Success);
    assert!(finished.executed_at.is_some());
    assert_eq!(counter.calls(), 1);
    assert_eq!(counter.last().unwrap().status, AttemptStatus::Success);
}

#[tokio::test]
async fn captcha_marks_the_attempt_failed() {
    let server = MockServer::start().await;
    mount_auth_probe(&server).await;
    Mock::given(method("GET"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/authserver/needCaptcha.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;

    let store = Arc::new(ClockStore::open_in_memory().unwrap());
    let (user, attempt) = pending_attempt(&store, "20230001");
    let counter = Counting::default();

    execute_attempt(&store, &counter.boxed(), &app_config(&server), &user, &attempt.id)
        .await
        .unwrap();

    let finished = store.get_attempt(&attempt.id).unwrap().unwrap();
    assert_eq!(finished.status, AttemptStatus::Failed);
    assert!(finished.message.unwrap().contains("captcha"));
    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn uneditable_instance_marks_the_attempt_failed() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    mount_open_business(&server).await;
    mount_instance(&server, false).await;

    let store = Arc::new(ClockStore::open_in_memory().unwrap());
    let (user, attempt) = pending_attempt(&store, "20230001");
    let counter = Counting::default();

    execute_attempt(&store, &counter.boxed(), &app_config(&server), &user, &attempt.id)
        .await
        .unwrap();

    let finished = store.get_attempt(&attempt.id).unwrap().unwrap();
    assert_eq!(finished.status, AttemptStatus::Failed);
    assert!(finished.message.unwrap().contains("not editable"));
    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn closed_window_marks_the_attempt_skipped() {
    let server = MockServer::start().await;
    mount_auth(&server, false).await;
    let now = Utc::now();
    mount_business(
        &server,
        Some(portal_time(now - Duration::hours(5))),
        Some(portal_time(now - Duration::hours(1))),
    )
    .await;

    let store = Arc::new(ClockStore::open_in_memory().unwrap());
    let (user, attempt) = pending_attempt(&store, "20230001");
    let counter = Counting::default();

    execute_attempt(&store, &counter.boxed(), &app_config(&server), &user, &attempt.id)
        .await
        .unwrap();

    let finished = store.get_attempt(&attempt.id).unwrap().unwrap();
    assert_eq!(finished.status, AttemptStatus::Skipped);
    assert_eq!(counter.calls(), 1);
}
