//! Integration tests for the clipscribe-web server.
//!
//! These tests start a real axum server on a random port and drive an
//! orchestrator backed by an in-process service through the REST endpoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clipscribe::prelude::*;
use clipscribe_web::{WebConfig, WsMessage, spawn_web};
use serde_json::{Value, json};

/// Accepts every job; polls stay pending until `release` is set.
#[derive(Default)]
struct GatedService {
    release: AtomicBool,
}

impl TranscriptionService for GatedService {
    fn submit(&self, _request: &SubmitRequest) -> ServiceFuture<'_, JobAccepted> {
        Box::pin(async move { Ok(JobAccepted::new("job-42")) })
    }

    fn poll_status(&self, _job_id: &str) -> ServiceFuture<'_, PollResponse> {
        Box::pin(async move {
            if self.release.load(Ordering::SeqCst) {
                Ok(PollResponse {
                    transcript: Some("hello from the gate".into()),
                    ..PollResponse::with_status("completed")
                })
            } else {
                Ok(PollResponse::with_status("processing"))
            }
        })
    }
}

struct TestServer {
    base: String,
    service: Arc<GatedService>,
    ledger: Arc<CreditLedger>,
    client: reqwest::Client,
}

impl TestServer {
    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn state(&self) -> Value {
        self.get("/api/state").await.json().await.unwrap()
    }

    /// Poll `/api/state` until `state` matches or a second passes.
    async fn wait_for(&self, state: &str) -> Value {
        for _ in 0..100 {
            let json = self.state().await;
            if json["state"] == state {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("orchestrator never reached {state}");
    }
}

/// Helper: spawn a test server on port 0 (random available port).
async fn spawn_test_server(free_uses: u32, credits: u32) -> TestServer {
    let service = Arc::new(GatedService::default());
    let ledger = Arc::new(CreditLedger::new(free_uses, credits));
    let (tx, _) = tokio::sync::broadcast::channel::<WsMessage>(64);

    let dyn_service: Arc<dyn TranscriptionService> = service.clone();
    let config = OrchestratorConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_max_polling_attempts(1000);
    let orchestrator = Arc::new(
        Orchestrator::new(dyn_service, ledger.clone(), config).with_event_handler(NoopHandler),
    );

    let web_config = WebConfig {
        bind_addr: ([127, 0, 0, 1], 0).into(),
        ..Default::default()
    };
    let addr = spawn_web(orchestrator, tx, web_config).await.unwrap();
    TestServer {
        base: format!("http://{addr}"),
        service,
        ledger,
        client: reqwest::Client::new(),
    }
}

const VIDEO: &str = "https://youtu.be/dQw4w9WgXcQ";

// ── REST Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn idle_state_and_ledger() {
    let server = spawn_test_server(2, 5).await;

    let resp = server.get("/api/state").await;
    assert_eq!(resp.status(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["state"], "IDLE");
    assert_eq!(json["statusLine"], "Ready");
    assert_eq!(json["canCancel"], false);
    assert!(json["flowId"].is_null());

    let ledger: Value = server.get("/api/ledger").await.json().await.unwrap();
    assert_eq!(ledger["freeUsesRemaining"], 2);
    assert_eq!(ledger["creditBalance"], 5);
    assert_eq!(ledger["held"], 0);
}

#[tokio::test]
async fn submit_runs_to_success() {
    let server = spawn_test_server(1, 0).await;

    let resp = server
        .post("/api/submit", json!({ "url": VIDEO, "tier": "QUICK_SCAN" }))
        .await;
    assert_eq!(resp.status(), 202);

    let polling = server.wait_for("POLLING").await;
    assert_eq!(polling["jobId"], "job-42");
    assert_eq!(polling["canCancel"], true);
    assert_eq!(server.ledger.account().held, 1);

    server.service.release.store(true, Ordering::SeqCst);
    let done = server.wait_for("SUCCEEDED").await;
    assert_eq!(done["result"]["outcome"], "success");
    assert_eq!(done["result"]["transcript"], "hello from the gate");

    let account = server.ledger.account();
    assert_eq!(account.free_uses_remaining, 0);
    assert_eq!(account.held, 0);

    let resp = server.get("/api/diagnostics").await;
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("Job ID: job-42"));
    assert!(text.contains("DONE"));
}

#[tokio::test]
async fn second_submit_while_busy_is_conflict() {
    let server = spawn_test_server(0, 10).await;

    let first = server.post("/api/submit", json!({ "url": VIDEO })).await;
    assert_eq!(first.status(), 202);

    let second = server.post("/api/submit", json!({ "url": VIDEO })).await;
    assert_eq!(second.status(), 409);
    let json: Value = second.json().await.unwrap();
    assert_ne!(json["state"], "IDLE");

    // Only the first flow holds credit.
    server.wait_for("POLLING").await;
    assert_eq!(server.ledger.account().held, 1);
}

#[tokio::test]
async fn cancel_refunds_and_returns_to_idle() {
    let server = spawn_test_server(0, 3).await;

    server.post("/api/submit", json!({ "url": VIDEO })).await;
    server.wait_for("POLLING").await;

    let resp = server
        .post("/api/control", json!({ "action": "cancel" }))
        .await;
    assert_eq!(resp.status(), 204);

    server.wait_for("IDLE").await;
    let account = server.ledger.account();
    assert_eq!(account.credit_balance, 3);
    assert_eq!(account.held, 0);

    let resp = server
        .post("/api/control", json!({ "action": "cancel" }))
        .await;
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn invalid_link_fails_validation_and_must_be_dismissed() {
    let server = spawn_test_server(1, 0).await;

    let resp = server
        .post("/api/submit", json!({ "url": "https://example.com/watch" }))
        .await;
    assert_eq!(resp.status(), 202);

    let failed = server.wait_for("FAILED").await;
    assert_eq!(failed["result"]["errorCategory"], "Validation");
    assert_eq!(failed["canRetry"], false);
    assert_eq!(server.ledger.account().free_uses_remaining, 1);

    let retry = server.post("/api/control", json!({ "action": "retry" })).await;
    assert_eq!(retry.status(), 409);

    let busy = server.post("/api/submit", json!({ "url": VIDEO })).await;
    assert_eq!(busy.status(), 409);

    let dismiss = server
        .post("/api/control", json!({ "action": "dismiss" }))
        .await;
    assert_eq!(dismiss.status(), 204);
    assert_eq!(server.state().await["state"], "IDLE");
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let server = spawn_test_server(0, 0).await;
    let resp = server.post("/api/control", json!({ "action": "quit" })).await;
    assert!(resp.status().is_client_error());
}
