//! HTTP client tests against a real axum server on a random port.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clipscribe::prelude::*;
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<Option<String>>>>,
}

async fn transcribe(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    rec.auth.lock().unwrap().push(auth);
    rec.bodies.lock().unwrap().push(body);
    Json(json!({"jobId": "job-7", "status": "queued", "estimatedTime": 12, "queuePosition": 3}))
}

async fn status(Path(job_id): Path<String>) -> impl IntoResponse {
    match job_id.as_str() {
        "job-7" => (
            StatusCode::OK,
            Json(json!({
                "status": "COMPLETED",
                "transcript": "hello there",
                "confidence": 0.88,
                "language": "en",
                "duration": 14.5
            })),
        )
            .into_response(),
        "garbled" => (StatusCode::OK, "not json").into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Json(json!({"status": "pending"})).into_response()
        }
        _ => (StatusCode::NOT_FOUND, "job not found").into_response(),
    }
}

async fn spawn_fake_service() -> (String, Recorded) {
    let recorded = Recorded::default();
    let router = Router::new()
        .route("/ttt/transcribe", post(transcribe))
        .route("/ttt/status/{job_id}", get(status))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), recorded)
}

fn client(base: &str) -> HttpTranscriptionService {
    HttpTranscriptionService::new(HttpServiceConfig::default().with_base_url(base)).unwrap()
}

#[tokio::test]
async fn submit_posts_camel_case_payload_with_bearer_token() {
    let (base, recorded) = spawn_fake_service().await;
    let svc = HttpTranscriptionService::new(
        HttpServiceConfig::default()
            .with_base_url(&base)
            .with_api_token("secret-token"),
    )
    .unwrap();

    let accepted = svc
        .submit(&SubmitRequest {
            url: "https://youtu.be/dQw4w9WgXcQ".into(),
            tier: Tier::AiAnalysis,
            client_request_id: "flow-1".into(),
        })
        .await
        .unwrap();

    assert_eq!(accepted.job_id, "job-7");
    assert_eq!(accepted.estimated_seconds, Some(12));
    let raw = accepted.raw.as_ref().unwrap();
    assert_eq!(raw.status, 200);
    assert!(raw.body.contains(r#""queuePosition":3"#));
    let bodies = recorded.bodies.lock().unwrap();
    assert_eq!(bodies[0]["clientRequestId"], "flow-1");
    assert_eq!(bodies[0]["tier"], "AI_ANALYSIS");
    assert_eq!(
        recorded.auth.lock().unwrap()[0].as_deref(),
        Some("Bearer secret-token")
    );
}

#[tokio::test]
async fn submit_without_token_sends_no_authorization() {
    let (base, recorded) = spawn_fake_service().await;
    client(&base)
        .submit(&SubmitRequest {
            url: "https://youtu.be/abc".into(),
            tier: Tier::QuickScan,
            client_request_id: "flow-2".into(),
        })
        .await
        .unwrap();
    assert_eq!(recorded.auth.lock().unwrap()[0], None);
}

#[tokio::test]
async fn poll_status_decodes_wire_fields() {
    let (base, _) = spawn_fake_service().await;
    let resp = client(&base).poll_status("job-7").await.unwrap();
    assert_eq!(resp.job_status(), JobStatus::Completed);
    assert_eq!(resp.transcript.as_deref(), Some("hello there"));
    assert_eq!(resp.duration_seconds, Some(14.5));
}

#[tokio::test]
async fn unknown_job_is_a_status_error() {
    let (base, _) = spawn_fake_service().await;
    let err = client(&base).poll_status("nope").await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::Status {
            status: 404,
            body: "job not found".into()
        }
    );
    assert_eq!(classify(&err).category, ErrorCategory::Validation);
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (base, _) = spawn_fake_service().await;
    let err = client(&base).poll_status("garbled").await.unwrap_err();
    assert!(matches!(err, ServiceError::Decode(_)), "{err:?}");
    assert_eq!(classify(&err).category, ErrorCategory::Api);
}

#[tokio::test]
async fn client_timeout_is_reported_as_timeout() {
    let (base, _) = spawn_fake_service().await;
    let svc = HttpTranscriptionService::new(
        HttpServiceConfig::default()
            .with_base_url(&base)
            .with_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    let err = svc.poll_status("slow").await.unwrap_err();
    assert_eq!(err, ServiceError::Timeout(Duration::from_millis(50)));
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .poll_status("job-7")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Transport(_)), "{err:?}");
    let c = classify(&err);
    assert_eq!(c.category, ErrorCategory::Network);
    assert!(c.retryable);
}

#[tokio::test]
async fn orchestrator_runs_a_flow_over_http() {
    let (base, _) = spawn_fake_service().await;
    let ledger = Arc::new(CreditLedger::new(1, 0));
    let orch = Orchestrator::new(
        Arc::new(client(&base)),
        ledger.clone(),
        OrchestratorConfig::default().with_poll_interval(Duration::from_millis(1)),
    )
    .with_event_handler(NoopHandler);

    let result = orch
        .submit("https://youtu.be/dQw4w9WgXcQ?si=tracking", Tier::QuickScan)
        .await
        .into_result()
        .unwrap();

    assert!(result.is_success(), "{result:?}");
    assert_eq!(ledger.account().free_uses_remaining, 0);
    assert_eq!(orch.snapshot().job_id.as_deref(), Some("job-7"));

    // The submit entry keeps the body exactly as the service sent it.
    let timeline = orch.timeline().unwrap();
    let submit = timeline
        .entries()
        .iter()
        .find(|e| e.step == OperationStep::Submitting)
        .unwrap();
    assert!(submit.received.as_deref().unwrap().contains("queuePosition"));
    let request = submit.request.as_ref().unwrap();
    assert_eq!((request.method.as_str(), request.endpoint.as_str()), ("POST", "/ttt/transcribe"));
    assert_eq!(submit.response.as_ref().unwrap().status_code, Some(200));

    let latest = timeline.latest_request().unwrap();
    assert_eq!(latest.request.as_ref().unwrap().endpoint, "/ttt/status/job-7");
}
