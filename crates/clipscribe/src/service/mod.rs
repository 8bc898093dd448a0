//! The remote transcription job API as seen by the orchestrator.
//!
//! [`TranscriptionService`] is the seam between the state machine and the
//! network. The production implementation is
//! [`HttpTranscriptionService`](http::HttpTranscriptionService); tests plug in
//! scripted fakes.

pub mod http;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::Tier;

/// Boxed future returned by [`TranscriptionService`] methods.
///
/// Boxing keeps the trait dyn-compatible so the orchestrator can hold an
/// `Arc<dyn TranscriptionService>`.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// A failed remote call.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The request never produced an HTTP response (DNS, refused, reset).
    #[error("request failed: {0}")]
    Transport(String),
    /// The call exceeded the caller-supplied timeout.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be parsed.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Path of the submit endpoint, relative to the service root.
pub const SUBMIT_PATH: &str = "/ttt/transcribe";

/// Path of the status endpoint for `job_id`, relative to the service root.
pub fn status_path(job_id: &str) -> String {
    format!("/ttt/status/{job_id}")
}

/// A successful response as it arrived on the wire.
///
/// Transports that see the raw exchange attach it to the decoded value so
/// diagnostics can show exactly what the service sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// A decoded response that may carry its [`RawResponse`].
pub trait WireResponse: Serialize {
    fn raw(&self) -> Option<&RawResponse>;
}

/// Outbound submit payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub url: String,
    pub tier: Tier,
    /// Idempotency key for the submit call. The orchestrator uses the flow id.
    pub client_request_id: String,
}

/// Response to an accepted submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(
        default,
        rename = "estimatedTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_seconds: Option<u64>,
    #[serde(skip)]
    pub raw: Option<RawResponse>,
}

impl JobAccepted {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: None,
            estimated_seconds: None,
            raw: None,
        }
    }
}

impl WireResponse for JobAccepted {
    fn raw(&self) -> Option<&RawResponse> {
        self.raw.as_ref()
    }
}

/// Canonical job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map a wire status name onto the canonical model.
    ///
    /// The service has used two naming schemes over time; both are accepted.
    /// Anything unrecognised is treated as still in progress.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "done" | "success" => JobStatus::Completed,
            "failed" | "error" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

/// One status poll result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    /// Raw wire status. See [`PollResponse::job_status`].
    pub status: String,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, rename = "duration")]
    pub duration_seconds: Option<f64>,
    #[serde(default, rename = "error")]
    pub error_message: Option<String>,
    #[serde(skip)]
    pub raw: Option<RawResponse>,
}

impl PollResponse {
    pub fn job_status(&self) -> JobStatus {
        JobStatus::from_wire(&self.status)
    }

    /// A bare status response with no payload.
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            transcript: None,
            confidence: None,
            language: None,
            duration_seconds: None,
            error_message: None,
            raw: None,
        }
    }
}

impl WireResponse for PollResponse {
    fn raw(&self) -> Option<&RawResponse> {
        self.raw.as_ref()
    }
}

/// Remote job API consumed by the orchestrator.
pub trait TranscriptionService: Send + Sync {
    /// Submit a URL for processing.
    fn submit(&self, request: &SubmitRequest) -> ServiceFuture<'_, JobAccepted>;

    /// Query the status of a previously accepted job.
    fn poll_status(&self, job_id: &str) -> ServiceFuture<'_, PollResponse>;
}
