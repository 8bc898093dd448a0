//! Diagnostic timeline for one flow.
//!
//! Every orchestration step appends one [`TimelineEntry`] annotated with what
//! was sent (`expected`), what came back (`received`) and what happens next
//! (`next_action`). Entries for remote calls also carry the outbound
//! [`RequestInfo`] and, when the service answered at all, the inbound
//! [`ResponseInfo`]. Entries are appended in order and never modified. The
//! whole timeline renders to a copyable text block via
//! [`Timeline::formatted_text`] for bug reports.
//!
//! No redaction is applied. Callers must keep secrets out of the annotation
//! fields.

use std::fmt::Write as _;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::ledger::Tier;

/// Maximum characters of a response body kept in `received`.
pub const MAX_RECEIVED_CHARS: usize = 512;

/// Ordered orchestration steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStep {
    Validating,
    HoldingCredit,
    Submitting,
    Polling,
    Resolving,
    Done,
}

impl std::fmt::Display for OperationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationStep::Validating => "VALIDATING",
            OperationStep::HoldingCredit => "HOLDING_CREDIT",
            OperationStep::Submitting => "SUBMITTING",
            OperationStep::Polling => "POLLING",
            OperationStep::Resolving => "RESOLVING",
            OperationStep::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// Outbound half of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub method: String,
    /// Path relative to the service root.
    pub endpoint: String,
    /// Digest of the payload, for calls that send one.
    pub payload_digest: Option<String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            payload_digest: None,
        }
    }

    pub fn with_payload_digest(mut self, digest: impl Into<String>) -> Self {
        self.payload_digest = Some(digest.into());
        self
    }
}

/// Inbound half of a remote call. Absent when no response arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    /// HTTP status, when the transport reported one.
    pub status_code: Option<u16>,
    /// Body clipped to [`MAX_RECEIVED_CHARS`].
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub step: OperationStep,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub expected: Option<String>,
    pub received: Option<String>,
    pub next_action: Option<String>,
    /// Set on entries that represent a remote call.
    pub correlation_id: Option<String>,
    pub retry_count: u32,
    pub polling_attempt: Option<u32>,
    pub max_polling_attempts: Option<u32>,
    pub request: Option<RequestInfo>,
    pub response: Option<ResponseInfo>,
}

impl TimelineEntry {
    pub fn is_remote(&self) -> bool {
        self.request.is_some()
    }

    /// Finish time, when the duration is known.
    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.duration_ms
            .and_then(|d| i64::try_from(d).ok())
            .map(|d| self.started_at + chrono::Duration::milliseconds(d))
    }
}

/// Builder for a [`TimelineEntry`] that measures the step's duration.
///
/// ```ignore
/// let rec = StepRecord::begin(OperationStep::Submitting).expected(digest);
/// let resp = service.submit(&req).await;
/// timeline.append(rec.received(body).finish());
/// ```
#[derive(Debug)]
pub struct StepRecord {
    entry: TimelineEntry,
    clock: Instant,
}

impl StepRecord {
    pub fn begin(step: OperationStep) -> Self {
        Self {
            entry: TimelineEntry {
                step,
                started_at: Utc::now(),
                duration_ms: None,
                expected: None,
                received: None,
                next_action: None,
                correlation_id: None,
                retry_count: 0,
                polling_attempt: None,
                max_polling_attempts: None,
                request: None,
                response: None,
            },
            clock: Instant::now(),
        }
    }

    pub fn expected(mut self, text: impl Into<String>) -> Self {
        self.entry.expected = Some(text.into());
        self
    }

    /// Record what came back, clipped to [`MAX_RECEIVED_CHARS`].
    pub fn received(mut self, text: impl AsRef<str>) -> Self {
        self.entry.received = Some(clip(text.as_ref(), MAX_RECEIVED_CHARS));
        self
    }

    pub fn next_action(mut self, text: impl Into<String>) -> Self {
        self.entry.next_action = Some(text.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.entry.correlation_id = Some(id.into());
        self
    }

    pub fn retry_count(mut self, n: u32) -> Self {
        self.entry.retry_count = n;
        self
    }

    pub fn request(mut self, request: RequestInfo) -> Self {
        self.entry.request = Some(request);
        self
    }

    /// Record the service's answer, body clipped to [`MAX_RECEIVED_CHARS`].
    pub fn response(mut self, status_code: Option<u16>, body: impl AsRef<str>) -> Self {
        self.entry.response = Some(ResponseInfo {
            status_code,
            body: clip(body.as_ref(), MAX_RECEIVED_CHARS),
        });
        self
    }

    pub fn polling(mut self, attempt: u32, max: u32) -> Self {
        self.entry.polling_attempt = Some(attempt);
        self.entry.max_polling_attempts = Some(max);
        self
    }

    pub fn step(&self) -> OperationStep {
        self.entry.step
    }

    /// Stamp the duration and produce the finished entry.
    pub fn finish(mut self) -> TimelineEntry {
        self.entry.duration_ms = Some(self.clock.elapsed().as_millis() as u64);
        self.entry
    }
}

/// Append-only audit trail for one flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub flow_id: Uuid,
    pub job_id: Option<String>,
    pub tier: Tier,
    pub url: String,
    pub started_at: DateTime<Utc>,
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new(flow_id: Uuid, tier: Tier, url: impl Into<String>) -> Self {
        Self {
            flow_id,
            job_id: None,
            tier,
            url: url.into(),
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn set_job_id(&mut self, job_id: impl Into<String>) {
        self.job_id = Some(job_id.into());
    }

    pub fn append(&mut self, entry: TimelineEntry) {
        if let Some(last) = self.entries.last()
            && (entry.step < last.step || entry.started_at < last.started_at)
        {
            warn!(
                flow_id = %self.flow_id,
                "Timeline entry {} appended after {}",
                entry.step,
                last.step
            );
        }
        trace!(flow_id = %self.flow_id, step = %entry.step, "Timeline append");
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries recorded for `step`.
    pub fn count(&self, step: OperationStep) -> usize {
        self.entries.iter().filter(|e| e.step == step).count()
    }

    /// Most recent outbound call.
    pub fn latest_request(&self) -> Option<&TimelineEntry> {
        self.entries.iter().rev().find(|e| e.is_remote())
    }

    /// Most recent remote call that the service actually answered.
    pub fn latest_response(&self) -> Option<&TimelineEntry> {
        self.entries.iter().rev().find(|e| e.response.is_some())
    }

    /// Most recent polling entry.
    fn latest_poll(&self) -> Option<&TimelineEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.polling_attempt.is_some())
    }

    /// Time from the start of the flow to the end of the last finished entry.
    pub fn total_duration_ms(&self) -> i64 {
        self.entries
            .iter()
            .filter_map(TimelineEntry::finished_at)
            .max()
            .map_or(0, |end| (end - self.started_at).num_milliseconds().max(0))
    }

    /// Render the timeline as a single copyable text block.
    pub fn formatted_text(&self) -> String {
        self.render(None)
    }

    /// Like [`formatted_text`](Self::formatted_text), with the owner's
    /// current state in the header.
    pub fn formatted_text_with_state(&self, state: &str) -> String {
        self.render(Some(state))
    }

    fn render(&self, state: Option<&str>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Clipscribe Diagnostic Report ===");
        let _ = writeln!(out, "Flow ID: {}", self.flow_id);
        let _ = writeln!(out, "Job ID: {}", self.job_id.as_deref().unwrap_or("(none)"));
        let _ = writeln!(out, "Tier: {}", self.tier);
        let _ = writeln!(out, "URL: {}", self.url);
        if let Some(state) = state {
            let _ = writeln!(out, "State: {state}");
        }
        let current = self
            .entries
            .last()
            .map_or_else(|| "(none)".to_string(), |e| e.step.to_string());
        let _ = writeln!(out, "Current Step: {current}");
        if let Some(poll) = self.latest_poll()
            && let (Some(n), Some(max)) = (poll.polling_attempt, poll.max_polling_attempts)
        {
            let _ = writeln!(out, "Polling Progress: {n}/{max}");
        }
        let _ = writeln!(out, "Started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "Total Duration: {}ms", self.total_duration_ms());
        let _ = writeln!(out, "Entries: {}", self.entries.len());
        out.push('\n');

        for (i, e) in self.entries.iter().enumerate() {
            let offset = (e.started_at - self.started_at).num_milliseconds().max(0);
            let duration = e
                .duration_ms
                .map_or_else(|| "in progress".to_string(), |d| format!("{d}ms"));
            let _ = write!(out, "{:>2}. [+{offset}ms] {} ({duration})", i + 1, e.step);
            if let (Some(n), Some(max)) = (e.polling_attempt, e.max_polling_attempts) {
                let _ = write!(out, " attempt {n}/{max}");
            }
            if e.retry_count > 0 {
                let _ = write!(out, " retry {}", e.retry_count);
            }
            if let Some(id) = &e.correlation_id {
                let _ = write!(out, " [{id}]");
            }
            out.push('\n');
            if let Some(req) = &e.request {
                let _ = writeln!(out, "      -> {} {}", req.method, req.endpoint);
                let _ = match &e.response {
                    Some(resp) => writeln!(out, "      <- {}", status_label(resp)),
                    None => writeln!(out, "      <- no response"),
                };
            }
        }

        if let Some(last) = self.entries.last() {
            let _ = writeln!(out, "\n--- Final step: {} ---", last.step);
            let _ = writeln!(out, "Expected: {}", last.expected.as_deref().unwrap_or("-"));
            let _ = writeln!(out, "Received: {}", last.received.as_deref().unwrap_or("-"));
            let _ = writeln!(
                out,
                "Next action: {}",
                last.next_action.as_deref().unwrap_or("-")
            );
            if let Some(id) = &last.correlation_id {
                let _ = writeln!(out, "Correlation ID: {id}");
            }
        }
        if let Some(req) = self.latest_request().and_then(|e| e.request.as_ref()) {
            let _ = writeln!(out, "\n--- Last request ---");
            let _ = writeln!(out, "{} {}", req.method, req.endpoint);
            if let Some(digest) = &req.payload_digest {
                let _ = writeln!(out, "Payload: {digest}");
            }
        }
        if let Some(resp) = self.latest_response().and_then(|e| e.response.as_ref()) {
            let _ = writeln!(out, "\n--- Last response ---");
            let _ = writeln!(out, "{}", status_label(resp));
            let _ = writeln!(out, "{}", resp.body);
        }
        let _ = writeln!(out, "=== End of Report ===");
        out
    }
}

fn status_label(resp: &ResponseInfo) -> String {
    match resp.status_code {
        Some(code) => format!("HTTP {code}"),
        None => "response (no status)".to_string(),
    }
}

/// Correlation id for one remote call within a flow, e.g. `{flow}:poll3`.
pub fn correlation_id(flow_id: &Uuid, label: &str) -> String {
    format!("{flow_id}:{label}")
}

/// Hex SHA-256 of an outbound payload.
pub fn payload_digest(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}

/// Truncate to at most `max` characters, marking the cut.
pub fn clip(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}… ({} bytes total)", text.get(..cut).unwrap_or(""), text.len()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Timeline {
        let flow = Uuid::new_v4();
        let mut t = Timeline::new(flow, Tier::QuickScan, "https://youtu.be/abc");
        t.append(StepRecord::begin(OperationStep::Validating).finish());
        t.append(
            StepRecord::begin(OperationStep::Submitting)
                .expected("sha256:deadbeef")
                .request(RequestInfo::new("POST", "/ttt/transcribe").with_payload_digest("sha256:deadbeef"))
                .received(r#"{"jobId":"j-1"}"#)
                .response(Some(202), r#"{"jobId":"j-1"}"#)
                .correlation_id(correlation_id(&flow, "submit"))
                .finish(),
        );
        t.set_job_id("j-1");
        t.append(
            StepRecord::begin(OperationStep::Polling)
                .request(RequestInfo::new("GET", "/ttt/status/j-1"))
                .received("error: request timed out after 10ms")
                .correlation_id(correlation_id(&flow, "poll1"))
                .polling(1, 20)
                .next_action("Wait and poll again")
                .finish(),
        );
        t
    }

    #[test]
    fn finished_entries_have_duration() {
        let t = sample();
        assert!(t.entries().iter().all(|e| e.duration_ms.is_some()));
    }

    #[test]
    fn latest_request_and_response() {
        let t = sample();
        assert_eq!(
            t.latest_request().unwrap().step,
            OperationStep::Polling
        );
        // The timed-out poll never got an answer.
        let answered = t.latest_response().unwrap();
        assert_eq!(answered.step, OperationStep::Submitting);
        assert_eq!(answered.response.as_ref().unwrap().status_code, Some(202));
        let empty = Timeline::new(Uuid::new_v4(), Tier::AiAnalysis, "x");
        assert!(empty.latest_request().is_none());
        assert!(empty.latest_response().is_none());
    }

    #[test]
    fn formatted_text_contains_ids_steps_and_final_annotations() {
        let t = sample();
        let text = t.formatted_text();
        assert!(text.contains(&t.flow_id.to_string()));
        assert!(text.contains("Job ID: j-1"));
        assert!(text.contains("VALIDATING"));
        assert!(text.contains("SUBMITTING"));
        assert!(text.contains("attempt 1/20"));
        assert!(text.contains("Next action: Wait and poll again"));
        assert!(text.contains(&format!("{}:poll1", t.flow_id)));
        assert!(text.contains("Current Step: POLLING"));
        assert!(text.contains("Polling Progress: 1/20"));
        assert!(text.contains("Total Duration: "));
        assert!(text.contains("-> GET /ttt/status/j-1"));
        assert!(text.contains("<- no response"));
        assert!(text.contains("<- HTTP 202"));
        assert!(text.contains("Payload: sha256:deadbeef"));
        assert!(!text.contains("State: "));
    }

    #[test]
    fn report_can_include_owner_state() {
        let text = sample().formatted_text_with_state("POLLING");
        assert!(text.contains("State: POLLING"));
    }

    #[test]
    fn total_duration_covers_finished_entries() {
        let mut t = Timeline::new(Uuid::new_v4(), Tier::QuickScan, "u");
        assert_eq!(t.total_duration_ms(), 0);
        let rec = StepRecord::begin(OperationStep::Validating);
        std::thread::sleep(std::time::Duration::from_millis(5));
        t.append(rec.finish());
        assert!(t.total_duration_ms() >= 5);
    }

    #[test]
    fn correlation_ids_are_scoped_to_flow() {
        let flow = Uuid::new_v4();
        assert_eq!(correlation_id(&flow, "poll2"), format!("{flow}:poll2"));
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = payload_digest(b"abc");
        assert_eq!(
            d,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 10), "héllo");
        let clipped = clip("héllo wörld", 4);
        assert!(clipped.starts_with("héll…"));
    }

    #[test]
    fn steps_are_ordered() {
        assert!(OperationStep::Validating < OperationStep::HoldingCredit);
        assert!(OperationStep::Polling < OperationStep::Resolving);
        assert!(OperationStep::Resolving < OperationStep::Done);
    }
}
