//! The transcription request state machine.
//!
//! An [`Orchestrator`] sequences one flow at a time:
//!
//! ```text
//! submit ─▶ Validating ─▶ HoldingCredit ─▶ Submitting ─▶ Polling ─▶ Resolving ─▶ Succeeded
//!              │               │                │            │
//!              └───────────────┴────────────────┴────────────┴──────────────────▶ Failed
//! ```
//!
//! Each flow runs as a single task inside [`Orchestrator::submit`] (or
//! [`Orchestrator::retry`]). Presentation code reads state through
//! [`Orchestrator::snapshot`] and steers the flow with
//! [`cancel`](Orchestrator::cancel) and [`dismiss`](Orchestrator::dismiss),
//! typically from another task:
//!
//! ```text
//! flow task ──writes──▶ Mutex<Inner> ◀──reads── snapshot() / formatted_text()
//! ```
//!
//! Every credit hold placed by a flow is committed on success or refunded on
//! any failure or cancellation before the flow leaves its last state.

pub mod config;
pub mod events;
pub mod snapshot;

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{Classification, ErrorCategory, classify, classify_message};
use crate::ledger::{CreditLedger, HoldToken, Tier};
use crate::normalize::{NormalizedUrl, normalize};
use crate::service::{
    JobStatus, PollResponse, SUBMIT_PATH, ServiceError, ServiceFuture, SubmitRequest,
    TranscriptionService, WireResponse, status_path,
};
use crate::timeline::{
    OperationStep, RequestInfo, StepRecord, Timeline, TimelineEntry, correlation_id,
    payload_digest,
};

pub use config::OrchestratorConfig;
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    OrchestratorEvent,
};
pub use snapshot::{OrchestratorResult, OrchestratorState, Snapshot};

use snapshot::progress_for;

// ── Public types ───────────────────────────────────────────────────

/// Identifiers of the flow currently in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowContext {
    pub flow_id: Uuid,
    pub job_id: Option<String>,
    pub tier: Tier,
    pub started_at: DateTime<Utc>,
}

/// How a call to [`Orchestrator::submit`] or [`Orchestrator::retry`] ended.
#[derive(Debug, Clone)]
pub enum Submission {
    /// The flow reached `Succeeded` or `Failed`.
    Finished(OrchestratorResult),
    /// The flow was cancelled and the orchestrator is idle again.
    Cancelled(Snapshot),
    /// Not started: another flow is active, or the command is not valid in
    /// the current state.
    Rejected(Snapshot),
}

impl Submission {
    pub fn result(&self) -> Option<&OrchestratorResult> {
        match self {
            Submission::Finished(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<OrchestratorResult> {
        match self {
            Submission::Finished(r) => Some(r),
            _ => None,
        }
    }
}

// ── Internal state ─────────────────────────────────────────────────

struct RetrySeed {
    url: NormalizedUrl,
    tier: Tier,
    retry_count: u32,
}

struct Inner {
    state: OrchestratorState,
    flow: Option<FlowContext>,
    cancel: Option<CancellationToken>,
    /// Timeline of the current flow, or of the last one once it ends.
    timeline: Option<Timeline>,
    polling_attempt: Option<u32>,
    last_error: Option<String>,
    result: Option<OrchestratorResult>,
    retry_seed: Option<RetrySeed>,
    auth_retries_left: u32,
}

/// State owned by the running flow task.
struct Flow {
    flow_id: Uuid,
    tier: Tier,
    cancel: CancellationToken,
    hold: Option<HoldToken>,
    url: Option<NormalizedUrl>,
    retry_count: u32,
}

impl Flow {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

enum Start<'a> {
    Fresh { raw: &'a str, tier: Tier },
    Retry,
}

/// Result of one remote call, from the flow's point of view.
enum Step<T> {
    Continue(T),
    Cancelled,
    Finished(OrchestratorResult),
}

// ── Orchestrator ───────────────────────────────────────────────────

/// Drives one transcription flow at a time against a
/// [`TranscriptionService`] and a shared [`CreditLedger`].
pub struct Orchestrator {
    service: Arc<dyn TranscriptionService>,
    ledger: Arc<CreditLedger>,
    config: OrchestratorConfig,
    handler: Arc<dyn EventHandler>,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn TranscriptionService>,
        ledger: Arc<CreditLedger>,
        config: OrchestratorConfig,
    ) -> Self {
        let auth_retries_left = config.auth_retry_budget;
        Self {
            service,
            ledger,
            config,
            handler: Arc::new(LoggingHandler),
            inner: Mutex::new(Inner {
                state: OrchestratorState::Idle,
                flow: None,
                cancel: None,
                timeline: None,
                polling_attempt: None,
                last_error: None,
                result: None,
                retry_seed: None,
                auth_retries_left,
            }),
        }
    }

    /// Replace the default [`LoggingHandler`].
    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn state(&self) -> OrchestratorState {
        self.lock().state
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        self.snapshot_locked(&inner)
    }

    fn snapshot_locked(&self, inner: &Inner) -> Snapshot {
        let max = self.config.max_polling_attempts;
        let timeline = inner
            .timeline
            .as_ref()
            .filter(|_| inner.state != OrchestratorState::Idle);
        Snapshot {
            state: inner.state,
            flow_id: timeline.map(|t| t.flow_id),
            job_id: timeline.and_then(|t| t.job_id.clone()),
            tier: timeline.map(|t| t.tier),
            url: timeline.map(|t| t.url.clone()),
            progress_percent: progress_for(inner.state, inner.polling_attempt, max),
            polling_attempt: inner.polling_attempt,
            max_polling_attempts: max,
            last_error: inner.last_error.clone(),
            result: inner.result.clone(),
        }
    }

    /// The flow currently in progress, if any.
    pub fn active_flow(&self) -> Option<FlowContext> {
        self.lock().flow.clone()
    }

    /// Timeline of the current or most recent flow.
    pub fn timeline(&self) -> Option<Timeline> {
        self.lock().timeline.clone()
    }

    /// Diagnostics block for the current or most recent flow.
    pub fn formatted_text(&self) -> String {
        let inner = self.lock();
        match &inner.timeline {
            Some(t) => t.formatted_text_with_state(&inner.state.to_string()),
            None => "No diagnostics recorded yet.\n".to_string(),
        }
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Run a new flow for `raw` to completion.
    ///
    /// Rejected unless the orchestrator is idle.
    pub async fn submit(&self, raw: &str, tier: Tier) -> Submission {
        match self.start(Start::Fresh { raw, tier }) {
            Ok(flow) => self.validate_and_run(flow, raw).await,
            Err(snapshot) => Submission::Rejected(snapshot),
        }
    }

    /// Start the last failed request again as a new flow.
    ///
    /// Only valid from `Failed` when the failure was retryable. The new flow
    /// gets a fresh id and timeline, reuses the normalized URL and tier, and
    /// places a new hold.
    pub async fn retry(&self) -> Submission {
        match self.start(Start::Retry) {
            Ok(flow) => self.rerun(flow).await,
            Err(snapshot) => Submission::Rejected(snapshot),
        }
    }

    /// Like [`submit`](Self::submit), but runs the flow on a new Tokio task.
    ///
    /// The idle check happens before this returns, so a busy orchestrator is
    /// reported as `Err` with the current snapshot.
    pub fn spawn_submit(
        self: &Arc<Self>,
        raw: impl Into<String>,
        tier: Tier,
    ) -> Result<JoinHandle<Submission>, Snapshot> {
        let raw = raw.into();
        let flow = self.start(Start::Fresh { raw: &raw, tier })?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.validate_and_run(flow, &raw).await }))
    }

    /// Like [`retry`](Self::retry), but runs the flow on a new Tokio task.
    pub fn spawn_retry(self: &Arc<Self>) -> Result<JoinHandle<Submission>, Snapshot> {
        let flow = self.start(Start::Retry)?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.rerun(flow).await }))
    }

    /// Request cancellation of the active flow.
    ///
    /// Takes effect at the flow's next suspension point: an in-flight call is
    /// allowed to finish, its result is discarded and the hold refunded.
    /// Returns `false` when no flow is in progress, or once the flow has
    /// started resolving and can no longer be stopped.
    pub fn cancel(&self) -> bool {
        let inner = self.lock();
        if !inner.state.can_cancel() {
            return false;
        }
        match &inner.cancel {
            Some(token) => {
                info!(state = %inner.state, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Acknowledge a terminal state and return to idle.
    pub fn dismiss(&self) -> bool {
        let (from, flow_id) = {
            let mut inner = self.lock();
            if !inner.state.is_terminal() {
                return false;
            }
            let from = inner.state;
            inner.state = OrchestratorState::Idle;
            inner.result = None;
            inner.polling_attempt = None;
            inner.retry_seed = None;
            (from, inner.timeline.as_ref().map(|t| t.flow_id))
        };
        if let Some(flow_id) = flow_id {
            self.handler.on_event(&OrchestratorEvent::StateChanged {
                flow_id,
                from,
                to: OrchestratorState::Idle,
            });
        }
        true
    }

    // ── Flow ───────────────────────────────────────────────────────

    fn start(&self, start: Start<'_>) -> Result<Flow, Snapshot> {
        let mut inner = self.lock();
        let (tier, url, reuse) = match start {
            Start::Fresh { raw, tier } => {
                if inner.state != OrchestratorState::Idle {
                    debug!(state = %inner.state, "Submit rejected: flow in progress");
                    return Err(self.snapshot_locked(&inner));
                }
                inner.auth_retries_left = self.config.auth_retry_budget;
                (tier, raw.trim().to_string(), None)
            }
            Start::Retry => {
                let retryable = inner
                    .result
                    .as_ref()
                    .is_some_and(OrchestratorResult::is_retryable);
                let seed = match inner.retry_seed.take() {
                    Some(seed) if inner.state == OrchestratorState::Failed && retryable => seed,
                    other => {
                        inner.retry_seed = other;
                        debug!(state = %inner.state, "Retry rejected");
                        return Err(self.snapshot_locked(&inner));
                    }
                };
                let url = seed.url.sanitized.clone();
                (seed.tier, url, Some((seed.url, seed.retry_count + 1)))
            }
        };

        let flow_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let from = inner.state;
        let ctx = FlowContext {
            flow_id,
            job_id: None,
            tier,
            started_at: Utc::now(),
        };
        inner.state = OrchestratorState::Validating;
        inner.flow = Some(ctx);
        inner.cancel = Some(cancel.clone());
        inner.timeline = Some(Timeline::new(flow_id, tier, url));
        inner.polling_attempt = None;
        inner.last_error = None;
        inner.result = None;
        drop(inner);

        info!(%flow_id, %tier, "Flow started");
        self.handler.on_event(&OrchestratorEvent::StateChanged {
            flow_id,
            from,
            to: OrchestratorState::Validating,
        });

        let (url, retry_count) = match reuse {
            Some((url, n)) => (Some(url), n),
            None => (None, 0),
        };
        Ok(Flow {
            flow_id,
            tier,
            cancel,
            hold: None,
            url,
            retry_count,
        })
    }

    async fn validate_and_run(&self, mut flow: Flow, raw: &str) -> Submission {
        let rec = StepRecord::begin(OperationStep::Validating)
            .expected("Supported TikTok or YouTube video link");
        let normalized = normalize(raw);
        if !normalized.is_valid {
            let reason = normalized
                .error_message
                .clone()
                .unwrap_or_else(|| "Invalid URL".to_string());
            self.record(
                &flow,
                rec.received(&reason)
                    .next_action("Correct the link and submit again")
                    .finish(),
            );
            let result = self.fail(&mut flow, reason, ErrorCategory::Validation.into());
            return Submission::Finished(result);
        }

        self.update(|inner| {
            if let Some(t) = inner.timeline.as_mut() {
                t.url = normalized.sanitized.clone();
            }
        });
        self.record(
            &flow,
            rec.received(&normalized.sanitized)
                .next_action("Reserve credit")
                .finish(),
        );
        flow.url = Some(normalized);
        self.run(flow).await
    }

    async fn rerun(&self, flow: Flow) -> Submission {
        if let Some(url) = &flow.url {
            self.record(
                &flow,
                StepRecord::begin(OperationStep::Validating)
                    .expected("Previously validated link")
                    .received(&url.sanitized)
                    .next_action("Reserve credit")
                    .finish(),
            );
        }
        self.run(flow).await
    }

    async fn run(&self, mut flow: Flow) -> Submission {
        if flow.is_cancelled() {
            return Submission::Cancelled(self.cancelled(&mut flow));
        }

        // Hold
        self.transition(&flow, OrchestratorState::HoldingCredit);
        let cost = self.ledger.pricing().cost(flow.tier);
        let rec = StepRecord::begin(OperationStep::HoldingCredit)
            .expected(format!("Reserve {cost} credit(s) or 1 free use for {}", flow.tier));
        match self.ledger.hold(flow.tier) {
            Ok(token) => {
                self.record(
                    &flow,
                    rec.received(format!(
                        "Hold #{} placed: {} from {:?}",
                        token.id, token.amount, token.source
                    ))
                    .next_action("Submit job")
                    .finish(),
                );
                flow.hold = Some(token);
            }
            Err(e) => {
                self.record(
                    &flow,
                    rec.received(e.to_string())
                        .next_action("Add credits or wait for free uses to reset")
                        .finish(),
                );
                let result = self.fail(&mut flow, e.to_string(), ErrorCategory::Payment.into());
                return Submission::Finished(result);
            }
        }
        if flow.is_cancelled() {
            return Submission::Cancelled(self.cancelled(&mut flow));
        }

        // Submit
        self.transition(&flow, OrchestratorState::Submitting);
        let job_id = match self.submit_job(&mut flow).await {
            Step::Continue(job_id) => job_id,
            Step::Cancelled => return Submission::Cancelled(self.cancelled(&mut flow)),
            Step::Finished(result) => return Submission::Finished(result),
        };

        // Poll
        self.transition(&flow, OrchestratorState::Polling);
        match self.poll_until_done(&mut flow, &job_id).await {
            Step::Continue(never) => match never {},
            Step::Cancelled => Submission::Cancelled(self.cancelled(&mut flow)),
            Step::Finished(result) => Submission::Finished(result),
        }
    }

    async fn submit_job(&self, flow: &mut Flow) -> Step<String> {
        let url = flow
            .url
            .as_ref()
            .map(|u| u.sanitized.clone())
            .unwrap_or_default();
        let request = SubmitRequest {
            url,
            tier: flow.tier,
            client_request_id: flow.flow_id.to_string(),
        };
        let digest = serde_json::to_vec(&request)
            .map(|payload| format!("sha256:{}", payload_digest(&payload)))
            .unwrap_or_else(|e| format!("unavailable ({e})"));
        let mut reissues = 0;

        loop {
            let rec = StepRecord::begin(OperationStep::Submitting)
                .expected(&digest)
                .request(RequestInfo::new("POST", SUBMIT_PATH).with_payload_digest(&digest))
                .correlation_id(correlation_id(&flow.flow_id, "submit"))
                .retry_count(flow.retry_count + reissues);
            let outcome = self.call(self.service.submit(&request)).await;
            let rec = with_response(rec, &outcome);
            let received = describe(&outcome);

            if flow.is_cancelled() {
                self.record(
                    flow,
                    rec.received(&received)
                        .next_action("Discard response: cancelled")
                        .finish(),
                );
                return Step::Cancelled;
            }

            match outcome {
                Ok(accepted) if accepted.job_id.trim().is_empty() => {
                    self.record(
                        flow,
                        rec.received(&received)
                            .next_action("Refund credit")
                            .finish(),
                    );
                    let result = self.fail(
                        flow,
                        "Service accepted the job without a job id".into(),
                        ErrorCategory::Api.into(),
                    );
                    return Step::Finished(result);
                }
                Ok(accepted) => {
                    self.record(
                        flow,
                        rec.received(&received)
                            .next_action(format!(
                                "Poll status every {}ms, up to {} times",
                                self.config.poll_interval.as_millis(),
                                self.config.max_polling_attempts
                            ))
                            .finish(),
                    );
                    let job_id = accepted.job_id;
                    info!(flow_id = %flow.flow_id, %job_id, "Job accepted");
                    self.update(|inner| {
                        if let Some(t) = inner.timeline.as_mut() {
                            t.set_job_id(job_id.clone());
                        }
                        if let Some(ctx) = inner.flow.as_mut() {
                            ctx.job_id = Some(job_id.clone());
                        }
                    });
                    return Step::Continue(job_id);
                }
                Err(e) => {
                    let c = classify(&e);
                    warn!(flow_id = %flow.flow_id, category = %c.category, "Submit failed: {e}");
                    if c.category == ErrorCategory::Authentication && self.take_auth_retry() {
                        self.record(
                            flow,
                            rec.received(e.to_string())
                                .next_action("Re-submit once with refreshed credentials")
                                .finish(),
                        );
                        reissues += 1;
                        continue;
                    }
                    let c = self.settle(c);
                    self.record(
                        flow,
                        rec.received(e.to_string())
                            .next_action(next_action_for(c))
                            .finish(),
                    );
                    let result = self.fail(flow, format!("Submit failed: {e}"), c);
                    return Step::Finished(result);
                }
            }
        }
    }

    async fn poll_until_done(&self, flow: &mut Flow, job_id: &str) -> Step<std::convert::Infallible> {
        let max = self.config.max_polling_attempts;

        for attempt in 1..=max {
            tokio::select! {
                _ = flow.cancel.cancelled() => return Step::Cancelled,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            self.update(|inner| inner.polling_attempt = Some(attempt));
            debug!(flow_id = %flow.flow_id, %job_id, attempt, max, "Polling");

            let rec = StepRecord::begin(OperationStep::Polling)
                .expected(format!("Status of job {job_id}"))
                .request(RequestInfo::new("GET", status_path(job_id)))
                .correlation_id(correlation_id(&flow.flow_id, &format!("poll{attempt}")))
                .polling(attempt, max);
            let outcome = self.call(self.service.poll_status(job_id)).await;
            let rec = with_response(rec, &outcome);
            let received = describe(&outcome);

            if flow.is_cancelled() {
                self.record(
                    flow,
                    rec.received(&received)
                        .next_action("Discard response: cancelled")
                        .finish(),
                );
                return Step::Cancelled;
            }

            let again = if attempt < max {
                "Wait and poll again"
            } else {
                "Give up: polling limit reached"
            };

            match outcome {
                Ok(resp) => {
                    match resp.job_status() {
                        JobStatus::Pending => {
                            self.record(flow, rec.received(received).next_action(again).finish());
                        }
                        JobStatus::Completed => {
                            let transcript = resp
                                .transcript
                                .clone()
                                .filter(|t| !t.trim().is_empty());
                            let Some(transcript) = transcript else {
                                self.record(
                                    flow,
                                    rec.received(received).next_action("Refund credit").finish(),
                                );
                                let result = self.fail(
                                    flow,
                                    "Service reported completion without a transcript".into(),
                                    ErrorCategory::Api.into(),
                                );
                                return Step::Finished(result);
                            };
                            self.record(
                                flow,
                                rec.received(received)
                                    .next_action("Commit credit and deliver transcript")
                                    .finish(),
                            );
                            if !self.begin_resolving(flow) {
                                return Step::Cancelled;
                            }
                            return Step::Finished(self.succeed(flow, resp, transcript));
                        }
                        JobStatus::Failed => {
                            let reason = resp
                                .error_message
                                .clone()
                                .filter(|m| !m.trim().is_empty())
                                .unwrap_or_else(|| "Transcription failed on the server".into());
                            let c = self.settle(classify_message(&reason));
                            self.record(
                                flow,
                                rec.received(received).next_action("Refund credit").finish(),
                            );
                            return Step::Finished(self.fail(flow, reason, c));
                        }
                    }
                }
                Err(e) => {
                    let c = classify(&e);
                    warn!(
                        flow_id = %flow.flow_id,
                        attempt,
                        category = %c.category,
                        "Poll failed: {e}"
                    );
                    let keep_polling = if c.category == ErrorCategory::Authentication {
                        self.take_auth_retry()
                    } else {
                        c.retryable
                    };
                    if keep_polling {
                        self.record(flow, rec.received(e.to_string()).next_action(again).finish());
                        continue;
                    }
                    let c = self.settle(c);
                    self.record(
                        flow,
                        rec.received(e.to_string())
                            .next_action(next_action_for(c))
                            .finish(),
                    );
                    return Step::Finished(self.fail(flow, format!("Status check failed: {e}"), c));
                }
            }
        }

        let result = self.fail(
            flow,
            format!("Transcription did not complete after {max} polling attempts"),
            ErrorCategory::Timeout.into(),
        );
        Step::Finished(result)
    }

    async fn call<T>(&self, fut: ServiceFuture<'_, T>) -> Result<T, ServiceError> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ServiceError::Timeout(timeout)),
        }
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// Move to `Resolving` unless a cancel already landed.
    ///
    /// The token check and the state change happen under one lock, and the
    /// token is detached so later [`cancel`](Self::cancel) calls are refused.
    fn begin_resolving(&self, flow: &Flow) -> bool {
        let from = {
            let mut inner = self.lock();
            if flow.is_cancelled() {
                return false;
            }
            inner.cancel = None;
            std::mem::replace(&mut inner.state, OrchestratorState::Resolving)
        };
        debug!(flow_id = %flow.flow_id, "State {from} -> {}", OrchestratorState::Resolving);
        self.handler.on_event(&OrchestratorEvent::StateChanged {
            flow_id: flow.flow_id,
            from,
            to: OrchestratorState::Resolving,
        });
        true
    }

    /// Commit the hold and move to `Succeeded`. Call after
    /// [`begin_resolving`](Self::begin_resolving).
    fn succeed(&self, flow: &mut Flow, resp: PollResponse, transcript: String) -> OrchestratorResult {
        let rec = StepRecord::begin(OperationStep::Resolving).expected("Commit credit hold");
        let received = match flow.hold.take() {
            Some(hold) if self.ledger.commit(&hold) => {
                format!("Hold #{} committed: {} spent", hold.id, hold.amount)
            }
            Some(hold) => format!("Hold #{} was already resolved", hold.id),
            None => "No hold to commit".to_string(),
        };
        self.record(flow, rec.received(received).next_action("Deliver transcript").finish());

        self.record(
            flow,
            StepRecord::begin(OperationStep::Done)
                .received(format!(
                    "Transcript: {} chars, language {}",
                    transcript.chars().count(),
                    resp.language.as_deref().unwrap_or("unknown")
                ))
                .next_action("None")
                .finish(),
        );

        let result = OrchestratorResult::Success {
            transcript,
            confidence: resp.confidence,
            language: resp.language,
            duration_seconds: resp.duration_seconds,
        };
        self.conclude(flow, OrchestratorState::Succeeded, &result, None);
        result
    }

    /// Refund any hold and move to `Failed`.
    fn fail(&self, flow: &mut Flow, reason: String, c: Classification) -> OrchestratorResult {
        let reason = if reason.trim().is_empty() {
            format!("{} error", c.category)
        } else {
            reason
        };

        if let Some(hold) = flow.hold.take() {
            let rec = StepRecord::begin(OperationStep::Resolving)
                .expected(format!("Refund hold #{}", hold.id));
            let received = if self.ledger.refund(&hold) {
                format!("Hold #{} refunded: {} returned", hold.id, hold.amount)
            } else {
                format!("Hold #{} was already resolved", hold.id)
            };
            self.record(
                flow,
                rec.received(received)
                    .next_action(next_action_for(c))
                    .finish(),
            );
        }

        let result = OrchestratorResult::Failure {
            reason,
            error_category: c.category,
            retryable: c.retryable,
            log_id: Some(flow.flow_id.to_string()),
        };
        let seed = match (&flow.url, c.retryable) {
            (Some(url), true) => Some(RetrySeed {
                url: url.clone(),
                tier: flow.tier,
                retry_count: flow.retry_count,
            }),
            _ => None,
        };
        self.conclude(flow, OrchestratorState::Failed, &result, seed);
        result
    }

    fn conclude(
        &self,
        flow: &Flow,
        to: OrchestratorState,
        result: &OrchestratorResult,
        seed: Option<RetrySeed>,
    ) {
        let from = {
            let mut inner = self.lock();
            let from = inner.state;
            inner.state = to;
            inner.flow = None;
            inner.cancel = None;
            inner.last_error = result.reason().map(str::to_string);
            inner.result = Some(result.clone());
            inner.retry_seed = seed;
            from
        };
        self.handler.on_event(&OrchestratorEvent::StateChanged {
            flow_id: flow.flow_id,
            from,
            to,
        });
        self.handler.on_event(&OrchestratorEvent::Finished {
            flow_id: flow.flow_id,
            result,
        });
    }

    /// Refund any hold, discard the flow and return to idle.
    fn cancelled(&self, flow: &mut Flow) -> Snapshot {
        let rec = StepRecord::begin(OperationStep::Resolving).expected("Release credit after cancel");
        let received = match flow.hold.take() {
            Some(hold) => {
                self.ledger.refund(&hold);
                format!("Hold #{} refunded: {} returned", hold.id, hold.amount)
            }
            None => "No hold to release".to_string(),
        };
        self.record(
            flow,
            rec.received(received)
                .next_action("None: cancelled by user")
                .finish(),
        );

        let (from, snapshot) = {
            let mut inner = self.lock();
            let from = inner.state;
            inner.state = OrchestratorState::Idle;
            inner.flow = None;
            inner.cancel = None;
            inner.polling_attempt = None;
            inner.result = None;
            inner.retry_seed = None;
            (from, self.snapshot_locked(&inner))
        };
        self.handler.on_event(&OrchestratorEvent::StateChanged {
            flow_id: flow.flow_id,
            from,
            to: OrchestratorState::Idle,
        });
        self.handler.on_event(&OrchestratorEvent::Cancelled {
            flow_id: flow.flow_id,
        });
        snapshot
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn update(&self, f: impl FnOnce(&mut Inner)) {
        f(&mut self.lock());
    }

    fn transition(&self, flow: &Flow, to: OrchestratorState) {
        let from = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.state, to)
        };
        debug!(flow_id = %flow.flow_id, "State {from} -> {to}");
        self.handler.on_event(&OrchestratorEvent::StateChanged {
            flow_id: flow.flow_id,
            from,
            to,
        });
    }

    fn record(&self, flow: &Flow, mut entry: TimelineEntry) {
        entry.retry_count = entry.retry_count.max(flow.retry_count);
        self.update(|inner| {
            if let Some(t) = inner.timeline.as_mut() {
                t.append(entry.clone());
            }
        });
        self.handler.on_event(&OrchestratorEvent::TimelineAppended {
            flow_id: flow.flow_id,
            entry: &entry,
        });
    }

    /// Consume one silent authentication retry, if any remain.
    fn take_auth_retry(&self) -> bool {
        let mut inner = self.lock();
        if inner.auth_retries_left == 0 {
            return false;
        }
        inner.auth_retries_left -= 1;
        true
    }

    /// Authentication failures stop being retryable once the budget is spent.
    fn settle(&self, c: Classification) -> Classification {
        if c.category == ErrorCategory::Authentication && self.lock().auth_retries_left == 0 {
            Classification {
                retryable: false,
                ..c
            }
        } else {
            c
        }
    }
}

fn next_action_for(c: Classification) -> &'static str {
    match (c.category, c.retryable) {
        (ErrorCategory::Payment, _) => "Add credits, then submit again",
        (ErrorCategory::Validation, _) => "Correct the link and submit again",
        (ErrorCategory::Authentication, false) => "Sign in again",
        (_, true) => "Retry available",
        (_, false) => "Copy diagnostics and report the problem",
    }
}

/// Render a call outcome for the `received` annotation.
///
/// Prefers the body as it arrived on the wire; values from transports
/// without one are re-serialized.
fn describe<T: WireResponse>(outcome: &Result<T, ServiceError>) -> String {
    match outcome {
        Ok(value) => match value.raw() {
            Some(raw) => raw.body.clone(),
            None => serde_json::to_string(value)
                .unwrap_or_else(|e| format!("<unserializable: {e}>")),
        },
        Err(e) => format!("error: {e}"),
    }
}

/// Attach the service's answer to a remote-call entry. Transport failures
/// and timeouts leave the response empty.
fn with_response<T: WireResponse>(rec: StepRecord, outcome: &Result<T, ServiceError>) -> StepRecord {
    match outcome {
        Ok(value) => {
            let status = value.raw().map(|r| r.status);
            rec.response(status, describe(outcome))
        }
        Err(ServiceError::Status { status, body }) => rec.response(Some(*status), body),
        Err(ServiceError::Decode(msg)) => rec.response(None, format!("undecodable: {msg}")),
        Err(ServiceError::Transport(_) | ServiceError::Timeout(_)) => rec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{JobAccepted, RawResponse};

    #[test]
    fn next_actions_follow_category() {
        assert_eq!(
            next_action_for(ErrorCategory::Network.into()),
            "Retry available"
        );
        assert_eq!(
            next_action_for(ErrorCategory::Payment.into()),
            "Add credits, then submit again"
        );
        let locked_out = Classification {
            category: ErrorCategory::Authentication,
            retryable: false,
        };
        assert_eq!(next_action_for(locked_out), "Sign in again");
    }

    #[test]
    fn describe_renders_errors_and_values() {
        let ok: Result<JobAccepted, ServiceError> = Ok(JobAccepted::new("j-9"));
        assert_eq!(describe(&ok), r#"{"jobId":"j-9"}"#);
        let err: Result<JobAccepted, ServiceError> =
            Err(ServiceError::Transport("connection refused".into()));
        assert_eq!(describe(&err), "error: request failed: connection refused");
    }

    #[test]
    fn describe_prefers_the_raw_body() {
        let mut accepted = JobAccepted::new("j-9");
        accepted.raw = Some(RawResponse {
            status: 202,
            body: r#"{"jobId":"j-9","queuePosition":4}"#.into(),
        });
        let ok: Result<JobAccepted, ServiceError> = Ok(accepted);
        assert_eq!(describe(&ok), r#"{"jobId":"j-9","queuePosition":4}"#);
    }

    #[test]
    fn responses_are_attached_only_when_the_service_answered() {
        let begin = || StepRecord::begin(OperationStep::Polling);

        let timed_out: Result<PollResponse, ServiceError> =
            Err(ServiceError::Timeout(std::time::Duration::from_millis(10)));
        assert!(with_response(begin(), &timed_out).finish().response.is_none());

        let refused: Result<PollResponse, ServiceError> =
            Err(ServiceError::Transport("connection refused".into()));
        assert!(with_response(begin(), &refused).finish().response.is_none());

        let rejected: Result<PollResponse, ServiceError> = Err(ServiceError::Status {
            status: 503,
            body: "maintenance".into(),
        });
        let entry = with_response(begin(), &rejected).finish();
        let resp = entry.response.unwrap();
        assert_eq!(resp.status_code, Some(503));
        assert_eq!(resp.body, "maintenance");

        let pending: Result<PollResponse, ServiceError> = Ok(PollResponse::with_status("pending"));
        let entry = with_response(begin(), &pending).finish();
        assert_eq!(entry.response.unwrap().status_code, None);
    }
}
