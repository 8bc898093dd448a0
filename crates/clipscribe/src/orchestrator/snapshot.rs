//! Read-only state handed to the presentation layer.

use serde::Serialize;
use uuid::Uuid;

use crate::classify::ErrorCategory;
use crate::ledger::Tier;

/// Orchestrator state machine.
///
/// `Idle → Validating → HoldingCredit → Submitting → Polling → Resolving →
/// {Succeeded | Failed}`. Validation and payment failures jump straight to
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Idle,
    Validating,
    HoldingCredit,
    Submitting,
    Polling,
    Resolving,
    Succeeded,
    Failed,
}

impl OrchestratorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// A flow is in progress and may still be cancelled. Once resolving
    /// starts the outcome is committed.
    pub fn can_cancel(self) -> bool {
        !self.is_terminal() && !matches!(self, Self::Idle | Self::Resolving)
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Validating => "VALIDATING",
            Self::HoldingCredit => "HOLDING_CREDIT",
            Self::Submitting => "SUBMITTING",
            Self::Polling => "POLLING",
            Self::Resolving => "RESOLVING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Final outcome of a flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OrchestratorResult {
    Success {
        transcript: String,
        confidence: Option<f64>,
        language: Option<String>,
        duration_seconds: Option<f64>,
    },
    Failure {
        reason: String,
        error_category: ErrorCategory,
        retryable: bool,
        /// Flow id of the diagnostic timeline describing the failure.
        log_id: Option<String>,
    },
}

impl OrchestratorResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failure { retryable: true, .. })
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Failure { error_category, .. } => Some(*error_category),
            Self::Success { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failure { reason, .. } => Some(reason),
            Self::Success { .. } => None,
        }
    }
}

/// Point-in-time view of an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub state: OrchestratorState,
    pub flow_id: Option<Uuid>,
    pub job_id: Option<String>,
    pub tier: Option<Tier>,
    pub url: Option<String>,
    pub progress_percent: Option<u8>,
    pub polling_attempt: Option<u32>,
    pub max_polling_attempts: u32,
    /// Reason of the most recent failure, kept until the next flow starts.
    pub last_error: Option<String>,
    /// Outcome of the current flow once terminal.
    pub result: Option<OrchestratorResult>,
}

impl Snapshot {
    pub fn can_retry(&self) -> bool {
        self.state == OrchestratorState::Failed
            && self.result.as_ref().is_some_and(OrchestratorResult::is_retryable)
    }

    /// Human-readable description of the current operation.
    pub fn status_line(&self) -> String {
        match self.state {
            OrchestratorState::Idle => "Ready".into(),
            OrchestratorState::Validating => "Validating URL...".into(),
            OrchestratorState::HoldingCredit => "Reserving credit...".into(),
            OrchestratorState::Submitting => "Submitting to transcription service...".into(),
            OrchestratorState::Polling => match self.polling_attempt {
                Some(n) => format!(
                    "Polling for completion ({n}/{})...",
                    self.max_polling_attempts
                ),
                None => "Waiting for transcription to start...".into(),
            },
            OrchestratorState::Resolving => "Finalizing...".into(),
            OrchestratorState::Succeeded => "Transcription complete".into(),
            OrchestratorState::Failed => format!(
                "Failed: {}",
                self.last_error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Progress for a state, with polling progress spread across 20..90.
pub(crate) fn progress_for(state: OrchestratorState, attempt: Option<u32>, max: u32) -> Option<u8> {
    let pct = match state {
        OrchestratorState::Idle | OrchestratorState::Failed => return None,
        OrchestratorState::Validating => 5,
        OrchestratorState::HoldingCredit => 10,
        OrchestratorState::Submitting => 20,
        OrchestratorState::Polling => {
            let n = attempt.unwrap_or(0).min(max);
            20 + (70 * n / max.max(1)) as u8
        }
        OrchestratorState::Resolving => 95,
        OrchestratorState::Succeeded => 100,
    };
    Some(pct)
}
