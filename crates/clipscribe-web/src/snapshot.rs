//! Serializable view of the orchestrator for REST and WebSocket transport.

use clipscribe::{Orchestrator, Snapshot};
use serde::Serialize;

/// [`Snapshot`] plus the derived fields a presentation layer needs to decide
/// which text and actions to show.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub status_line: String,
    pub can_cancel: bool,
    pub can_retry: bool,
}

impl StateView {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            status_line: snapshot.status_line(),
            can_cancel: snapshot.state.can_cancel(),
            can_retry: snapshot.can_retry(),
            snapshot,
        }
    }

    pub fn from_orchestrator(orchestrator: &Orchestrator) -> Self {
        Self::from_snapshot(orchestrator.snapshot())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipscribe::OrchestratorState;

    #[test]
    fn idle_view_flattens_snapshot_fields() {
        let view = StateView::from_snapshot(Snapshot {
            state: OrchestratorState::Idle,
            flow_id: None,
            job_id: None,
            tier: None,
            url: None,
            progress_percent: None,
            polling_attempt: None,
            max_polling_attempts: 20,
            last_error: None,
            result: None,
        });
        let json = view.to_json();
        assert_eq!(json["state"], "IDLE");
        assert_eq!(json["statusLine"], "Ready");
        assert_eq!(json["maxPollingAttempts"], 20);
        assert_eq!(json["canCancel"], false);
        assert_eq!(json["canRetry"], false);
    }
}
