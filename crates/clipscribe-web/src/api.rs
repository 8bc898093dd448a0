//! REST API endpoint handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use clipscribe::{CreditAccount, Orchestrator, Tier};
use serde::Deserialize;
use tracing::debug;

use crate::snapshot::StateView;

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// GET /api/state: Current orchestrator snapshot.
pub async fn get_state(State(app): State<AppState>) -> Json<StateView> {
    Json(StateView::from_orchestrator(&app.orchestrator))
}

/// GET /api/ledger: Free uses, credits and held amount.
pub async fn get_ledger(State(app): State<AppState>) -> Json<CreditAccount> {
    Json(app.orchestrator.ledger().account())
}

/// GET /api/diagnostics: Copyable diagnostic report for the current or
/// most recent flow.
pub async fn get_diagnostics(State(app): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        app.orchestrator.formatted_text(),
    )
}

/// Request body for POST /api/submit.
#[derive(Deserialize)]
pub struct SubmitBody {
    pub url: String,
    #[serde(default = "default_tier")]
    pub tier: Tier,
}

fn default_tier() -> Tier {
    Tier::QuickScan
}

/// POST /api/submit: Start a flow in the background.
///
/// Returns 202 with the new state, or 409 with the current state when a flow
/// is already active or awaiting dismissal.
pub async fn post_submit(
    State(app): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> (StatusCode, Json<StateView>) {
    match app.orchestrator.spawn_submit(body.url, body.tier) {
        Ok(_) => (
            StatusCode::ACCEPTED,
            Json(StateView::from_orchestrator(&app.orchestrator)),
        ),
        Err(snapshot) => {
            debug!(state = %snapshot.state, "Submit refused");
            (StatusCode::CONFLICT, Json(StateView::from_snapshot(snapshot)))
        }
    }
}

/// Request body for POST /api/control.
#[derive(Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
}

/// Available control actions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Cancel the active flow.
    Cancel,
    /// Start a new flow for the last retryable failure.
    Retry,
    /// Acknowledge a finished flow.
    Dismiss,
}

/// POST /api/control: Flow commands.
///
/// Returns 204 when the command was accepted, 409 when it is not valid in
/// the current state.
pub async fn post_control(
    State(app): State<AppState>,
    Json(body): Json<ControlRequest>,
) -> StatusCode {
    let accepted = match body.action {
        ControlAction::Cancel => app.orchestrator.cancel(),
        ControlAction::Retry => app.orchestrator.spawn_retry().is_ok(),
        ControlAction::Dismiss => app.orchestrator.dismiss(),
    };
    debug!(action = ?body.action, accepted, "Control command");
    if accepted {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CONFLICT
    }
}
