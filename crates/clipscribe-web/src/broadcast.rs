//! [`EventHandler`] that converts orchestrator events into WebSocket messages.

use clipscribe::orchestrator::{EventHandler, OrchestratorEvent};
use clipscribe::{OrchestratorResult, OrchestratorState, TimelineEntry};
use serde::Serialize;
use tokio::sync::broadcast;

/// A message sent from the server to WebSocket clients.
///
/// Discriminated on the `type` field when serialized to JSON.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Full [`StateView`](crate::StateView), sent on connect and after lag.
    Snapshot { data: serde_json::Value },
    /// State machine transition.
    State {
        flow_id: String,
        from: OrchestratorState,
        to: OrchestratorState,
    },
    /// A diagnostic timeline entry was recorded.
    Timeline {
        flow_id: String,
        entry: TimelineEntry,
    },
    /// The flow reached a terminal state.
    Finished {
        flow_id: String,
        result: OrchestratorResult,
    },
    /// The flow was cancelled.
    Cancelled { flow_id: String },
}

/// Broadcasts orchestrator events to all connected WebSocket clients.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(WebBroadcastHandler::new(ws_tx.clone()));
/// ```
pub struct WebBroadcastHandler {
    sender: broadcast::Sender<WsMessage>,
}

impl WebBroadcastHandler {
    pub fn new(sender: broadcast::Sender<WsMessage>) -> Self {
        Self { sender }
    }

    /// No subscribers is fine; send errors are ignored.
    fn broadcast(&self, msg: WsMessage) {
        let _ = self.sender.send(msg);
    }
}

impl EventHandler for WebBroadcastHandler {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        let msg = match event {
            OrchestratorEvent::StateChanged { flow_id, from, to } => WsMessage::State {
                flow_id: flow_id.to_string(),
                from: *from,
                to: *to,
            },
            OrchestratorEvent::TimelineAppended { flow_id, entry } => WsMessage::Timeline {
                flow_id: flow_id.to_string(),
                entry: (*entry).clone(),
            },
            OrchestratorEvent::Finished { flow_id, result } => WsMessage::Finished {
                flow_id: flow_id.to_string(),
                result: (*result).clone(),
            },
            OrchestratorEvent::Cancelled { flow_id } => WsMessage::Cancelled {
                flow_id: flow_id.to_string(),
            },
        };
        self.broadcast(msg);
    }
}
