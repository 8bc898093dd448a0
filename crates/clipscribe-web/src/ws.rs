//! WebSocket upgrade handler and message dispatch.
//!
//! Each connected client receives:
//! 1. A full [`StateView`] on connect.
//! 2. Incremental [`WsMessage`] updates as orchestrator events fire.
//!
//! Clients can send the same commands as `POST /api/submit` and
//! `POST /api/control` as JSON messages.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use clipscribe::{Orchestrator, Tier};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::broadcast::WsMessage;
use crate::snapshot::StateView;

/// Shared state for WebSocket handlers.
#[derive(Clone)]
pub struct WsState {
    pub orchestrator: Arc<Orchestrator>,
    pub broadcast_tx: broadcast::Sender<WsMessage>,
}

/// GET /ws: WebSocket upgrade handler.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ws_state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ws_state))
}

fn snapshot_message(orchestrator: &Orchestrator) -> WsMessage {
    WsMessage::Snapshot {
        data: StateView::from_orchestrator(orchestrator).to_json(),
    }
}

async fn handle_socket(socket: WebSocket, ws_state: WsState) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before the snapshot so no event falls between the two.
    let mut broadcast_rx = ws_state.broadcast_tx.subscribe();

    if ws_send(&mut sink, &snapshot_message(&ws_state.orchestrator))
        .await
        .is_err()
    {
        return;
    }
    debug!("WebSocket client connected");

    let orchestrator = ws_state.orchestrator.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(msg) => {
                    if ws_send(&mut sink, &msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged by {n} messages, resending snapshot");
                    if ws_send(&mut sink, &snapshot_message(&orchestrator))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_client_message(&text, &ws_state),
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!("WebSocket client disconnected");
    forward_task.abort();
}

/// Process a JSON command received from a client.
///
/// A refused command is answered with a fresh snapshot so the client can
/// see why.
fn handle_client_message(text: &str, ws_state: &WsState) {
    #[derive(serde::Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum ClientMessage {
        Submit {
            url: String,
            #[serde(default)]
            tier: Option<Tier>,
        },
        Cancel,
        Retry,
        Dismiss,
    }

    let Ok(msg) = serde_json::from_str::<ClientMessage>(text) else {
        debug!("Ignoring malformed WebSocket message");
        return;
    };

    let orchestrator = &ws_state.orchestrator;
    let accepted = match msg {
        ClientMessage::Submit { url, tier } => orchestrator
            .spawn_submit(url, tier.unwrap_or(Tier::QuickScan))
            .is_ok(),
        ClientMessage::Cancel => orchestrator.cancel(),
        ClientMessage::Retry => orchestrator.spawn_retry().is_ok(),
        ClientMessage::Dismiss => orchestrator.dismiss(),
    };

    if !accepted {
        let _ = ws_state.broadcast_tx.send(snapshot_message(orchestrator));
    }
}

/// Serialize a `WsMessage` and send it over the WebSocket sink.
async fn ws_send(sink: &mut SplitSink<WebSocket, Message>, msg: &WsMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).unwrap_or_default();
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
