//! HTTP control surface for a clipscribe [`Orchestrator`].
//!
//! `clipscribe-web` exposes the orchestrator's snapshot, commands and
//! diagnostics export over a small REST API, plus a WebSocket feed of live
//! orchestrator events for presentation layers that render progress.
//!
//! # Quick start
//!
//! ```ignore
//! use clipscribe::prelude::*;
//! use clipscribe_web::{WebBroadcastHandler, WebConfig, WsMessage, spawn_web};
//! use std::sync::Arc;
//!
//! let (ws_tx, _) = tokio::sync::broadcast::channel::<WsMessage>(256);
//! let orchestrator = Arc::new(
//!     Orchestrator::new(service, ledger, OrchestratorConfig::default())
//!         .with_event_handler(WebBroadcastHandler::new(ws_tx.clone())),
//! );
//! let addr = spawn_web(orchestrator, ws_tx, WebConfig::default()).await?;
//! println!("Control surface: http://{addr}");
//! ```
//!
//! # Routes
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/api/state` | [`StateView`] JSON |
//! | `GET` | `/api/ledger` | credit account JSON |
//! | `GET` | `/api/diagnostics` | formatted timeline, `text/plain` |
//! | `POST` | `/api/submit` | `202` with [`StateView`], `409` when busy |
//! | `POST` | `/api/control` | `204`, or `409` when the action is not valid now |
//! | `GET` | `/ws` | snapshot on connect, then [`WsMessage`] updates |

mod api;
pub mod broadcast;
mod server;
pub mod snapshot;
mod ws;

pub use broadcast::{WebBroadcastHandler, WsMessage};
pub use snapshot::StateView;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clipscribe::Orchestrator;

/// Configuration for the web server.
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// Directory of static frontend files to serve at `/`, if any.
    pub static_dir: Option<PathBuf>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            static_dir: None,
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// `broadcast_tx` must be the sender given to the orchestrator's
/// [`WebBroadcastHandler`]; WebSocket clients subscribe to it.
pub async fn spawn_web(
    orchestrator: Arc<Orchestrator>,
    broadcast_tx: tokio::sync::broadcast::Sender<WsMessage>,
    config: WebConfig,
) -> std::io::Result<SocketAddr> {
    let router = server::build_router(orchestrator, broadcast_tx, config.static_dir);
    server::start_server(router, config.bind_addr).await
}
