//! Transcription request orchestration for short-form video links.
//!
//! `clipscribe` takes a user-supplied TikTok or YouTube link, validates and
//! canonicalizes it, reserves credit, submits it to a remote transcription
//! service, polls the job to completion and reports a success or failure
//! outcome together with a diagnostic timeline of every step.
//!
//! # Getting started
//!
//! ```ignore
//! use clipscribe::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let service = HttpTranscriptionService::new(
//!         HttpServiceConfig::default().with_base_url("https://api.example.com"),
//!     )?;
//!     let ledger = Arc::new(CreditLedger::new(3, 10));
//!     let orchestrator = Orchestrator::new(Arc::new(service), ledger, OrchestratorConfig::default());
//!
//!     match orchestrator.submit("https://youtu.be/dQw4w9WgXcQ", Tier::QuickScan).await {
//!         Submission::Finished(OrchestratorResult::Success { transcript, .. }) => {
//!             println!("{transcript}");
//!         }
//!         other => eprintln!("{other:?}\n{}", orchestrator.formatted_text()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Validate a link without side effects:** [`normalize::normalize`].
//! - **Free uses, credits and holds:** [`ledger::CreditLedger`].
//! - **Why a call failed and whether to retry:** [`classify::classify`].
//! - **Bug-report text:** [`timeline::Timeline::formatted_text`], or
//!   [`Orchestrator::formatted_text`](orchestrator::Orchestrator::formatted_text)
//!   for the current flow.
//! - **Talk to a different backend:** implement
//!   [`TranscriptionService`](service::TranscriptionService).
//! - **Observe progress:** implement
//!   [`EventHandler`](orchestrator::EventHandler) or poll
//!   [`Orchestrator::snapshot`](orchestrator::Orchestrator::snapshot).

pub mod classify;
pub mod ledger;
pub mod normalize;
pub mod orchestrator;
pub mod prelude;
pub mod service;
pub mod timeline;

/// Service root used when none is configured.
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8787";

/// Environment variable holding the service bearer token.
pub const TOKEN_ENV_VAR: &str = "CLIPSCRIBE_TOKEN";

pub use classify::{Classification, ErrorCategory};
pub use ledger::{CreditAccount, CreditLedger, HoldToken, LedgerError, Tier, TierPricing};
pub use normalize::{NormalizedUrl, normalize};
pub use orchestrator::{
    FlowContext, Orchestrator, OrchestratorConfig, OrchestratorResult, OrchestratorState,
    Snapshot, Submission,
};
pub use service::{ServiceError, TranscriptionService};
pub use timeline::{OperationStep, Timeline, TimelineEntry};
pub use uuid::Uuid;
