//! Convenience re-exports for common `clipscribe` types.
//!
//! ```ignore
//! use clipscribe::prelude::*;
//! ```

// ── Orchestration ───────────────────────────────────────────────────
pub use crate::orchestrator::{
    CompositeEventHandler, EventHandler, FlowContext, FnEventHandler, LoggingHandler, NoopHandler,
    Orchestrator, OrchestratorConfig, OrchestratorEvent, OrchestratorResult, OrchestratorState,
    Snapshot, Submission,
};

// ── Building blocks ─────────────────────────────────────────────────
pub use crate::classify::{Classification, ErrorCategory, classify, classify_message};
pub use crate::ledger::{CreditAccount, CreditLedger, LedgerError, Tier, TierPricing};
pub use crate::normalize::{NormalizedUrl, normalize};
pub use crate::timeline::{OperationStep, RequestInfo, ResponseInfo, Timeline, TimelineEntry};

// ── Remote service ──────────────────────────────────────────────────
pub use crate::service::http::{HttpServiceConfig, HttpTranscriptionService};
pub use crate::service::{
    JobAccepted, JobStatus, PollResponse, RawResponse, SUBMIT_PATH, ServiceError, ServiceFuture,
    SubmitRequest, TranscriptionService, WireResponse, status_path,
};
