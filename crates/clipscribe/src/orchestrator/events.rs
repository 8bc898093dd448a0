//! Observer hooks for the [`Orchestrator`](super::Orchestrator).
//!
//! The orchestrator reports its progress through [`OrchestratorEvent`]s.
//! Events are delivered after the internal lock is released, so handlers may
//! call back into the orchestrator (e.g. to take a snapshot).
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or headless runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Fan out to several handlers in order |

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::snapshot::{OrchestratorResult, OrchestratorState};
use crate::timeline::TimelineEntry;

#[derive(Debug)]
pub enum OrchestratorEvent<'a> {
    StateChanged {
        flow_id: Uuid,
        from: OrchestratorState,
        to: OrchestratorState,
    },
    TimelineAppended {
        flow_id: Uuid,
        entry: &'a TimelineEntry,
    },
    /// The flow reached a terminal state.
    Finished {
        flow_id: Uuid,
        result: &'a OrchestratorResult,
    },
    /// The flow was cancelled and the orchestrator is idle again.
    Cancelled { flow_id: Uuid },
}

pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        match event {
            OrchestratorEvent::StateChanged { flow_id, from, to } => {
                info!(%flow_id, "{from} -> {to}");
            }
            OrchestratorEvent::TimelineAppended { flow_id, entry } => {
                debug!(
                    %flow_id,
                    step = %entry.step,
                    duration_ms = entry.duration_ms,
                    correlation_id = entry.correlation_id.as_deref(),
                    "Timeline entry"
                );
            }
            OrchestratorEvent::Finished { flow_id, result } => match result {
                OrchestratorResult::Success { transcript, .. } => {
                    info!(%flow_id, chars = transcript.len(), "Flow succeeded");
                }
                OrchestratorResult::Failure {
                    reason,
                    error_category,
                    retryable,
                    ..
                } => {
                    warn!(%flow_id, category = %error_category, retryable, "Flow failed: {reason}");
                }
            },
            OrchestratorEvent::Cancelled { flow_id } => {
                info!(%flow_id, "Flow cancelled");
            }
        }
    }
}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches each event to every inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, my_progress_printer);
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}
