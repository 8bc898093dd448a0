//! Failure classification.
//!
//! Maps a [`ServiceError`] (or a free-form server message) to an
//! [`ErrorCategory`] and a retryable flag. Classification is pure: the same
//! input always yields the same [`Classification`]. It is advisory; the
//! orchestrator uses it to decide on an automatic retry and the presentation
//! layer uses it to decide which actions to offer.

use serde::{Deserialize, Serialize};

use crate::service::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Network,
    Timeout,
    Validation,
    Payment,
    Authentication,
    Api,
}

impl ErrorCategory {
    /// Default retry eligibility for the category.
    ///
    /// `Authentication` reports retryable; the orchestrator limits it to a
    /// single silent retry per chain.
    pub fn default_retryable(self) -> bool {
        match self {
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::Authentication
            | ErrorCategory::Api => true,
            ErrorCategory::Validation | ErrorCategory::Payment => false,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Network => "Network",
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Payment => "Payment",
            ErrorCategory::Authentication => "Authentication",
            ErrorCategory::Api => "Api",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retryable: bool,
}

impl From<ErrorCategory> for Classification {
    fn from(category: ErrorCategory) -> Self {
        Self {
            category,
            retryable: category.default_retryable(),
        }
    }
}

const PAYMENT_PATTERNS: &[&str] = &[
    "insufficient",
    "balance",
    "credit",
    "payment",
    "quota",
    "billing",
];

const AUTH_PATTERNS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "token expired",
    "invalid token",
    "authentication",
];

const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "deadline exceeded"];

const NETWORK_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "dns",
    "failed to lookup",
    "no route to host",
    "network",
    "unreachable",
    "broken pipe",
    "error sending request",
];

/// Server-side outages that mention "unavailable" but are not about the video.
const TRANSIENT_PATTERNS: &[&str] = &[
    "service unavailable",
    "temporarily",
    "try again",
    "overloaded",
];

const VALIDATION_PATTERNS: &[&str] = &[
    "invalid url",
    "unsupported",
    "not found",
    "bad request",
    "malformed",
    "private",
    "unavailable",
    "removed",
];

fn matches_any(lower: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| lower.contains(p))
}

/// Classify a failed remote call.
pub fn classify(error: &ServiceError) -> Classification {
    match error {
        ServiceError::Timeout(_) => ErrorCategory::Timeout.into(),
        ServiceError::Transport(msg) => {
            if matches_any(&msg.to_lowercase(), TIMEOUT_PATTERNS) {
                ErrorCategory::Timeout.into()
            } else {
                ErrorCategory::Network.into()
            }
        }
        ServiceError::Status { status, body } => classify_status(*status, body),
        ServiceError::Decode(_) => ErrorCategory::Api.into(),
    }
}

fn classify_status(status: u16, body: &str) -> Classification {
    let lower = body.to_lowercase();
    match status {
        401 | 403 => ErrorCategory::Authentication.into(),
        402 => ErrorCategory::Payment.into(),
        408 | 504 => ErrorCategory::Timeout.into(),
        429 => ErrorCategory::Api.into(),
        400..=499 if matches_any(&lower, PAYMENT_PATTERNS) => ErrorCategory::Payment.into(),
        400..=499 => ErrorCategory::Validation.into(),
        _ => ErrorCategory::Api.into(),
    }
}

/// Classify a free-form failure message, such as the reason a server
/// attaches to a `failed` job.
pub fn classify_message(message: &str) -> Classification {
    let lower = message.to_lowercase();
    let category = if matches_any(&lower, PAYMENT_PATTERNS) {
        ErrorCategory::Payment
    } else if matches_any(&lower, AUTH_PATTERNS) {
        ErrorCategory::Authentication
    } else if matches_any(&lower, TIMEOUT_PATTERNS) {
        ErrorCategory::Timeout
    } else if matches_any(&lower, NETWORK_PATTERNS) {
        ErrorCategory::Network
    } else if matches_any(&lower, TRANSIENT_PATTERNS) {
        ErrorCategory::Api
    } else if matches_any(&lower, VALIDATION_PATTERNS) {
        ErrorCategory::Validation
    } else {
        ErrorCategory::Api
    };
    category.into()
}
