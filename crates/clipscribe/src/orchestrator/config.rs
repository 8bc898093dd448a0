//! Configuration for the [`Orchestrator`](super::Orchestrator).
//!
//! ```ignore
//! let config = OrchestratorConfig::default()
//!     .with_poll_interval(Duration::from_millis(500))
//!     .with_max_polling_attempts(40)
//!     .with_request_timeout(Duration::from_secs(10));
//! ```

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fixed delay before each status poll. Default: 2 s.
    pub poll_interval: Duration,
    /// Hard ceiling on status polls per flow. Default: 20.
    pub max_polling_attempts: u32,
    /// Per-call timeout for submit and poll requests. Default: 30 s.
    pub request_timeout: Duration,
    /// Silent re-issues allowed after an authentication failure, shared by
    /// a flow and every retry started from it. Default: 1.
    pub auth_retry_budget: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_polling_attempts: 20,
            request_timeout: Duration::from_secs(30),
            auth_retry_budget: 1,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the polling ceiling. Values below 1 are raised to 1.
    pub fn with_max_polling_attempts(mut self, max: u32) -> Self {
        self.max_polling_attempts = max.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auth_retry_budget(mut self, budget: u32) -> Self {
        self.auth_retry_budget = budget;
        self
    }
}
