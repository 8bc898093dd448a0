//! reqwest client for the transcription job API.
//!
//! Endpoints:
//!
//! | Method | Path | Body / response |
//! |--------|------|-----------------|
//! | `POST` | `/ttt/transcribe` | [`SubmitRequest`] → [`JobAccepted`] |
//! | `GET`  | `/ttt/status/{jobId}` | → [`PollResponse`] |

use std::time::{Duration, Instant};

use tracing::{debug, trace};
use url::Url;

use super::{
    JobAccepted, PollResponse, RawResponse, ServiceError, ServiceFuture, SubmitRequest,
    TranscriptionService,
};

/// Connection settings for [`HttpTranscriptionService`].
#[derive(Debug, Clone)]
pub struct HttpServiceConfig {
    /// Service root, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Bearer token sent with every request, if set.
    pub api_token: Option<String>,
    pub user_agent: String,
    /// Client-level timeout. The orchestrator applies its own per-call
    /// timeout on top of this.
    pub timeout: Duration,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            base_url: crate::DEFAULT_SERVICE_URL.to_string(),
            api_token: None,
            user_agent: format!("clipscribe/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(60),
        }
    }
}

impl HttpServiceConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set the token from an optional value, e.g. `std::env::var(..).ok()`.
    pub fn with_api_token_opt(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`TranscriptionService`] over HTTP.
pub struct HttpTranscriptionService {
    client: reqwest::Client,
    base: Url,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpTranscriptionService {
    pub fn new(config: HttpServiceConfig) -> Result<Self, String> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| format!("invalid service URL '{}': {e}", config.base_url))?;
        if base.cannot_be_a_base() {
            return Err(format!("invalid service URL '{}'", config.base_url));
        }
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            base,
            api_token: config.api_token,
            timeout: config.timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ServiceError::Transport(format!("invalid base URL {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.timeout)
        } else {
            ServiceError::Transport(e.to_string())
        }
    }

    /// Send `req` and decode a successful body, returning the raw exchange
    /// alongside the decoded value.
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<(T, RawResponse), ServiceError> {
        let start = Instant::now();
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.transport_error(e))?;
        debug!(
            "Service response: HTTP {} in {:.2}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let value = serde_json::from_str(&text).map_err(|e| ServiceError::Decode(e.to_string()))?;
        Ok((
            value,
            RawResponse {
                status: status.as_u16(),
                body: text,
            },
        ))
    }
}

impl TranscriptionService for HttpTranscriptionService {
    fn submit(&self, request: &SubmitRequest) -> ServiceFuture<'_, JobAccepted> {
        let request = request.clone();
        Box::pin(async move {
            let url = self.endpoint(&["ttt", "transcribe"])?;
            debug!(%url, tier = %request.tier, "Submitting job");
            trace!(client_request_id = %request.client_request_id, "Submit payload");
            let (mut accepted, raw): (JobAccepted, _) =
                self.send(self.client.post(url).json(&request)).await?;
            accepted.raw = Some(raw);
            Ok(accepted)
        })
    }

    fn poll_status(&self, job_id: &str) -> ServiceFuture<'_, PollResponse> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["ttt", "status", &job_id])?;
            debug!(%url, "Polling job status");
            let (mut resp, raw): (PollResponse, _) = self.send(self.client.get(url)).await?;
            resp.raw = Some(raw);
            Ok(resp)
        })
    }
}
