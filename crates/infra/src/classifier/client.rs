//! Classifier client with circuit-breaker protection.
//!
//! Every call must first acquire a permit from the breaker; rejected calls
//! surface as `CircuitOpen` without any network activity, which the worker
//! turns into an immediate dead-letter so back-pressure reaches the
//! classifier. Non-2xx responses, connection failures, timeouts, and
//! undecodable bodies are all transient classifier failures and count against
//! the breaker.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use docflow_common::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, SystemClock};
use docflow_core::Classifier;
use docflow_domain::constants::CORRELATION_HEADER;
use docflow_domain::{
    ClassifierConfig, ClassifierVerdict, CorrelationId, PipelineError, Result,
};
use tracing::{debug, warn};

use super::types::{ClassifyRequest, ClassifyResponse};

const CLASSIFY_PATH: &str = "/classify-with-ocr";

/// HTTP classifier gateway.
pub struct HttpClassifier<C: Clock = SystemClock> {
    http: reqwest::Client,
    endpoint: String,
    breaker: CircuitBreaker<C>,
}

impl HttpClassifier<SystemClock> {
    /// Create a gateway from configuration, using the system clock.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> HttpClassifier<C> {
    /// Create a gateway with a custom clock (useful for testing the breaker).
    pub fn with_clock(config: &ClassifierConfig, clock: C) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.call_timeout())
            .build()
            .map_err(|e| PipelineError::Transient(format!("http client build failed: {e}")))?;

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold,
            open_duration: config.open_duration(),
            half_open_max_attempts: config.half_open_max_attempts,
        };
        let breaker = CircuitBreaker::with_clock(breaker_config, clock)
            .map_err(|e| PipelineError::validation("classifier", e.to_string()))?;

        let endpoint = format!("{}{}", config.base_url.trim_end_matches('/'), CLASSIFY_PATH);

        Ok(Self { http, endpoint, breaker })
    }

    /// Current breaker state, for health reporting.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state_kind()
    }

    /// One unprotected call to the classifier.
    async fn call(
        &self,
        content: &[u8],
        mime_type: &str,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<ClassifierVerdict> {
        let body = ClassifyRequest {
            content: BASE64.encode(content),
            mime_type: mime_type.to_string(),
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(cid) = correlation_id {
            request = request.header(CORRELATION_HEADER, cid.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Transient(format!("classifier request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Transient(format!("classifier returned {status}")));
        }

        let parsed: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Transient(format!("undecodable classifier response: {e}")))?;

        debug!(classification = %parsed.classification, confidence = parsed.confidence, "classifier verdict received");
        Ok(parsed.into())
    }
}

#[async_trait]
impl<C: Clock> Classifier for HttpClassifier<C> {
    async fn classify(
        &self,
        content: &[u8],
        mime_type: &str,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<ClassifierVerdict> {
        if self.breaker.try_acquire().is_err() {
            return Err(PipelineError::CircuitOpen);
        }

        match self.call(content, mime_type, correlation_id).await {
            Ok(verdict) => {
                self.breaker.record_success();
                Ok(verdict)
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(error = %err, state = %self.breaker.state_kind(), "classifier call failed");
                Err(err)
            }
        }
    }
}
