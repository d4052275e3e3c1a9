//! The transformation client: cache lookup, bounded retries with
//! differentiated backoff, and response validation.

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::client::{ChatBackend, Endpoint};
use super::error::ApiError;
use super::prompt::{build_prompt, parse_qa_response};
use super::types::{ChatRequest, QaPair};
use crate::cache::ContentCache;
use crate::config::{BatchSettings, RetryPolicy};
use crate::content::ExtractedContent;
use crate::error::{ProcessingError, TransformationError};

/// Validated pairs plus whether they came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub pairs: Vec<QaPair>,
    pub cached: bool,
}

pub struct TransformationClient<B> {
    backend: B,
    cache: ContentCache,
    policy: RetryPolicy,
}

impl<B: ChatBackend> TransformationClient<B> {
    pub fn new(backend: B, cache: ContentCache, policy: RetryPolicy) -> Self {
        Self {
            backend,
            cache,
            policy,
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Turns extracted content into validated question/answer pairs.
    ///
    /// A cache hit skips the service entirely. On a miss the validated result
    /// is stored before it is returned; a cache write failure is logged only.
    pub async fn generate(
        &self,
        content: &ExtractedContent,
        settings: &BatchSettings,
    ) -> Result<Generated, ProcessingError> {
        let fingerprint = content.fingerprint();
        let model = settings.model_id.as_str();

        if let Some(pairs) = self.cache.get(&fingerprint, model, Utc::now()) {
            info!(model, pairs = pairs.len(), "using cached generation result");
            return Ok(Generated {
                pairs,
                cached: true,
            });
        }

        let endpoint = Endpoint::from_settings(settings);
        if endpoint.api_key.is_empty() {
            return Err(TransformationError::Auth {
                message: "no API key configured".into(),
            }
            .into());
        }

        let req = ChatRequest::single_turn(model, build_prompt(content));
        let text = self.send_with_retry(&endpoint, &req).await?;
        let pairs = parse_qa_response(&text)?;

        if let Err(e) = self.cache.put(&fingerprint, model, pairs.clone(), Utc::now()) {
            warn!(error = %e, "failed to store generation result in cache");
        }
        info!(model, pairs = pairs.len(), "generation completed");
        Ok(Generated {
            pairs,
            cached: false,
        })
    }

    async fn send_with_retry(
        &self,
        endpoint: &Endpoint,
        req: &ChatRequest,
    ) -> Result<String, TransformationError> {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            debug!(attempt, max, "sending generation request");
            let err = match self.backend.send(endpoint, req).await {
                Ok(resp) => match resp.text() {
                    Some(text) => return Ok(text.to_string()),
                    None => ApiError::InvalidResponse("response has no choices".into()),
                },
                Err(e) => e,
            };

            if err.is_auth() {
                warn!(attempt, error = %err, "generation request rejected, not retrying");
                return Err(TransformationError::Auth {
                    message: err.to_string(),
                });
            }
            if attempt >= max {
                return Err(classify(err, attempt));
            }

            let delay = self.policy.delay_after(attempt, err.is_rate_limit());
            warn!(
                attempt,
                max,
                error = %err,
                wait_ms = delay.as_millis() as u64,
                "generation request failed, retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Most specific cause for the final failure.
fn classify(err: ApiError, attempts: u32) -> TransformationError {
    if err.is_rate_limit() {
        TransformationError::RateLimit { attempts }
    } else if err.is_upstream() {
        TransformationError::Upstream {
            attempts,
            message: err.to_string(),
        }
    } else if matches!(err, ApiError::Timeout) {
        TransformationError::Timeout { attempts }
    } else {
        TransformationError::Generic {
            attempts,
            message: err.to_string(),
        }
    }
}
