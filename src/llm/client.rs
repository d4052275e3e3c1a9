use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use super::error::ApiError;
use super::types::{ChatRequest, ChatResponse};
use crate::config::BatchSettings;

const USER_AGENT: &str = concat!("qagen/", env!("CARGO_PKG_VERSION"));

/// Where and as whom a request is sent. Taken from a batch's settings
/// snapshot, so every item of a batch talks to the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub api_key: String,
}

impl Endpoint {
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            url: settings.api_base_url.clone(),
            api_key: settings.bearer_token().to_string(),
        }
    }
}

/// One request/response exchange with the generation service.
pub trait ChatBackend: Send + Sync {
    fn send(
        &self,
        endpoint: &Endpoint,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatResponse, ApiError>> + Send;
}

pub struct HttpChatClient {
    client: Client,
}

impl HttpChatClient {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl ChatBackend for HttpChatClient {
    async fn send(&self, endpoint: &Endpoint, req: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let response = self
            .client
            .post(&endpoint.url)
            .bearer_auth(&endpoint.api_key)
            .json(req)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000))
                .unwrap_or(1000);
            return Err(ApiError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let text = response.text().await.map_err(classify_transport)?;
        let body: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("undecodable body: {e}")))?;
        if body.text().is_none() {
            return Err(ApiError::InvalidResponse("response has no choices".into()));
        }
        Ok(body)
    }
}

fn classify_transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(err)
    }
}

/// Pulls `error.message` (and `error.code`) out of an error body, falling
/// back to the raw text.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    match value.get("error") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(obj) => {
            let message = obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or_default();
            match obj.get("code") {
                Some(code) if !code.is_null() => format!("{message} (code: {code})"),
                _ => message.to_string(),
            }
        }
        None => body.trim().to_string(),
    }
}
