//! Tipos de erro para o cliente HTTP do serviço de geração.
//!
//! Define [`ApiError`] com variantes para rate limiting, erros da API,
//! timeouts e erros de rede. O cliente de transformação usa
//! [`ApiError::is_rate_limit`] e [`ApiError::is_auth`] para decidir a espera
//! entre tentativas e quando desistir.

use thiserror::Error;

/// Erros que podem ocorrer numa única chamada ao serviço de geração.
#[derive(Debug, Error)]
pub enum ApiError {
    /// O servidor retornou HTTP 429 (rate limit).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status HTTP de erro (ex.: 401 chave inválida, 503 indisponível).
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A requisição excedeu o timeout do cliente.
    #[error("request timed out")]
    Timeout,

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Status 200, mas o corpo não tem o formato esperado.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Sinal de rate limit: HTTP 429 ou mensagem que o menciona.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } => true,
            ApiError::Api { status, message } => {
                let lower = message.to_lowercase();
                *status == 429 || lower.contains("rate limit") || lower.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Falha de autenticação: retentar não resolve.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Api { status: 401 | 403, .. })
    }

    /// Serviço temporariamente indisponível (502/503/504).
    pub fn is_upstream(&self) -> bool {
        matches!(self, ApiError::Api { status: 502..=504, .. })
    }
}
