use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum QagenError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The source item could not be turned into an extractable representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("source item {0} does not exist")]
    NotFound(u64),

    #[error("source item {id} is malformed: {reason}")]
    Malformed { id: u64, reason: String },
}

/// External generation service failure, reported once retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformationError {
    #[error("authentication rejected by the generation service: {message}")]
    Auth { message: String },

    #[error("rate limited by the generation service (gave up after {attempts} attempts)")]
    RateLimit { attempts: u32 },

    #[error("generation service unavailable after {attempts} attempts: {message}")]
    Upstream { attempts: u32, message: String },

    #[error("generation request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("generation failed after {attempts} attempts: {message}")]
    Generic { attempts: u32, message: String },
}

/// The service answered, but not with a usable list of question/answer pairs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("response is not valid JSON: {0}")]
    Json(String),

    #[error("response has no qa_pairs array")]
    MissingPairs,

    #[error("response contains no question/answer pairs")]
    Empty,

    #[error("pair {index} has an empty question or answer")]
    EmptyPair { index: usize },
}

/// Draft or publish produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactCreationError {
    #[error("no draft artifacts could be created ({attempted} attempted)")]
    NoDrafts { attempted: usize },

    #[error("none of the {drafts} draft artifacts could be published")]
    NothingPublished { drafts: usize },
}

/// Why a single work item failed. Caught at the pipeline boundary and
/// accounted by the driver; never escapes a tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("transformation failed: {0}")]
    Transformation(#[from] TransformationError),

    #[error("invalid generation response: {0}")]
    Validation(#[from] ValidationError),

    #[error("artifact creation failed: {0}")]
    ArtifactCreation(#[from] ArtifactCreationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transformation_error_display() {
        let err = TransformationError::Upstream {
            attempts: 3,
            message: "status 503".into(),
        };
        assert_eq!(
            err.to_string(),
            "generation service unavailable after 3 attempts: status 503"
        );
    }

    #[test]
    fn processing_error_wraps_cause() {
        let err: ProcessingError = ExtractionError::NotFound(42).into();
        assert_eq!(err.to_string(), "extraction failed: source item 42 does not exist");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QagenError>();
        assert_send_sync::<ProcessingError>();
    }
}
