use thiserror::Error;

/// Main error type for the integration hub and ensemble engine
#[derive(Error, Debug)]
pub enum CourtsideError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Source errors (absorbed by the hub, never abort a sync cycle)
    #[error("Source fetch failed: {source_id} - {reason}")]
    SourceFetch { source_id: String, reason: String },

    #[error("Source timed out: {source_id} after {timeout_ms}ms")]
    SourceTimeout { source_id: String, timeout_ms: u64 },

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    // Prediction request errors
    #[error("Insufficient features: {available} available, {required} required")]
    InsufficientFeatures { available: usize, required: usize },

    #[error("No scorable models: {attempted} attempted, none succeeded")]
    NoScorableModels { attempted: usize },

    #[error("Stale data: input is {age_secs}s old, max age {max_age_secs}s")]
    StaleData { age_secs: i64, max_age_secs: i64 },

    #[error("Model scoring failed: {model} - {reason}")]
    ModelScoring { model: String, reason: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    // Retraining errors
    #[error("Retrain already in progress")]
    RetrainInProgress,

    #[error("Retrain failed: {0}")]
    RetrainFailed(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for CourtsideError
pub type Result<T> = std::result::Result<T, CourtsideError>;

/// Caller-facing classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Upstream or timing problem; retrying later may succeed
    Transient,
    /// The request itself is invalid; retrying unchanged is pointless
    InvalidInput,
    /// Bug or misconfiguration
    Internal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::InvalidInput => write!(f, "invalid_input"),
            ErrorClass::Internal => write!(f, "internal"),
        }
    }
}

impl CourtsideError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CourtsideError::Http(_)
            | CourtsideError::SourceFetch { .. }
            | CourtsideError::SourceTimeout { .. }
            | CourtsideError::SourceUnavailable(_)
            | CourtsideError::NoScorableModels { .. }
            | CourtsideError::ModelScoring { .. }
            | CourtsideError::RetrainInProgress
            | CourtsideError::Io(_) => ErrorClass::Transient,
            CourtsideError::InsufficientFeatures { .. }
            | CourtsideError::StaleData { .. }
            | CourtsideError::ModelNotFound(_)
            | CourtsideError::Validation(_)
            | CourtsideError::Json(_) => ErrorClass::InvalidInput,
            CourtsideError::Config(_)
            | CourtsideError::RetrainFailed(_)
            | CourtsideError::Internal(_)
            | CourtsideError::Other(_) => ErrorClass::Internal,
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
