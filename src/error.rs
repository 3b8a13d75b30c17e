//! Error types for curriculum-drip.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
///
/// Any of these at process start is fatal: the collaborator it guards is
/// unusable and no per-user retry can fix it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Generative backend errors.
///
/// Every variant is transient from the scheduler's point of view: the unit is
/// retried on the next sweep, never within the same one.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} returned empty content")]
    EmptyResponse { provider: String },
}

impl LlmError {
    /// Whether a later sweep can reasonably expect a different result.
    pub fn is_transient(&self) -> bool {
        !matches!(self, LlmError::AuthFailed { .. })
    }
}

/// Publishing store errors.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Publish of {path} rejected with status {status}: {body}")]
    Rejected {
        path: String,
        status: u16,
        body: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Notification/alerting errors. These never escape the notify boundary.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Failed to send via {channel}: {reason}")]
    Send { channel: String, reason: String },
}

/// Per-user pipeline errors, recorded in the sweep report.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Store failed: {0}")]
    Store(#[from] DatabaseError),

    #[error("Invalid progress: {0}")]
    InvalidProgress(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_wraps_llm_error() {
        let err: PipelineError = LlmError::Timeout {
            provider: "openai".into(),
            timeout: Duration::from_secs(120),
        }
        .into();
        assert!(err.to_string().starts_with("Generation failed"));
    }

    #[test]
    fn auth_failure_is_not_transient() {
        assert!(!LlmError::AuthFailed { provider: "x".into() }.is_transient());
        assert!(
            LlmError::RequestFailed {
                provider: "x".into(),
                reason: "reset".into()
            }
            .is_transient()
        );
    }
}
