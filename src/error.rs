use std::sync::Arc;

use thiserror::Error;

/// Result alias used across the caching layer.
pub type Result<T> = std::result::Result<T, ResourceError>;

/// Errors reported by the caching layer.
///
/// Configuration errors are never retried. Fetch failures are never cached, so
/// the next request for the same parameters attempts a fresh fetch.
///
/// The type is `Clone` because every caller that joined a single-flight round
/// receives its own copy of the same outcome.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// A required parameter is absent from the parameter set
    #[error("missing required parameter '{name}'")]
    MissingParameter { name: &'static str },

    /// The parameter set or settings are invalid for the requested operation
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// The underlying fetcher failed to obtain the resource
    #[error("failed to request a resource with parameters {parameters}: {cause:#}")]
    Fetch {
        /// Redacted description of the parameter set
        parameters: String,
        cause: Arc<anyhow::Error>,
    },
}

impl ResourceError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn fetch(parameters: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::Fetch { parameters: parameters.into(), cause: Arc::new(cause) }
    }

    /// Configuration errors will fail the same way on every attempt.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingParameter { .. } | Self::Configuration { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    /// Label used by metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingParameter { .. } | Self::Configuration { .. } => "configuration",
            Self::Fetch { .. } => "fetch",
        }
    }

    /// Underlying fetcher error, if this is a fetch failure.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Fetch { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}
