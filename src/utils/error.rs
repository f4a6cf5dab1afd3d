use thiserror::Error;

use crate::services::llm::LlmError;

/// Agent error with rich context and automatic error trait implementations
///
/// Design: Uses thiserror for ergonomic error handling with context.
/// Each variant carries meaningful context to help with debugging.
#[derive(Error, Debug)]
pub enum AgentError {
    // Configuration errors 1xxx
    #[error("Configuration error: {0}")]
    Config(String),

    // Endpoint errors 2xxx
    #[error("Endpoint {url} is unreachable: {message}")]
    EndpointUnreachable { url: String, message: String },

    #[error("Endpoint operation timeout")]
    EndpointTimeout,

    // Validation errors 3xxx
    #[error("Query validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // LLM errors 4xxx - auto-convert from LlmError
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // System errors 5xxx
    #[error("Internal error: {0}")]
    Internal(String),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Helper to create configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Helper to create endpoint unreachable error
    pub fn endpoint_unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EndpointUnreachable { url: url.into(), message: message.into() }
    }

    /// Helper to create validation failure error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    /// Helper to create invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Helper to create internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable error code, grouped by category
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1001,
            Self::EndpointUnreachable { .. } => 2001,
            Self::EndpointTimeout => 2002,
            Self::ValidationFailed(_) => 3001,
            Self::InvalidInput(_) => 3002,
            Self::Llm(_) => 4001,
            Self::Internal(_) => 5001,
            Self::Other(_) => 5001,
        }
    }
}

/// Implement From for serde_json::Error
impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::internal(format!("JSON serialization error: {}", err))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
