//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Transport failure or non-success HTTP status from a provider
    #[error("Provider unavailable: {reason}")]
    ProviderUnavailable {
        reason: String,
        status: Option<u16>,
    },

    /// Provider finished the response with a terminal, unsuccessful reason
    #[error("Provider '{provider}' refused to complete the response: {reason}")]
    ProviderRefused { provider: String, reason: String },

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool validation failed
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Maximum iterations reached in reasoning loop
    #[error("Maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// Parse error (e.g., provider payload parsing)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No storage driver could deliver the session data
    #[error("Could not read session data for '{key}': {reason}")]
    StorageUnavailable { key: String, reason: String },

    /// A single storage driver failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Shorthand for a transport failure without an HTTP status.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            reason: reason.into(),
            status: None,
        }
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. } | Self::RateLimited(_) | Self::Io(_)
        )
    }

    /// Configuration errors are raised at setup time and never retried.
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable { .. } => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::ProviderRefused { reason, .. } => {
                format!("The AI service declined to answer ({reason}).")
            }
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolValidation(msg) => format!("Invalid tool input: {msg}"),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::MaxIterations(_) => {
                "The request took too long to process. Please try a simpler query.".into()
            }
            Self::StorageUnavailable { .. } => {
                "Your conversation could not be loaded. Please try again.".into()
            }
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AgentError::unavailable("connection reset").is_retryable());
        assert!(!AgentError::Config("bad".into()).is_retryable());
        assert!(AgentError::Config("bad".into()).is_config());
    }

    #[test]
    fn test_refused_message_names_provider() {
        let err = AgentError::ProviderRefused {
            provider: "gemini".into(),
            reason: "SAFETY".into(),
        };
        assert!(err.to_string().contains("gemini"));
        assert!(err.to_string().contains("SAFETY"));
    }
}
