//! Error types for the LeadScout domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all LeadScout operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Upstream provider errors ---
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    // --- Tool-call protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // --- Credential errors ---
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures from the upstream model provider, classified at the transport
/// boundary so callers never match on provider-specific error strings.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Endpoint unsupported for model '{model}': {reason}")]
    EndpointUnsupported { model: String, reason: String },

    #[error("Provider call failed: {0}")]
    Unknown(String),
}

impl UpstreamError {
    /// Short classification label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::EndpointUnsupported { .. } => "endpoint_unsupported",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Violations of the tagged tool-call protocol in a model reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed tool block: <{tool}> has no closing tag")]
    MalformedBlock { tool: String },

    #[error("Unknown tool: '{tool}' is not in the schema")]
    UnknownTool { tool: String },

    #[error("Tool '{tool}' is missing required argument '{arg}'")]
    MissingRequiredArg { tool: String, arg: String },
}

/// Credential resolution failures. Fatal at startup, never mid-run.
#[derive(Debug, Clone, Error)]
pub enum CredentialsError {
    #[error("No API key found for provider '{provider}' in config, environment, or {fallback_path}")]
    Missing {
        provider: String,
        fallback_path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_kinds() {
        let err = UpstreamError::RateLimited {
            retry_after_secs: 5,
        };
        assert_eq!(err.kind(), "rate_limited");
        assert!(err.to_string().contains("5s"));

        let err = UpstreamError::EndpointUnsupported {
            model: "qwen/qwen2.5-32b-instruct".into(),
            reason: "no endpoints found that support tool use".into(),
        };
        assert_eq!(err.kind(), "endpoint_unsupported");
        assert!(err.to_string().contains("qwen"));
    }

    #[test]
    fn protocol_error_names_the_violation() {
        let err = ProtocolError::MissingRequiredArg {
            tool: "navigate".into(),
            arg: "url".into(),
        };
        assert!(err.to_string().contains("navigate"));
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn top_level_error_wraps_contexts() {
        let err: Error = UpstreamError::Timeout("30s elapsed".into()).into();
        assert!(matches!(err, Error::Upstream(_)));

        let err: Error = ProtocolError::UnknownTool {
            tool: "calculator".into(),
        }
        .into();
        assert!(err.to_string().contains("calculator"));

        let err: Error = CredentialsError::Missing {
            provider: "openrouter".into(),
            fallback_path: "~/.leadscout/credentials.toml".into(),
        }
        .into();
        assert!(matches!(err, Error::Credentials(_)));
    }
}
