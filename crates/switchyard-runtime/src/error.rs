use thiserror::Error;

use crate::types::{ErrorContent, Provider};

/// WebSocket close codes used by the relay.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    pub const INTERNAL: u16 = 1010;
    pub const PROVIDER: u16 = 1011;
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Every failure the relay can report to a client.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// Malformed or missing request fields. The session stays open.
    #[error("{0}")]
    Payload(String),

    /// No provider claims the requested model. The session stays open.
    #[error("no valid model matching '{0}'")]
    UnknownModel(String),

    /// An adapter was handed a model outside its own catalog entry.
    #[error("model '{model}' is not served by {provider}")]
    InvalidModel { provider: Provider, model: String },

    /// The upstream call never produced a first fragment.
    #[error("{provider} call failed after {attempts} attempt(s): {message}")]
    ProviderTransport {
        provider: Provider,
        attempts: u32,
        message: String,
        status: Option<u16>,
    },

    /// The upstream stream broke after fragments had already been relayed.
    #[error("{provider} stream failed: {message}")]
    ProviderStream { provider: Provider, message: String },

    /// An error reported by the provider itself (HTTP error body or error event).
    #[error("{message}")]
    Provider {
        name: String,
        message: String,
        status: Option<u16>,
    },

    #[error("generation exceeded {0}s")]
    Timeout(u64),

    #[error("generation aborted: {0}")]
    Aborted(String),

    #[error("{0}")]
    Internal(String),
}

impl RelayError {
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Name reported to clients as `errorName`.
    pub fn name(&self) -> &str {
        match self {
            Self::Payload(_) => "PayloadError",
            Self::UnknownModel(_) => "ModelError",
            Self::InvalidModel { .. } => "InvalidModelError",
            Self::ProviderTransport { .. } => "ProviderTransportError",
            Self::ProviderStream { .. } => "ProviderStreamError",
            Self::Provider { name, .. } => name,
            Self::Timeout(_) => "TimeoutError",
            Self::Aborted(_) => "AbortError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Close code used when this error terminates a connection.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Payload(_) | Self::UnknownModel(_) | Self::InvalidModel { .. } => {
                close_code::UNSUPPORTED_DATA
            }
            Self::Aborted(_) => close_code::GOING_AWAY,
            Self::Internal(_) => close_code::INTERNAL,
            Self::ProviderTransport { .. }
            | Self::ProviderStream { .. }
            | Self::Provider { .. }
            | Self::Timeout(_) => close_code::PROVIDER,
        }
    }

    /// Validation and routing errors leave the connection usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Payload(_) | Self::UnknownModel(_) | Self::InvalidModel { .. }
        )
    }

    /// Whether a failed start is worth another attempt. Client errors from the
    /// provider (bad key, bad request) are final; 408, 429 and 5xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider {
                status: Some(status),
                ..
            } => matches!(status, 408 | 429) || *status >= 500,
            Self::Provider { status: None, .. }
            | Self::ProviderStream { .. }
            | Self::ProviderTransport { .. }
            | Self::Internal(_) => true,
            Self::Payload(_)
            | Self::UnknownModel(_)
            | Self::InvalidModel { .. }
            | Self::Timeout(_)
            | Self::Aborted(_) => false,
        }
    }

    /// Upstream HTTP status, when the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ProviderTransport { status, .. } | Self::Provider { status, .. } => *status,
            _ => None,
        }
    }

    /// Client-facing error body. `errorCode` is the upstream status when known,
    /// otherwise the close code.
    pub fn to_content(&self) -> ErrorContent {
        ErrorContent {
            error_name: self.name().to_string(),
            error_message: self.to_string(),
            error_code: Some(self.status().unwrap_or_else(|| self.close_code())),
        }
    }

    /// Re-tag an error observed after the first fragment as a mid-stream failure.
    /// Errors the provider reported itself keep their identity.
    pub fn into_stream_error(self, provider: Provider) -> Self {
        match self {
            Self::Provider { .. } | Self::ProviderStream { .. } => self,
            other => Self::ProviderStream {
                provider,
                message: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider {
            name: "HttpError".to_string(),
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors_use_unsupported_data_code() {
        let err = RelayError::UnknownModel("not-a-real-model".into());
        assert!(err.is_recoverable());
        assert_eq!(err.name(), "ModelError");
        assert_eq!(err.to_content().error_code, Some(1003));
    }

    #[test]
    fn test_provider_error_keeps_upstream_name_and_status() {
        let err = RelayError::Provider {
            name: "overloaded_error".into(),
            message: "Overloaded".into(),
            status: Some(529),
        };
        let content = err.to_content();
        assert_eq!(content.error_name, "overloaded_error");
        assert_eq!(content.error_message, "Overloaded");
        assert_eq!(content.error_code, Some(529));
        assert_eq!(err.close_code(), close_code::PROVIDER);
    }

    #[test]
    fn test_only_transient_failures_are_retryable() {
        let status = |code| RelayError::Provider {
            name: "invalid_request_error".into(),
            message: "x".into(),
            status: Some(code),
        };
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(RelayError::internal("connection reset").is_retryable());
        assert!(!RelayError::payload("bad").is_retryable());
    }

    #[test]
    fn test_into_stream_error_retags_transport_failures() {
        let err = RelayError::internal("connection reset").into_stream_error(Provider::Gemini);
        assert_eq!(err.name(), "ProviderStreamError");
        assert!(err.to_string().contains("connection reset"));

        let reported = RelayError::Provider {
            name: "api_error".into(),
            message: "boom".into(),
            status: None,
        };
        assert_eq!(reported.into_stream_error(Provider::Anthropic).name(), "api_error");
    }
}
