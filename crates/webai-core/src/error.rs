//! Error types for WebAI.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Neither the config file nor the browser cookie store had usable credentials.
    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// The provider rejected the session cookies.
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    /// Network failure or timeout talking to the provider. Retryable by the caller.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed inbound request, rejected before any provider call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider disabled in the `[EnabledAI]` section.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code carried in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CredentialsUnavailable(_) => "credentials_unavailable",
            Self::AuthExpired(_) => "auth_expired",
            Self::Transport(_) => "transport_error",
            Self::Validation(_) => "validation_error",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::Config(_) => "config_error",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            Error::CredentialsUnavailable("x".into()).code(),
            "credentials_unavailable"
        );
        assert_eq!(Error::AuthExpired("x".into()).code(), "auth_expired");
        assert_eq!(Error::Transport("x".into()).code(), "transport_error");
        assert_eq!(Error::Validation("x".into()).code(), "validation_error");
        assert_eq!(
            Error::ProviderUnavailable("x".into()).code(),
            "provider_unavailable"
        );
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(Error::Transport("timeout".into()).is_retryable());
        assert!(!Error::AuthExpired("401".into()).is_retryable());
        assert!(!Error::Validation("empty".into()).is_retryable());
    }
}
