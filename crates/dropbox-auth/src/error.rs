//! Error types for Dropbox OAuth operations
//!
//! Every failure surfaced by this crate is one of these variants. Provider
//! reported OAuth2 codes are kept distinct from transport and decode
//! failures so callers can decide what is worth retrying.

use std::fmt;

/// OAuth2 error codes reported by the provider, either in the callback
/// URL's `error` parameter or in the token endpoint's error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthErrorCode {
    /// Any code not listed below, or a callback carrying neither a code nor an error.
    Unknown,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
}

impl OAuthErrorCode {
    /// Map a wire error code. Matching is case-sensitive.
    pub fn from_code(code: &str) -> Self {
        match code {
            "unauthorized_client" => Self::UnauthorizedClient,
            "access_denied" => Self::AccessDenied,
            "unsupported_response_type" => Self::UnsupportedResponseType,
            "invalid_scope" => Self::InvalidScope,
            "server_error" => Self::ServerError,
            "temporarily_unavailable" => Self::TemporarilyUnavailable,
            _ => Self::Unknown,
        }
    }

    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Unknown => "an unknown error occurred",
            Self::UnauthorizedClient => {
                "the client is not authorized to request an access token using this method"
            }
            Self::AccessDenied => "the resource owner or authorization server denied the request",
            Self::UnsupportedResponseType => {
                "the authorization server does not support obtaining an access token using this method"
            }
            Self::InvalidScope => "the requested scope is invalid, unknown, or malformed",
            Self::ServerError => {
                "the authorization server encountered an unexpected condition"
            }
            Self::TemporarilyUnavailable => {
                "the authorization server is temporarily unable to handle the request"
            }
        }
    }
}

impl fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_str())
    }
}

/// Errors from OAuth authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authorization failed: {0}")]
    OAuth(OAuthErrorCode),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("secure storage backend failed (status {status}): {message}")]
    Backend { status: i32, message: String },

    #[error("authorization attempt cancelled")]
    Cancelled,

    #[error("no authorization attempt is awaiting a callback")]
    NotAwaitingCallback,

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a provider-reported error code.
    pub fn oauth(code: &str) -> Self {
        Self::OAuth(OAuthErrorCode::from_code(code))
    }

    /// Whether the caller may reasonably retry the same operation.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::OAuth(OAuthErrorCode::ServerError | OAuthErrorCode::TemporarilyUnavailable)
        )
    }
}

impl From<common::Error> for Error {
    fn from(err: common::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
