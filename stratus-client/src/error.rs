//! Client-side error types.
//!
//! This module provides [`ClientError`], the error type surfaced to callers
//! of the Stratus client. Transient failures that the retry engine absorbs
//! never appear here; what does appear is either fatal (bad credentials, a
//! non-retryable status) or the last observed failure after the retry budget
//! was exhausted.

use stratus_core::{Code, Status};

/// Errors surfaced by Stratus client operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The auth token is malformed, missing required claims, or uses an
    /// unsupported encoding version. Fatal; never retried.
    #[error("invalid auth token: {0}")]
    InvalidToken(String),

    /// The credential has expired. Fatal unless the caller constructs a new
    /// client with a refreshed token.
    #[error("auth token expired")]
    Expired,

    /// The call's deadline elapsed before it could complete.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the call or subscription.
    #[error("cancelled by caller")]
    Cancelled,

    /// A non-idempotent call failed in a way that leaves the server-side
    /// outcome unknown. Never silently retried; the caller must decide
    /// whether re-issuing the mutation is acceptable.
    #[error("ambiguous outcome for non-idempotent call: {status}")]
    AmbiguousMutation { status: Status },

    /// A status error from the service, surfaced verbatim. Either the status
    /// was not retryable, or retries were exhausted and this is the last
    /// observed failure.
    #[error("{0}")]
    Status(#[from] Status),

    /// The connection to the service could not be established or broke down,
    /// and retries (if any) were exhausted.
    #[error("connection error: {0}")]
    Connection(String),
}

impl ClientError {
    /// Get the status code equivalent of this error.
    ///
    /// For variants without an embedded [`Status`]:
    /// - `InvalidToken` / `Expired`: [`Code::Unauthenticated`]
    /// - `DeadlineExceeded`: [`Code::DeadlineExceeded`]
    /// - `Cancelled`: [`Code::Canceled`]
    /// - `Connection`: [`Code::Unavailable`]
    pub fn code(&self) -> Code {
        match self {
            ClientError::InvalidToken(_) | ClientError::Expired => Code::Unauthenticated,
            ClientError::DeadlineExceeded => Code::DeadlineExceeded,
            ClientError::Cancelled => Code::Canceled,
            ClientError::AmbiguousMutation { status } => status.code(),
            ClientError::Status(status) => status.code(),
            ClientError::Connection(_) => Code::Unavailable,
        }
    }

    /// Returns whether this error is an authentication failure that no amount
    /// of retrying or reconnecting will fix. Subscriptions close permanently
    /// on these; everything else they ride out.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ClientError::InvalidToken(_) | ClientError::Expired => true,
            ClientError::Status(status) => status.code().is_auth_failure(),
            _ => false,
        }
    }

    /// Create a status error.
    pub fn status<S: Into<String>>(code: Code, message: S) -> Self {
        ClientError::Status(Status::new(code, message))
    }
}
