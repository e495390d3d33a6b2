//! The injected RPC channel abstraction.
//!
//! The resilience core never opens sockets. It is handed an [`RpcChannel`]
//! at construction: a capability that dispatches unary calls, opens
//! subscription streams, and issues disposable tokens over whatever transport
//! the embedding application configured. The channel (together with the
//! generated stub layer behind it) owns the wire encoding; payloads for cache
//! data operations pass through the core as opaque [`Bytes`].
//!
//! The channel is expected to multiplex many concurrent logical calls over
//! shared connections, stay open for the client's lifetime, and be closed
//! exactly once at client shutdown.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use futures::Stream;
use http::HeaderMap;
use stratus_core::{Code, Status, SubscriptionEvent, TopicValue};

/// Boxed future alias used across the channel trait, keeping it object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A server stream of subscription events, as decoded by the channel.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SubscriptionEvent, Status>> + Send>>;

/// A unary request handed to the channel.
#[derive(Clone, Debug)]
pub struct UnaryRequest {
    /// Full gRPC method path, e.g. `cache_client.Scs/Get`.
    pub method: &'static str,
    /// Serialized request payload, opaque to the core.
    pub payload: Bytes,
    /// Call metadata: bearer credential, cache name, caller-added headers.
    pub metadata: HeaderMap,
    /// Absolute deadline for the attempt.
    pub deadline: Instant,
}

/// A unary response from the channel.
#[derive(Clone, Debug)]
pub struct UnaryResponse {
    /// Serialized response payload, opaque to the core.
    pub payload: Bytes,
    /// Response metadata.
    pub metadata: HeaderMap,
}

/// A request to publish one value to a topic.
#[derive(Clone, Debug)]
pub struct PublishRequest {
    pub cache_name: String,
    pub topic: String,
    pub value: TopicValue,
    pub metadata: HeaderMap,
    pub deadline: Instant,
}

/// A request to open (or reopen) a subscription stream.
#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub cache_name: String,
    pub topic: String,
    /// Sequence position to resume from. `None` on the first open; on a
    /// reopen this is the last position the subscription observed, so the
    /// server can resume without gaps. The item at this exact position may be
    /// redelivered (at-least-once at the resume boundary).
    pub resume_at_sequence: Option<u64>,
    pub metadata: HeaderMap,
}

/// A request to mint a disposable, scope-restricted token.
#[derive(Clone, Debug)]
pub struct TokenRequest {
    /// How long the minted token should remain valid.
    pub valid_for: Duration,
    /// Optional restriction scope understood by the token service.
    pub scope: Option<String>,
    pub metadata: HeaderMap,
    pub deadline: Instant,
}

/// The token service's reply to a [`TokenRequest`].
#[derive(Clone, Debug)]
pub struct TokenGrant {
    /// The minted bearer key.
    pub api_key: String,
    /// Host the token is valid against.
    pub endpoint: String,
    /// Absolute expiry of the minted token.
    pub valid_until: SystemTime,
}

/// Failures reported by the channel.
///
/// The distinction between `Connect` and `Transport` matters to the retry
/// engine: a `Connect` failure means the request provably never reached the
/// server, so even a non-idempotent call can be re-issued safely. A
/// `Transport` failure happened after the request was in flight, so the
/// server-side outcome is unknown.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connection could not be established; the request was never sent.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The service answered with a failure status.
    #[error("{0}")]
    Status(Status),

    /// The connection broke while the request was in flight.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    /// Whether this failure guarantees the request was never executed
    /// server-side.
    pub fn is_not_executed(&self) -> bool {
        matches!(self, ChannelError::Connect(_))
    }

    /// The status code equivalent of this failure. `Connect` and `Transport`
    /// map to [`Code::Unavailable`].
    pub fn code(&self) -> Code {
        match self {
            ChannelError::Status(status) => status.code(),
            ChannelError::Connect(_) | ChannelError::Transport(_) => Code::Unavailable,
        }
    }

    /// The status equivalent of this failure, for surfacing to callers.
    pub fn to_status(&self) -> Status {
        match self {
            ChannelError::Status(status) => status.clone(),
            ChannelError::Connect(message) | ChannelError::Transport(message) => {
                Status::unavailable(message.clone())
            }
        }
    }
}

/// The transport capability injected at client construction.
pub trait RpcChannel: Send + Sync {
    /// Dispatch a unary call.
    fn unary(&self, request: UnaryRequest) -> BoxFuture<'static, Result<UnaryResponse, ChannelError>>;

    /// Publish one value to a topic.
    fn publish(&self, request: PublishRequest) -> BoxFuture<'static, Result<(), ChannelError>>;

    /// Open a server stream for a topic subscription.
    fn open_subscription(
        &self,
        request: SubscribeRequest,
    ) -> BoxFuture<'static, Result<EventStream, ChannelError>>;

    /// Mint a disposable token against the token endpoint.
    fn issue_token(&self, request: TokenRequest) -> BoxFuture<'static, Result<TokenGrant, ChannelError>>;

    /// Release the channel's underlying connections. Called exactly once, at
    /// client shutdown.
    fn shutdown(&self) -> BoxFuture<'static, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_is_not_executed() {
        assert!(ChannelError::Connect("refused".into()).is_not_executed());
        assert!(!ChannelError::Transport("reset mid-flight".into()).is_not_executed());
        assert!(!ChannelError::Status(Status::unavailable("busy")).is_not_executed());
    }

    #[test]
    fn test_channel_error_code() {
        assert_eq!(ChannelError::Connect("x".into()).code(), Code::Unavailable);
        assert_eq!(ChannelError::Transport("x".into()).code(), Code::Unavailable);
        assert_eq!(
            ChannelError::Status(Status::not_found("missing")).code(),
            Code::NotFound
        );
    }

    #[test]
    fn test_to_status_preserves_service_status() {
        let status = Status::new(Code::ResourceExhausted, "throttled");
        let err = ChannelError::Status(status.clone());
        assert_eq!(err.to_status(), status);
    }
}
