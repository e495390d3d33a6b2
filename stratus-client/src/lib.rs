//! Resilience core for the Stratus cache/pub-sub SDK.
//!
//! This crate turns a single logical operation against the Stratus service —
//! a cache get, a topic publish, a subscription — into a correctly retried,
//! correctly authenticated, correctly cancellable network interaction. It
//! deliberately does not open sockets or encode wire messages: the transport
//! is an injected [`RpcChannel`] capability, and payloads for cache data
//! operations pass through as opaque bytes owned by the generated stub layer
//! behind the channel.
//!
//! ## What lives here
//!
//! - **Credentials** ([`CredentialProvider`], [`DisposableToken`]): parse a
//!   self-describing auth token (endpoints, expiry, scope), fail closed on
//!   anything malformed, and attach a bearer credential to every call at the
//!   moment of use.
//! - **Retry engine** ([`RetryPolicy`], [`should_retry`]): a pure decision
//!   function with exponential backoff, jitter, a delay ceiling, and a hard
//!   rule that non-idempotent calls are never re-issued when the server-side
//!   outcome is unknown.
//! - **Call pipeline**: deadline clamping, fail-fast on expired credentials
//!   or spent deadlines, one telemetry event per attempt, cancellable waits.
//! - **Subscriptions** ([`Subscription`]): a reconnecting server-stream state
//!   machine (`Connecting -> Active <-> Reconnecting -> Closed`) that resumes
//!   from the last-observed sequence position and only ever surfaces fatal
//!   authentication failures.
//!
//! ## Example
//!
//! ```ignore
//! use stratus_client::{CallDescriptor, OperationKind, StratusClient};
//!
//! let client = StratusClient::builder(channel)
//!     .auth_token(std::env::var("STRATUS_TOKEN")?)
//!     .build()?;
//!
//! // Unary call with an opaque, stub-encoded payload.
//! let response = client
//!     .send("my-cache", CallDescriptor::new(OperationKind::Get), payload)
//!     .await?;
//!
//! // Subscribe; the stream survives transient breaks transparently.
//! use futures::StreamExt;
//! let mut subscription = client.subscribe("my-cache", "my-topic");
//! while let Some(event) = subscription.next().await {
//!     println!("{event:?}");
//! }
//! ```
//!
//! ## Cancellation
//!
//! Every call and subscription accepts a [`CancellationSignal`]; the paired
//! [`CancellationHandle`] stays with the caller. Cancellation is observed at
//! every suspension point — the network wait and the backoff wait — so a
//! cancelled call fails promptly with [`ClientError::Cancelled`] and a
//! cancelled subscription transitions to `Closed` without issuing another
//! reconnect attempt.
//!
//! ## Error contract
//!
//! Transient failures inside the retry policy's budget are invisible. What
//! surfaces is either fatal ([`ClientError::InvalidToken`],
//! [`ClientError::Expired`], a non-retryable status,
//! [`ClientError::AmbiguousMutation`]) or the last observed status once
//! attempts or deadline are exhausted — never a synthetic timeout.

mod auth;
mod builder;
mod call;
mod cancel;
mod channel;
mod client;
pub mod config;
mod error;
mod interceptor;
mod subscription;
mod telemetry;

pub use auth::{BearerCredential, CredentialProvider, DisposableToken};
pub use builder::{ClientBuildError, ClientBuilder, DEFAULT_REQUEST_TIMEOUT};
pub use call::{CallDescriptor, Idempotency, OperationKind, RetryEligibility};
pub use cancel::{CancellationHandle, CancellationSignal, cancellation};
pub use channel::{
    BoxFuture, ChannelError, EventStream, PublishRequest, RpcChannel, SubscribeRequest,
    TokenGrant, TokenRequest, UnaryRequest, UnaryResponse,
};
pub use client::StratusClient;
pub use error::ClientError;
pub use interceptor::{HeaderInterceptor, Intercept, InterceptContext};
pub use subscription::{Subscription, SubscriptionStatus};
pub use telemetry::{CallEvent, CallObserver, CallOutcome, NoopObserver};

// Re-export from config for convenience at the crate root.
pub use config::{JitterStrategy, RetryDecision, RetryPolicy, StopReason, should_retry};

// Re-export the shared protocol types users need.
pub use stratus_core::{Code, Status, SubscriptionEvent, TopicItem, TopicValue};
