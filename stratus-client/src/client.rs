//! The client facade.
//!
//! [`StratusClient`] is the public entry point: it owns the injected channel,
//! the parsed credentials, the retry policy and the observer, and turns each
//! public method into a [`CallDescriptor`] run through the call pipeline.
//! The client is cheaply cloneable; clones share the same channel and
//! configuration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::HeaderValue;
use stratus_core::{Code, TopicValue};

use crate::auth::{CredentialProvider, DisposableToken};
use crate::builder::ClientBuilder;
use crate::call::{CallDescriptor, OperationKind};
use crate::cancel::CancellationSignal;
use crate::channel::{PublishRequest, RpcChannel, TokenRequest, UnaryRequest, UnaryResponse};
use crate::config::SubscriptionConfig;
use crate::error::ClientError;
use crate::interceptor::CallPipeline;
use crate::subscription::{self, Subscription};
use crate::telemetry::CallObserver;

/// Metadata key carrying the cache name, read by the channel.
pub(crate) const CACHE_NAME_HEADER: &str = "cache";

/// Client for the Stratus cache and pub/sub service.
///
/// # Example
///
/// ```no_run
/// # async fn example(channel: std::sync::Arc<dyn stratus_client::RpcChannel>) -> Result<(), Box<dyn std::error::Error>> {
/// use stratus_client::{CallDescriptor, OperationKind, StratusClient};
///
/// let client = StratusClient::builder(channel)
///     .auth_token(std::env::var("STRATUS_TOKEN")?)
///     .build()?;
///
/// let descriptor = CallDescriptor::new(OperationKind::Get);
/// let response = client.send("my-cache", descriptor, b"serialized-get".as_slice()).await?;
/// println!("{} bytes", response.payload.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StratusClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    channel: Arc<dyn RpcChannel>,
    credentials: Arc<CredentialProvider>,
    pipeline: Arc<CallPipeline>,
    observer: Arc<dyn CallObserver>,
    subscriptions: SubscriptionConfig,
    shut_down: AtomicBool,
}

impl StratusClient {
    /// Start building a client around an injected channel.
    pub fn builder(channel: Arc<dyn RpcChannel>) -> ClientBuilder {
        ClientBuilder::new(channel)
    }

    pub(crate) fn from_parts(
        channel: Arc<dyn RpcChannel>,
        credentials: Arc<CredentialProvider>,
        pipeline: Arc<CallPipeline>,
        observer: Arc<dyn CallObserver>,
        subscriptions: SubscriptionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                channel,
                credentials,
                pipeline,
                observer,
                subscriptions,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// The validated credentials this client was built with, exposing the
    /// decoded endpoints.
    pub fn credential_provider(&self) -> &CredentialProvider {
        &self.inner.credentials
    }

    /// Dispatch a unary cache operation with an opaque, pre-serialized
    /// payload. The stub layer behind the channel owns the wire format.
    pub async fn send(
        &self,
        cache_name: &str,
        descriptor: CallDescriptor,
        payload: impl Into<Bytes>,
    ) -> Result<UnaryResponse, ClientError> {
        self.send_with_cancellation(cache_name, descriptor, payload, CancellationSignal::never())
            .await
    }

    /// As [`send`](Self::send), observing the given cancellation signal at
    /// every suspension point.
    pub async fn send_with_cancellation(
        &self,
        cache_name: &str,
        descriptor: CallDescriptor,
        payload: impl Into<Bytes>,
        cancel: CancellationSignal,
    ) -> Result<UnaryResponse, ClientError> {
        let cache_name = cache_header(cache_name)?;
        let payload = payload.into();
        let channel = self.inner.channel.clone();
        let method = descriptor.kind().method_path();

        let response = self
            .inner
            .pipeline
            .run(&descriptor, cancel, move |mut metadata, deadline| {
                metadata.insert(CACHE_NAME_HEADER, cache_name.clone());
                channel.unary(UnaryRequest {
                    method,
                    payload: payload.clone(),
                    metadata,
                    deadline,
                })
            })
            .await?;

        self.inner.pipeline.notify_response(&response.metadata);
        Ok(response)
    }

    /// Publish one value to a topic.
    ///
    /// Publishes are non-idempotent: a failure after the request was sent
    /// surfaces as [`ClientError::AmbiguousMutation`] rather than being
    /// silently re-issued.
    pub async fn publish(
        &self,
        cache_name: &str,
        topic: &str,
        value: impl Into<TopicValue>,
    ) -> Result<(), ClientError> {
        let descriptor = CallDescriptor::new(OperationKind::TopicPublish);
        let cache_name = cache_name.to_string();
        let topic = topic.to_string();
        let value = value.into();
        let channel = self.inner.channel.clone();

        self.inner
            .pipeline
            .run(
                &descriptor,
                CancellationSignal::never(),
                move |metadata, deadline| {
                    channel.publish(PublishRequest {
                        cache_name: cache_name.clone(),
                        topic: topic.clone(),
                        value: value.clone(),
                        metadata,
                        deadline,
                    })
                },
            )
            .await
    }

    /// Subscribe to a topic.
    ///
    /// Returns immediately with the subscription in `Connecting` state; the
    /// driver task establishes the stream and keeps it alive across breaks
    /// until the subscription is cancelled or the credential stops working.
    pub fn subscribe(&self, cache_name: &str, topic: &str) -> Subscription {
        subscription::spawn(
            self.inner.channel.clone(),
            self.inner.pipeline.clone(),
            self.inner.observer.clone(),
            self.inner.subscriptions.clone(),
            cache_name.to_string(),
            topic.to_string(),
        )
    }

    /// Mint a disposable, scope-restricted token valid for `valid_for`.
    pub async fn generate_disposable_token(
        &self,
        valid_for: Duration,
        scope: Option<String>,
    ) -> Result<DisposableToken, ClientError> {
        let descriptor = CallDescriptor::new(OperationKind::GenerateDisposableToken);
        let channel = self.inner.channel.clone();
        let request_scope = scope.clone();

        let grant = self
            .inner
            .pipeline
            .run(
                &descriptor,
                CancellationSignal::never(),
                move |metadata, deadline| {
                    channel.issue_token(TokenRequest {
                        valid_for,
                        scope: request_scope.clone(),
                        metadata,
                        deadline,
                    })
                },
            )
            .await?;

        DisposableToken::from_grant(grant, scope)
    }

    /// Shut the client down, releasing the channel's connections. Safe to
    /// call from any clone; the channel is closed exactly once.
    pub async fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::SeqCst) {
            self.inner.channel.shutdown().await;
        }
    }
}

fn cache_header(cache_name: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(cache_name).map_err(|_| {
        ClientError::status(
            Code::InvalidArgument,
            format!("invalid cache name: {cache_name:?}"),
        )
    })
}
