//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`StratusClient`].
//! All configuration is validated in [`build`](ClientBuilder::build) and
//! immutable afterwards; an invalid token or inconsistent policy fails the
//! build rather than the first call.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialProvider;
use crate::channel::RpcChannel;
use crate::client::StratusClient;
use crate::config::{RetryPolicy, SubscriptionConfig};
use crate::error::ClientError;
use crate::interceptor::{CallPipeline, Intercept};
use crate::telemetry::{CallObserver, NoopObserver};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Builder for [`StratusClient`].
///
/// # Example
///
/// ```no_run
/// # fn example(channel: std::sync::Arc<dyn stratus_client::RpcChannel>) -> Result<(), Box<dyn std::error::Error>> {
/// use std::time::Duration;
/// use stratus_client::{RetryPolicy, StratusClient};
///
/// let client = StratusClient::builder(channel)
///     .auth_token(std::env::var("STRATUS_TOKEN")?)
///     .timeout(Duration::from_secs(5))
///     .retry_policy(RetryPolicy::new().max_attempts(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    channel: Arc<dyn RpcChannel>,
    raw_token: Option<String>,
    credentials: Option<CredentialProvider>,
    default_timeout: Duration,
    retry_policy: RetryPolicy,
    subscriptions: SubscriptionConfig,
    observer: Arc<dyn CallObserver>,
    interceptors: Vec<Arc<dyn Intercept>>,
}

impl ClientBuilder {
    /// Create a builder around an injected channel.
    pub fn new(channel: Arc<dyn RpcChannel>) -> Self {
        Self {
            channel,
            raw_token: None,
            credentials: None,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            subscriptions: SubscriptionConfig::default(),
            observer: Arc::new(NoopObserver),
            interceptors: Vec::new(),
        }
    }

    /// Authenticate with a raw token string. Parsed and validated at build
    /// time.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.raw_token = Some(token.into());
        self
    }

    /// Authenticate with an already-parsed credential provider. Takes
    /// precedence over [`auth_token`](Self::auth_token).
    pub fn credentials(mut self, credentials: CredentialProvider) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the default per-request timeout. Per-call deadlines are clamped
    /// to this value.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the retry policy for unary calls.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the subscription inactivity window: a stream silent for this long
    /// (heartbeats included) is treated as broken and reopened.
    pub fn subscription_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.subscriptions.inactivity_timeout = timeout;
        self
    }

    /// Cap the delay between subscription reconnect attempts.
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.subscriptions.reconnect.max_delay = delay;
        self
    }

    /// Replace the whole subscription reconnect policy.
    pub fn reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.subscriptions.reconnect = policy;
        self
    }

    /// Install a telemetry observer. Defaults to a no-op.
    pub fn observer(mut self, observer: impl CallObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Append a header-level interceptor, applied to every call after the
    /// built-in credential attachment.
    pub fn with_interceptor(mut self, interceptor: impl Intercept + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<StratusClient, ClientBuildError> {
        let credentials = match (self.credentials, self.raw_token) {
            (Some(credentials), _) => credentials,
            (None, Some(raw)) => CredentialProvider::from_string(raw)?,
            (None, None) => return Err(ClientBuildError::MissingCredentials),
        };
        let credentials = Arc::new(credentials);

        if self.default_timeout.is_zero() {
            return Err(ClientBuildError::InvalidConfiguration(
                "request timeout must be non-zero",
            ));
        }
        self.retry_policy
            .validate()
            .map_err(ClientBuildError::InvalidConfiguration)?;
        self.subscriptions
            .validate()
            .map_err(ClientBuildError::InvalidConfiguration)?;

        let policy = Arc::new(self.retry_policy);
        let observer: Arc<dyn CallObserver> = self.observer;
        let pipeline = Arc::new(CallPipeline::new(
            credentials.clone(),
            policy,
            observer.clone(),
            self.interceptors,
            self.default_timeout,
        ));

        Ok(StratusClient::from_parts(
            self.channel,
            credentials,
            pipeline,
            observer,
            self.subscriptions,
        ))
    }
}

/// Errors from [`ClientBuilder::build`].
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// Neither a token nor a credential provider was supplied.
    #[error("no credentials configured")]
    MissingCredentials,

    /// The supplied token failed to parse.
    #[error(transparent)]
    InvalidToken(#[from] ClientError),

    /// A policy or timeout failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use base64::Engine;

    use crate::channel::{
        BoxFuture, ChannelError, EventStream, PublishRequest, SubscribeRequest, TokenGrant,
        TokenRequest, UnaryRequest, UnaryResponse,
    };

    struct NullChannel;

    impl RpcChannel for NullChannel {
        fn unary(
            &self,
            _request: UnaryRequest,
        ) -> BoxFuture<'static, Result<UnaryResponse, ChannelError>> {
            Box::pin(async { Err(ChannelError::Connect("unwired".into())) })
        }

        fn publish(
            &self,
            _request: PublishRequest,
        ) -> BoxFuture<'static, Result<(), ChannelError>> {
            Box::pin(async { Err(ChannelError::Connect("unwired".into())) })
        }

        fn open_subscription(
            &self,
            _request: SubscribeRequest,
        ) -> BoxFuture<'static, Result<EventStream, ChannelError>> {
            Box::pin(async { Err(ChannelError::Connect("unwired".into())) })
        }

        fn issue_token(
            &self,
            _request: TokenRequest,
        ) -> BoxFuture<'static, Result<TokenGrant, ChannelError>> {
            Box::pin(async { Err(ChannelError::Connect("unwired".into())) })
        }

        fn shutdown(&self) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    fn valid_token() -> String {
        base64::engine::general_purpose::STANDARD
            .encode(r#"{"endpoint":"test.stratus.dev","api_key":"key-123"}"#)
    }

    #[test]
    fn test_build_requires_credentials() {
        let result = ClientBuilder::new(Arc::new(NullChannel)).build();
        assert!(matches!(result, Err(ClientBuildError::MissingCredentials)));
    }

    #[test]
    fn test_build_rejects_invalid_token() {
        let result = ClientBuilder::new(Arc::new(NullChannel))
            .auth_token("not a token")
            .build();
        assert!(matches!(result, Err(ClientBuildError::InvalidToken(_))));
    }

    #[test]
    fn test_build_rejects_invalid_policy() {
        let result = ClientBuilder::new(Arc::new(NullChannel))
            .auth_token(valid_token())
            .retry_policy(RetryPolicy::new().max_attempts(0))
            .build();
        assert!(matches!(
            result,
            Err(ClientBuildError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_build_rejects_zero_timeout() {
        let result = ClientBuilder::new(Arc::new(NullChannel))
            .auth_token(valid_token())
            .timeout(Duration::ZERO)
            .build();
        assert!(matches!(
            result,
            Err(ClientBuildError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_build_happy_path() {
        static OBSERVED: AtomicU32 = AtomicU32::new(0);
        struct CountObserver;
        impl CallObserver for CountObserver {
            fn on_call(&self, _event: crate::telemetry::CallEvent) {
                OBSERVED.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let client = ClientBuilder::new(Arc::new(NullChannel))
            .auth_token(valid_token())
            .timeout(Duration::from_secs(3))
            .retry_policy(RetryPolicy::new().max_attempts(2))
            .subscription_inactivity_timeout(Duration::from_secs(10))
            .reconnect_max_delay(Duration::from_secs(5))
            .observer(CountObserver)
            .build()
            .unwrap();

        assert_eq!(
            client.credential_provider().cache_endpoint(),
            "cache.test.stratus.dev"
        );
    }
}
