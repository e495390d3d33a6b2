//! The call interceptor chain and retry loop.
//!
//! Every outbound call runs through [`CallPipeline::run`]:
//!
//! 1. resolve the bearer credential, failing fast before any network attempt
//!    if the token is expired or invalid;
//! 2. compute the effective deadline (minimum of the caller's deadline and
//!    the client default) and fail immediately if it is already spent;
//! 3. dispatch through the injected channel, racing the caller's
//!    cancellation signal and the deadline;
//! 4. emit one telemetry event per attempt to the injected observer;
//! 5. on failure, consult the retry engine and either wait out the returned
//!    delay (cancellably) and re-enter, or surface the error.
//!
//! Header-level cross-cutting concerns are expressed as [`Intercept`]
//! implementations; attaching the credential is the built-in first link of
//! the chain, and callers may append their own.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use http::HeaderMap;

use crate::auth::CredentialProvider;
use crate::call::CallDescriptor;
use crate::cancel::CancellationSignal;
use crate::channel::{BoxFuture, ChannelError};
use crate::config::{RetryDecision, RetryPolicy, RetryState, StopReason, should_retry};
use crate::error::ClientError;
use crate::telemetry::{CallEvent, CallObserver, CallOutcome};

/// Context handed to each interceptor before a request is dispatched.
#[derive(Debug)]
pub struct InterceptContext<'a> {
    /// The full method path being called.
    pub method: &'static str,
    /// Call metadata, mutable.
    pub headers: &'a mut HeaderMap,
}

impl<'a> InterceptContext<'a> {
    pub fn new(method: &'static str, headers: &'a mut HeaderMap) -> Self {
        Self { method, headers }
    }
}

/// A cross-cutting hook wrapped around every call.
///
/// Implementations can attach metadata, log, or abort the call by returning
/// an error from [`before_request`](Intercept::before_request).
pub trait Intercept: Send + Sync {
    /// Called before the request is dispatched. Runs once per logical call,
    /// not once per attempt; the prepared metadata is reused across retries.
    fn before_request(&self, ctx: &mut InterceptContext<'_>) -> Result<(), ClientError> {
        let _ = ctx;
        Ok(())
    }

    /// Called with the response metadata after a successful unary call.
    fn after_response(&self, headers: &HeaderMap) {
        let _ = headers;
    }
}

/// An interceptor that adds a fixed header to every request.
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
    name: http::HeaderName,
    value: http::HeaderValue,
}

impl HeaderInterceptor {
    /// Create a new header interceptor, failing on invalid name or value.
    pub fn new(name: &str, value: &str) -> Result<Self, ClientError> {
        let name = name
            .parse()
            .map_err(|_| ClientError::status(stratus_core::Code::InvalidArgument, format!("invalid header name: {name}")))?;
        let value = value
            .parse()
            .map_err(|_| ClientError::status(stratus_core::Code::InvalidArgument, format!("invalid header value: {value}")))?;
        Ok(Self { name, value })
    }

    /// Create a new header interceptor from pre-parsed parts.
    pub fn from_parts(name: http::HeaderName, value: http::HeaderValue) -> Self {
        Self { name, value }
    }
}

impl Intercept for HeaderInterceptor {
    fn before_request(&self, ctx: &mut InterceptContext<'_>) -> Result<(), ClientError> {
        ctx.headers.insert(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// The built-in first link: resolves the bearer credential at the moment of
/// use and attaches it as the `authorization` header. Fails the call before
/// any network attempt if the credential is expired.
pub(crate) struct AuthInterceptor {
    credentials: Arc<CredentialProvider>,
}

impl AuthInterceptor {
    pub(crate) fn new(credentials: Arc<CredentialProvider>) -> Self {
        Self { credentials }
    }
}

impl Intercept for AuthInterceptor {
    fn before_request(&self, ctx: &mut InterceptContext<'_>) -> Result<(), ClientError> {
        let bearer = self.credentials.bearer(SystemTime::now())?;
        ctx.headers
            .insert(http::header::AUTHORIZATION, bearer.header_value().clone());
        Ok(())
    }
}

/// Executes calls: interceptor chain, deadline bookkeeping, telemetry, and
/// the retry loop. One pipeline per client, shared by all calls.
pub(crate) struct CallPipeline {
    policy: Arc<RetryPolicy>,
    observer: Arc<dyn CallObserver>,
    chain: Vec<Arc<dyn Intercept>>,
    default_timeout: Duration,
}

impl CallPipeline {
    pub(crate) fn new(
        credentials: Arc<CredentialProvider>,
        policy: Arc<RetryPolicy>,
        observer: Arc<dyn CallObserver>,
        extra_interceptors: Vec<Arc<dyn Intercept>>,
        default_timeout: Duration,
    ) -> Self {
        let mut chain: Vec<Arc<dyn Intercept>> = vec![Arc::new(AuthInterceptor::new(credentials))];
        chain.extend(extra_interceptors);
        Self {
            policy,
            observer,
            chain,
            default_timeout,
        }
    }

    /// The effective timeout for a call: the caller's deadline clamped to the
    /// client default.
    pub(crate) fn effective_timeout(&self, descriptor: &CallDescriptor) -> Duration {
        match descriptor.deadline_override() {
            Some(deadline) => deadline.min(self.default_timeout),
            None => self.default_timeout,
        }
    }

    /// Run the interceptor chain and return the prepared call metadata.
    pub(crate) fn prepare_headers(&self, method: &'static str) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        let mut ctx = InterceptContext::new(method, &mut headers);
        for interceptor in &self.chain {
            interceptor.before_request(&mut ctx)?;
        }
        Ok(headers)
    }

    /// Hand response metadata back through the chain.
    pub(crate) fn notify_response(&self, headers: &HeaderMap) {
        for interceptor in self.chain.iter().rev() {
            interceptor.after_response(headers);
        }
    }

    /// Execute one logical call: dispatch, observe, retry.
    ///
    /// `dispatch` is invoked once per attempt with the prepared metadata and
    /// the call's absolute deadline; the channel implementation behind it
    /// owns the wire format. Suspends only while waiting on the network or
    /// waiting out a retry delay, and both waits abort promptly on
    /// cancellation.
    pub(crate) async fn run<T, F>(
        &self,
        descriptor: &CallDescriptor,
        cancel: CancellationSignal,
        dispatch: F,
    ) -> Result<T, ClientError>
    where
        F: Fn(HeaderMap, Instant) -> BoxFuture<'static, Result<T, ChannelError>>,
    {
        let mut cancel = cancel;
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let headers = self.prepare_headers(descriptor.kind().method_path())?;

        let timeout = self.effective_timeout(descriptor);
        if timeout.is_zero() {
            return Err(ClientError::DeadlineExceeded);
        }
        let deadline = Instant::now() + timeout;
        let sleep_deadline = tokio::time::Instant::from_std(deadline);

        let mut state = RetryState::new(Instant::now(), Some(deadline));

        loop {
            let attempt = state.attempts() + 1;
            let attempt_start = Instant::now();

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    self.emit(descriptor, attempt, CallOutcome::Cancelled, attempt_start);
                    return Err(ClientError::Cancelled);
                }
                _ = tokio::time::sleep_until(sleep_deadline) => {
                    self.emit(descriptor, attempt, CallOutcome::DeadlineExceeded, attempt_start);
                    return Err(ClientError::DeadlineExceeded);
                }
                result = dispatch(headers.clone(), deadline) => result,
            };

            match result {
                Ok(value) => {
                    self.emit(descriptor, attempt, CallOutcome::Success, attempt_start);
                    return Ok(value);
                }
                Err(error) => {
                    self.emit(
                        descriptor,
                        attempt,
                        CallOutcome::Failed(error.code()),
                        attempt_start,
                    );
                    state.record_attempt(error.code());

                    match should_retry(descriptor, &self.policy, &state, &error, Instant::now()) {
                        RetryDecision::RetryAfter(delay) => {
                            tracing::debug!(
                                error = %error,
                                attempt = state.attempts(),
                                delay_ms = delay.as_millis() as u64,
                                "retrying after transient failure"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        RetryDecision::Stop(reason) => {
                            return Err(surface(reason, error));
                        }
                    }
                }
            }
        }
    }

    fn emit(
        &self,
        descriptor: &CallDescriptor,
        attempt: u32,
        outcome: CallOutcome,
        started: Instant,
    ) {
        self.observer.on_call(CallEvent {
            kind: descriptor.kind(),
            attempt,
            outcome,
            latency: started.elapsed(),
        });
    }
}

/// Map a stop decision onto the error surfaced to the caller. The last
/// observed failure is surfaced verbatim, never a synthetic timeout.
pub(crate) fn surface(reason: StopReason, error: ChannelError) -> ClientError {
    match reason {
        StopReason::AmbiguousOutcome => ClientError::AmbiguousMutation {
            status: error.to_status(),
        },
        _ => match error {
            ChannelError::Status(status) => ClientError::Status(status),
            ChannelError::Connect(message) | ChannelError::Transport(message) => {
                ClientError::Connection(message)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use base64::Engine;
    use stratus_core::{Code, Status};

    use crate::call::OperationKind;
    use crate::cancel::cancellation;
    use crate::config::JitterStrategy;

    fn provider() -> Arc<CredentialProvider> {
        let token = base64::engine::general_purpose::STANDARD
            .encode(r#"{"endpoint":"test.stratus.dev","api_key":"key-123"}"#);
        Arc::new(CredentialProvider::from_string(token).unwrap())
    }

    fn expired_provider() -> Arc<CredentialProvider> {
        let token = base64::engine::general_purpose::STANDARD.encode(
            r#"{"endpoint":"test.stratus.dev","api_key":"key-123","valid_until":1000}"#,
        );
        Arc::new(CredentialProvider::from_string(token).unwrap())
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<CallEvent>>,
    }

    impl CallObserver for Recorder {
        fn on_call(&self, event: CallEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn pipeline_with(
        credentials: Arc<CredentialProvider>,
        policy: RetryPolicy,
        observer: Arc<Recorder>,
        timeout: Duration,
    ) -> CallPipeline {
        CallPipeline::new(credentials, Arc::new(policy), observer, Vec::new(), timeout)
    }

    fn fail_n_then_succeed(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl Fn(HeaderMap, Instant) -> BoxFuture<'static, Result<u32, ChannelError>> {
        move |_headers, _deadline| {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(ChannelError::Status(Status::unavailable("busy")))
                } else {
                    Ok(n)
                }
            })
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let observer = Arc::new(Recorder::default());
        let pipeline = pipeline_with(
            provider(),
            RetryPolicy::default(),
            observer.clone(),
            Duration::from_secs(5),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let result = pipeline
            .run(
                &CallDescriptor::new(OperationKind::Get),
                CancellationSignal::never(),
                fail_n_then_succeed(0, calls.clone()),
            )
            .await;

        assert_eq!(result.unwrap(), 1);
        let events = observer.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attempt, 1);
        assert_eq!(events[0].outcome, CallOutcome::Success);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds_with_telemetry() {
        let observer = Arc::new(Recorder::default());
        let base = Duration::from_millis(10);
        let policy = RetryPolicy::new()
            .max_attempts(3)
            .base_delay(base)
            .max_delay(Duration::from_millis(200));
        let pipeline = pipeline_with(provider(), policy, observer.clone(), Duration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));

        let started = Instant::now();
        let result = pipeline
            .run(
                &CallDescriptor::new(OperationKind::Get),
                CancellationSignal::never(),
                fail_n_then_succeed(2, calls.clone()),
            )
            .await;
        let elapsed = started.elapsed();

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Both backoff waits actually happened.
        assert!(elapsed >= 2 * base, "elapsed {elapsed:?}");
        assert!(elapsed <= 2 * Duration::from_millis(200) + Duration::from_secs(1));

        let events = observer.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].outcome, CallOutcome::Failed(Code::Unavailable));
        assert_eq!(events[1].outcome, CallOutcome::Failed(Code::Unavailable));
        assert_eq!(events[2].outcome, CallOutcome::Success);
        assert_eq!(events[2].attempt, 3);
    }

    #[tokio::test]
    async fn test_exhausted_surfaces_last_status_verbatim() {
        let observer = Arc::new(Recorder::default());
        let policy = RetryPolicy::new()
            .max_attempts(2)
            .base_delay(Duration::from_millis(1))
            .jitter(JitterStrategy::None);
        let pipeline = pipeline_with(provider(), policy, observer.clone(), Duration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<u32, _> = pipeline
            .run(
                &CallDescriptor::new(OperationKind::Get),
                CancellationSignal::never(),
                fail_n_then_succeed(10, calls.clone()),
            )
            .await;

        match result {
            Err(ClientError::Status(status)) => {
                assert_eq!(status.code(), Code::Unavailable);
                assert_eq!(status.message(), Some("busy"));
            }
            other => panic!("expected the last status verbatim, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_deadline_fails_without_dispatch() {
        let observer = Arc::new(Recorder::default());
        let pipeline = pipeline_with(
            provider(),
            RetryPolicy::default(),
            observer.clone(),
            Duration::from_secs(5),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let descriptor = CallDescriptor::new(OperationKind::Get).deadline(Duration::ZERO);
        let result: Result<u32, _> = pipeline
            .run(
                &descriptor,
                CancellationSignal::never(),
                fail_n_then_succeed(0, calls.clone()),
            )
            .await;

        assert!(matches!(result, Err(ClientError::DeadlineExceeded)));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "channel must not be contacted");
    }

    #[tokio::test]
    async fn test_expired_credential_fails_without_dispatch() {
        let observer = Arc::new(Recorder::default());
        let pipeline = pipeline_with(
            expired_provider(),
            RetryPolicy::default(),
            observer.clone(),
            Duration::from_secs(5),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<u32, _> = pipeline
            .run(
                &CallDescriptor::new(OperationKind::Get),
                CancellationSignal::never(),
                fail_n_then_succeed(0, calls.clone()),
            )
            .await;

        assert!(matches!(result, Err(ClientError::Expired)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_idempotent_ambiguous_failure_surfaces_immediately() {
        let observer = Arc::new(Recorder::default());
        let pipeline = pipeline_with(
            provider(),
            RetryPolicy::default(),
            observer.clone(),
            Duration::from_secs(5),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<u32, _> = pipeline
            .run(
                &CallDescriptor::new(OperationKind::Increment),
                CancellationSignal::never(),
                move |_headers, _deadline| {
                    let calls = calls_in.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(ChannelError::Transport("reset mid-flight".into()))
                    })
                },
            )
            .await;

        assert!(matches!(result, Err(ClientError::AmbiguousMutation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "must not retry");
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff() {
        let observer = Arc::new(Recorder::default());
        let policy = RetryPolicy::new()
            .max_attempts(5)
            .base_delay(Duration::from_secs(60))
            .jitter(JitterStrategy::None);
        let pipeline = pipeline_with(provider(), policy, observer.clone(), Duration::from_secs(600));
        let calls = Arc::new(AtomicU32::new(0));

        let (handle, signal) = cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let result: Result<u32, _> = pipeline
            .run(
                &CallDescriptor::new(OperationKind::Get),
                signal,
                fail_n_then_succeed(10, calls.clone()),
            )
            .await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The 60s backoff wait must have been abandoned promptly.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_during_network_wait() {
        let observer = Arc::new(Recorder::default());
        let pipeline = pipeline_with(
            provider(),
            RetryPolicy::default(),
            observer.clone(),
            Duration::from_millis(50),
        );

        let started = Instant::now();
        let result: Result<u32, _> = pipeline
            .run(
                &CallDescriptor::new(OperationKind::Get),
                CancellationSignal::never(),
                |_headers, _deadline| Box::pin(std::future::pending()),
            )
            .await;

        assert!(matches!(result, Err(ClientError::DeadlineExceeded)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_auth_header_attached() {
        let observer = Arc::new(Recorder::default());
        let pipeline = pipeline_with(
            provider(),
            RetryPolicy::default(),
            observer.clone(),
            Duration::from_secs(5),
        );

        let seen = Arc::new(Mutex::new(None));
        let seen_in = seen.clone();
        let result = pipeline
            .run(
                &CallDescriptor::new(OperationKind::Get),
                CancellationSignal::never(),
                move |headers, _deadline| {
                    let seen = seen_in.clone();
                    Box::pin(async move {
                        *seen.lock().unwrap() = Some(headers);
                        Ok(())
                    })
                },
            )
            .await;

        assert!(result.is_ok());
        let headers = seen.lock().unwrap().take().unwrap();
        assert_eq!(
            headers.get(http::header::AUTHORIZATION).unwrap(),
            "key-123"
        );
    }

    #[tokio::test]
    async fn test_extra_interceptors_run_after_auth() {
        let observer = Arc::new(Recorder::default());
        let extra: Vec<Arc<dyn Intercept>> = vec![Arc::new(
            HeaderInterceptor::new("x-request-source", "tests").unwrap(),
        )];
        let pipeline = CallPipeline::new(
            provider(),
            Arc::new(RetryPolicy::default()),
            observer,
            extra,
            Duration::from_secs(5),
        );

        let headers = pipeline.prepare_headers("cache_client.Scs/Get").unwrap();
        assert!(headers.contains_key(http::header::AUTHORIZATION));
        assert_eq!(headers.get("x-request-source").unwrap(), "tests");
    }
}
