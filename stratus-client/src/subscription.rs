//! Topic subscriptions: a reconnecting server-stream state machine.
//!
//! One [`Subscription`] represents one logical subscription to a topic. Under
//! the hood a driver task owns the server stream and walks the state machine
//!
//! ```text
//! CONNECTING -> ACTIVE <-> RECONNECTING
//!      \            \         /
//!       +------------+-- CLOSED
//! ```
//!
//! Transient stream breaks never reach the caller: the driver reopens the
//! stream with the last-observed sequence position, backing off through the
//! same retry engine as unary calls (unbounded attempts, capped delay). The
//! only errors a subscription surfaces before close are fatal authentication
//! failures. Delivery is at-least-once across a reconnect: the item at the
//! resume boundary may be delivered twice, anything older never is.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::call::{CallDescriptor, OperationKind};
use crate::cancel::{CancellationHandle, CancellationSignal, cancellation};
use crate::channel::{ChannelError, EventStream, RpcChannel, SubscribeRequest};
use crate::config::{RetryDecision, RetryState, SubscriptionConfig, should_retry};
use crate::error::ClientError;
use crate::interceptor::{CallPipeline, surface};
use crate::telemetry::{CallEvent, CallObserver, CallOutcome};
use stratus_core::SubscriptionEvent;

/// Size of the delivery buffer between the driver and the caller. When the
/// caller falls behind, the driver applies backpressure rather than dropping
/// items.
const DELIVERY_BUFFER: usize = 256;

/// Where a subscription currently is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// The initial stream open is in progress.
    Connecting,
    /// The stream is up and items are flowing.
    Active,
    /// The stream broke; the driver is reopening it.
    Reconnecting,
    /// Terminal. Reached by unsubscribe, caller drop, or a fatal
    /// authentication failure.
    Closed,
}

/// A live subscription to one topic.
///
/// Implements [`Stream`]; each item is a delivered [`SubscriptionEvent`] or,
/// exactly once and only for fatal failures, an error. The stream ends after
/// close.
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// cancels the driver task and closes the logical subscription.
#[derive(Debug)]
pub struct Subscription {
    cache_name: String,
    topic: String,
    events: mpsc::Receiver<Result<SubscriptionEvent, ClientError>>,
    status: watch::Receiver<SubscriptionStatus>,
    cancel: CancellationHandle,
}

impl Subscription {
    /// The cache this subscription belongs to.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// The topic being consumed.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SubscriptionStatus {
        *self.status.borrow()
    }

    /// A watch receiver for observing status transitions, e.g. to notice
    /// `Reconnecting` and pause publishing work.
    pub fn status_stream(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }

    /// Receive the next delivered event.
    pub async fn next_event(&mut self) -> Option<Result<SubscriptionEvent, ClientError>> {
        self.events.recv().await
    }

    /// End the subscription. The driver observes the cancellation at its next
    /// suspension point and transitions to `Closed`; no further reconnect is
    /// attempted.
    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for Subscription {
    type Item = Result<SubscriptionEvent, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Whether an incoming item should reach the caller, given the current
/// resume position. Items older than the position are replays the caller has
/// already seen; the boundary item itself is allowed through (at-least-once).
fn should_deliver(resume_at: Option<u64>, sequence: u64) -> bool {
    match resume_at {
        Some(position) => sequence >= position,
        None => true,
    }
}

/// Spawn the driver task for one subscription and hand back the caller's
/// handle.
pub(crate) fn spawn(
    channel: Arc<dyn RpcChannel>,
    pipeline: Arc<CallPipeline>,
    observer: Arc<dyn CallObserver>,
    config: SubscriptionConfig,
    cache_name: String,
    topic: String,
) -> Subscription {
    let (events_tx, events_rx) = mpsc::channel(DELIVERY_BUFFER);
    let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);
    let (cancel_handle, cancel_signal) = cancellation();

    let driver = Driver {
        channel,
        pipeline,
        observer,
        config,
        descriptor: CallDescriptor::new(OperationKind::TopicSubscribe),
        cache_name: cache_name.clone(),
        topic: topic.clone(),
        resume_at: None,
        events: events_tx,
        status: status_tx,
        cancel: cancel_signal,
    };
    tokio::spawn(driver.run());

    Subscription {
        cache_name,
        topic,
        events: events_rx,
        status: status_rx,
        cancel: cancel_handle,
    }
}

enum Open {
    Stream(EventStream),
    Cancelled,
    Fatal(ClientError),
    Transient(ChannelError),
}

enum Pump {
    Cancelled,
    ReceiverDropped,
    StreamBroken,
    Fatal(ClientError),
}

struct Driver {
    channel: Arc<dyn RpcChannel>,
    pipeline: Arc<CallPipeline>,
    observer: Arc<dyn CallObserver>,
    config: SubscriptionConfig,
    descriptor: CallDescriptor,
    cache_name: String,
    topic: String,
    resume_at: Option<u64>,
    events: mpsc::Sender<Result<SubscriptionEvent, ClientError>>,
    status: watch::Sender<SubscriptionStatus>,
    cancel: CancellationSignal,
}

impl Driver {
    async fn run(mut self) {
        let mut reconnecting = false;
        loop {
            let stream = match self.connect(reconnecting).await {
                Ok(stream) => stream,
                Err(Some(error)) => {
                    let _ = self.events.send(Err(error)).await;
                    return self.close();
                }
                Err(None) => return self.close(),
            };

            if reconnecting {
                tracing::info!(
                    cache = %self.cache_name,
                    topic = %self.topic,
                    resume_at = ?self.resume_at,
                    "subscription stream restored"
                );
            }
            let _ = self.status.send(SubscriptionStatus::Active);

            match self.pump(stream).await {
                Pump::Cancelled | Pump::ReceiverDropped => return self.close(),
                Pump::Fatal(error) => {
                    let _ = self.events.send(Err(error)).await;
                    return self.close();
                }
                Pump::StreamBroken => {
                    reconnecting = true;
                    let _ = self.status.send(SubscriptionStatus::Reconnecting);
                }
            }
        }
    }

    /// Open the stream, retrying with backoff until it comes up, the caller
    /// cancels, or the failure is one retrying cannot fix.
    ///
    /// `Err(Some(_))` carries an error to surface before closing; `Err(None)`
    /// means close silently (cancellation).
    async fn connect(&mut self, reconnecting: bool) -> Result<EventStream, Option<ClientError>> {
        let mut state = RetryState::new(Instant::now(), None);
        loop {
            if self.cancel.is_cancelled() {
                return Err(None);
            }

            let attempt = state.attempts() + 1;
            let attempt_start = Instant::now();
            match self.open_stream().await {
                Open::Stream(stream) => {
                    self.emit(attempt, CallOutcome::Success, attempt_start);
                    return Ok(stream);
                }
                Open::Cancelled => {
                    self.emit(attempt, CallOutcome::Cancelled, attempt_start);
                    return Err(None);
                }
                Open::Fatal(error) => return Err(Some(error)),
                Open::Transient(error) => {
                    self.emit(attempt, CallOutcome::Failed(error.code()), attempt_start);
                    state.record_attempt(error.code());

                    let decision = should_retry(
                        &self.descriptor,
                        &self.config.reconnect,
                        &state,
                        &error,
                        Instant::now(),
                    );
                    match decision {
                        RetryDecision::RetryAfter(delay) => {
                            tracing::debug!(
                                cache = %self.cache_name,
                                topic = %self.topic,
                                error = %error,
                                attempt = state.attempts(),
                                delay_ms = delay.as_millis() as u64,
                                reconnecting,
                                "subscription stream open failed, backing off"
                            );
                            let mut cancel = self.cancel.clone();
                            tokio::select! {
                                _ = cancel.cancelled() => return Err(None),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        RetryDecision::Stop(reason) => {
                            return Err(Some(surface(reason, error)));
                        }
                    }
                }
            }
        }
    }

    /// One attempt to open the server stream, carrying the resume position
    /// and freshly resolved credentials.
    async fn open_stream(&mut self) -> Open {
        let headers = match self
            .pipeline
            .prepare_headers(OperationKind::TopicSubscribe.method_path())
        {
            Ok(headers) => headers,
            // Credential resolution failures are fatal: reconnecting cannot
            // refresh an expired token.
            Err(error) => return Open::Fatal(error),
        };

        let request = SubscribeRequest {
            cache_name: self.cache_name.clone(),
            topic: self.topic.clone(),
            resume_at_sequence: self.resume_at,
            metadata: headers,
        };

        let open_timeout = self.pipeline.effective_timeout(&self.descriptor);
        let mut cancel = self.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Open::Cancelled,
            _ = tokio::time::sleep(open_timeout) => {
                return Open::Transient(ChannelError::Connect(
                    "timed out waiting for the subscription stream to open".into(),
                ));
            }
            outcome = self.channel.open_subscription(request) => outcome,
        };

        match outcome {
            Ok(stream) => Open::Stream(stream),
            Err(error) => Open::Transient(error),
        }
    }

    /// Consume the stream until it breaks, the caller cancels, or the server
    /// reports a fatal failure. Every event resets the inactivity timer.
    async fn pump(&mut self, mut stream: EventStream) -> Pump {
        let mut cancel = self.cancel.clone();
        let idle = tokio::time::sleep(self.config.inactivity_timeout);
        tokio::pin!(idle);

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Pump::Cancelled,
                () = &mut idle => {
                    tracing::warn!(
                        cache = %self.cache_name,
                        topic = %self.topic,
                        window_ms = self.config.inactivity_timeout.as_millis() as u64,
                        "no message within the inactivity window, treating stream as broken"
                    );
                    return Pump::StreamBroken;
                }
                event = stream.next() => event,
            };
            idle.as_mut()
                .reset(tokio::time::Instant::now() + self.config.inactivity_timeout);

            match event {
                Some(Ok(SubscriptionEvent::Heartbeat)) => {
                    tracing::trace!(cache = %self.cache_name, topic = %self.topic, "heartbeat");
                }
                Some(Ok(SubscriptionEvent::Item(item))) => {
                    if !should_deliver(self.resume_at, item.sequence) {
                        tracing::trace!(
                            cache = %self.cache_name,
                            topic = %self.topic,
                            sequence = item.sequence,
                            "dropping already-delivered item"
                        );
                        continue;
                    }
                    self.resume_at = Some(item.sequence);
                    if let Some(pump) = self.deliver(SubscriptionEvent::Item(item)).await {
                        return pump;
                    }
                }
                Some(Ok(SubscriptionEvent::Discontinuity {
                    last_sequence,
                    new_sequence,
                })) => {
                    self.resume_at = Some(new_sequence);
                    let event = SubscriptionEvent::Discontinuity {
                        last_sequence,
                        new_sequence,
                    };
                    if let Some(pump) = self.deliver(event).await {
                        return pump;
                    }
                }
                Some(Err(status)) => {
                    if status.code().is_auth_failure() {
                        return Pump::Fatal(ClientError::Status(status));
                    }
                    tracing::warn!(
                        cache = %self.cache_name,
                        topic = %self.topic,
                        error = %status,
                        "subscription stream error, reconnecting"
                    );
                    return Pump::StreamBroken;
                }
                None => {
                    tracing::debug!(
                        cache = %self.cache_name,
                        topic = %self.topic,
                        "server ended the subscription stream, reconnecting"
                    );
                    return Pump::StreamBroken;
                }
            }
        }
    }

    /// Forward one event to the caller, staying responsive to cancellation
    /// while the delivery buffer is full. Returns the pump outcome to bubble
    /// up, or `None` to keep pumping.
    async fn deliver(&mut self, event: SubscriptionEvent) -> Option<Pump> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Some(Pump::Cancelled),
            sent = self.events.send(Ok(event)) => match sent {
                Ok(()) => None,
                Err(_) => Some(Pump::ReceiverDropped),
            },
        }
    }

    fn emit(&self, attempt: u32, outcome: CallOutcome, started: Instant) {
        self.observer.on_call(CallEvent {
            kind: OperationKind::TopicSubscribe,
            attempt,
            outcome,
            latency: started.elapsed(),
        });
    }

    fn close(&self) {
        let _ = self.status.send(SubscriptionStatus::Closed);
        tracing::debug!(cache = %self.cache_name, topic = %self.topic, "subscription closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_deliver_before_any_position() {
        assert!(should_deliver(None, 0));
        assert!(should_deliver(None, 42));
    }

    #[test]
    fn test_should_deliver_filters_replays() {
        // Items strictly older than the resume position never reach the
        // caller again.
        assert!(!should_deliver(Some(3), 1));
        assert!(!should_deliver(Some(3), 2));
        // The boundary item may be redelivered (at-least-once), and newer
        // items always flow.
        assert!(should_deliver(Some(3), 3));
        assert!(should_deliver(Some(3), 4));
    }

    #[test]
    fn test_status_is_copy_eq() {
        let status = SubscriptionStatus::Reconnecting;
        let copy = status;
        assert_eq!(status, copy);
        assert_ne!(SubscriptionStatus::Active, SubscriptionStatus::Closed);
    }
}
