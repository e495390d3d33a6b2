//! Retry policy and the retry decision engine.
//!
//! The engine is a pure function: given a call descriptor, a policy, the
//! call's private [`RetryState`], the failure that just happened, and the
//! current instant, [`should_retry`] answers either "wait this long, then
//! re-issue" or "stop, for this reason". It never sleeps and never touches
//! the network; the caller owns the (cancellable) wait.
//!
//! # Backoff shape
//!
//! Delays grow exponentially: `base * multiplier^(attempt - 1)`, capped at
//! the policy ceiling. Jitter adds a uniformly random amount in
//! `[0, computed delay]` on top, so concurrent clients that failed together
//! do not retry together; the jittered delay is still capped at the ceiling.
//!
//! # Idempotency
//!
//! Idempotent calls retry on any status in the policy's retryable set, and
//! on connection or transport failures. Non-idempotent calls retry only when
//! the failure proves the request never executed (a connection-establishment
//! failure); any ambiguous failure stops the loop immediately, trading
//! availability for correctness.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use stratus_core::Code;

use crate::call::{CallDescriptor, Idempotency, OperationKind, RetryEligibility};
use crate::channel::ChannelError;

/// Default policy values.
pub mod defaults {
    use std::time::Duration;

    use stratus_core::Code;

    /// Default maximum number of attempts, including the first.
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Default delay before the first retry (pre-jitter).
    pub const BASE_DELAY: Duration = Duration::from_millis(100);

    /// Default multiplier for exponential backoff.
    pub const MULTIPLIER: f64 = 2.0;

    /// Default ceiling on any single retry delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(5);

    /// Base delay for subscription reconnects.
    pub const SUBSCRIPTION_BASE_DELAY: Duration = Duration::from_millis(500);

    /// Ceiling on subscription reconnect delays; keeps reconnect attempts
    /// bounded in frequency even after long outages.
    pub const SUBSCRIPTION_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Default set of retryable status codes.
    pub const RETRYABLE_CODES: [Code; 3] =
        [Code::Unavailable, Code::ResourceExhausted, Code::Aborted];
}

/// How jitter is applied to computed delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Add a uniform random amount in `[0, computed delay]`.
    #[default]
    Full,
    /// No randomization. Useful in tests; do not use with fleets of clients.
    None,
}

/// Configuration for retry behavior.
///
/// Immutable after client construction and shared read-only across all
/// concurrent calls.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stratus_client::RetryPolicy;
///
/// let policy = RetryPolicy::new()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(50))
///     .max_delay(Duration::from_secs(2));
/// ```
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum attempts including the first; `None` means unlimited.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry, pre-jitter.
    pub base_delay: Duration,
    /// Exponential growth factor. Must be >= 1.0.
    pub multiplier: f64,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    retryable_codes: Vec<Code>,
    overrides: HashMap<OperationKind, RetryPolicy>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(defaults::MAX_ATTEMPTS),
            base_delay: defaults::BASE_DELAY,
            multiplier: defaults::MULTIPLIER,
            jitter: JitterStrategy::Full,
            max_delay: defaults::MAX_DELAY,
            retryable_codes: defaults::RETRYABLE_CODES.to_vec(),
            overrides: HashMap::new(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            ..Default::default()
        }
    }

    /// The policy subscriptions reconnect under: unlimited attempts, a
    /// higher base delay, a capped ceiling, and every status except
    /// authentication failures considered survivable. A subscription keeps
    /// trying until it is cancelled or its credential stops working.
    pub fn subscription() -> Self {
        let retryable_codes = [
            Code::Canceled,
            Code::Unknown,
            Code::InvalidArgument,
            Code::DeadlineExceeded,
            Code::NotFound,
            Code::AlreadyExists,
            Code::ResourceExhausted,
            Code::FailedPrecondition,
            Code::Aborted,
            Code::OutOfRange,
            Code::Unimplemented,
            Code::Internal,
            Code::Unavailable,
            Code::DataLoss,
        ]
        .to_vec();

        Self {
            max_attempts: None,
            base_delay: defaults::SUBSCRIPTION_BASE_DELAY,
            max_delay: defaults::SUBSCRIPTION_MAX_DELAY,
            retryable_codes,
            ..Default::default()
        }
    }

    /// Set the maximum number of attempts, including the first.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Remove the attempt bound entirely; only the deadline stops the loop.
    pub fn unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter strategy.
    pub fn jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the ceiling on any single delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Replace the set of retryable status codes.
    pub fn retryable_codes(mut self, codes: impl IntoIterator<Item = Code>) -> Self {
        self.retryable_codes = codes.into_iter().collect();
        self
    }

    /// Add one status code to the retryable set.
    pub fn also_retry_on(mut self, code: Code) -> Self {
        if !self.retryable_codes.contains(&code) {
            self.retryable_codes.push(code);
        }
        self
    }

    /// Install a per-operation-kind override. Calls with this kind are
    /// governed entirely by the override policy.
    pub fn override_kind(mut self, kind: OperationKind, policy: RetryPolicy) -> Self {
        self.overrides.insert(kind, policy);
        self
    }

    /// Whether the given code is in this policy's retryable set.
    pub fn is_retryable_code(&self, code: Code) -> bool {
        self.retryable_codes.contains(&code)
    }

    /// The policy governing the given operation kind.
    pub fn effective(&self, kind: OperationKind) -> &RetryPolicy {
        self.overrides.get(&kind).unwrap_or(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be at least 1");
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be >= 1.0");
        }
        if self.base_delay > self.max_delay {
            return Err("base_delay must not exceed max_delay");
        }
        for policy in self.overrides.values() {
            policy.validate()?;
        }
        Ok(())
    }

    /// The jittered delay before the next attempt, given how many attempts
    /// have already completed (>= 1).
    pub fn delay_for_attempt(&self, completed_attempts: u32) -> Duration {
        let exponent = completed_attempts.saturating_sub(1).min(63);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let ceiling = self.max_delay.as_secs_f64();
        let capped = raw.min(ceiling);

        let jittered = match self.jitter {
            JitterStrategy::Full => capped + rand::random::<f64>() * capped,
            JitterStrategy::None => capped,
        };

        Duration::from_secs_f64(jittered.min(ceiling).max(0.0))
    }
}

/// Private state of one in-flight call's retry loop.
///
/// Created at call start, owned exclusively by that call's task, discarded
/// at completion. Never shared across calls.
#[derive(Debug)]
pub struct RetryState {
    attempt: u32,
    started_at: Instant,
    deadline: Option<Instant>,
    last_code: Option<Code>,
}

impl RetryState {
    /// Start tracking a call that began at `now` with an optional absolute
    /// deadline.
    pub fn new(now: Instant, deadline: Option<Instant>) -> Self {
        Self {
            attempt: 0,
            started_at: now,
            deadline,
            last_code: None,
        }
    }

    /// Record a completed (failed) attempt.
    pub fn record_attempt(&mut self, code: Code) {
        self.attempt += 1;
        self.last_code = Some(code);
    }

    /// Number of attempts completed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Status code of the most recent failure.
    pub fn last_code(&self) -> Option<Code> {
        self.last_code
    }

    /// Wall-clock time since the call started.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// The call's absolute deadline, if it has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// The engine's answer for one failure.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryDecision {
    /// Wait this long, then re-issue the call.
    RetryAfter(Duration),
    /// Stop retrying and surface the failure.
    Stop(StopReason),
}

/// Why the engine stopped retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The descriptor disabled retries for this call.
    RetriesDisabled,
    /// The status is not in the policy's retryable set.
    NotRetryable,
    /// The call is non-idempotent and the failure leaves the server-side
    /// outcome unknown.
    AmbiguousOutcome,
    /// The attempt budget is spent.
    AttemptsExhausted,
    /// The remaining deadline cannot accommodate another wait and attempt.
    DeadlineExhausted,
}

/// Decide whether to re-issue a failed call, and after what delay.
///
/// Pure: depends only on its arguments (plus the jitter draw). Must be
/// called after [`RetryState::record_attempt`] for the failure in question.
pub fn should_retry(
    descriptor: &CallDescriptor,
    policy: &RetryPolicy,
    state: &RetryState,
    error: &ChannelError,
    now: Instant,
) -> RetryDecision {
    let policy = policy.effective(descriptor.kind());

    if descriptor.eligibility() == RetryEligibility::Disabled {
        return RetryDecision::Stop(StopReason::RetriesDisabled);
    }

    match descriptor.idempotency_class() {
        Idempotency::NonIdempotent => match error {
            // The request never left the client; re-issuing cannot double-apply.
            ChannelError::Connect(_) => {}
            ChannelError::Transport(_) => {
                return RetryDecision::Stop(StopReason::AmbiguousOutcome);
            }
            ChannelError::Status(status) => {
                // A status the policy would have retried is exactly the kind
                // whose execution state is unknown; a definite status
                // (NotFound, InvalidArgument, ...) is surfaced as-is.
                let ambiguous = policy.is_retryable_code(status.code())
                    || status.code() == Code::DeadlineExceeded;
                return RetryDecision::Stop(if ambiguous {
                    StopReason::AmbiguousOutcome
                } else {
                    StopReason::NotRetryable
                });
            }
        },
        Idempotency::Idempotent => {
            let eligible = match error {
                ChannelError::Connect(_) | ChannelError::Transport(_) => true,
                ChannelError::Status(status) => policy.is_retryable_code(status.code()),
            };
            if !eligible {
                return RetryDecision::Stop(StopReason::NotRetryable);
            }
        }
    }

    if let Some(max) = policy.max_attempts {
        if state.attempts() >= max {
            return RetryDecision::Stop(StopReason::AttemptsExhausted);
        }
    }

    let delay = policy.delay_for_attempt(state.attempts());
    if let Some(deadline) = state.deadline() {
        if now + delay >= deadline {
            return RetryDecision::Stop(StopReason::DeadlineExhausted);
        }
    }

    RetryDecision::RetryAfter(delay)
}
