//! Subscription-specific configuration.

use std::time::Duration;

use super::retry::RetryPolicy;

/// Default inactivity window. The server heartbeats well inside this; a
/// silent stream for this long is treated as broken.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration governing subscription streams.
///
/// Set once at client construction, immutable afterwards.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// If no message (heartbeats included) arrives within this window, the
    /// stream is treated as broken and reopened.
    pub inactivity_timeout: Duration,
    /// Backoff policy for reconnects. Unbounded attempts with a capped
    /// ceiling; see [`RetryPolicy::subscription`].
    pub reconnect: RetryPolicy,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            reconnect: RetryPolicy::subscription(),
        }
    }
}

impl SubscriptionConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.inactivity_timeout.is_zero() {
            return Err("inactivity_timeout must be non-zero");
        }
        self.reconnect.validate()
    }
}
