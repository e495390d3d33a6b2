//! Structured call telemetry.
//!
//! The core emits one [`CallEvent`] per attempt to an injected
//! [`CallObserver`]. The observer is the only externally visible side effect
//! of a call besides the network traffic itself; the core has no opinion on
//! sampling, export protocols, or sinks.

use std::time::Duration;

use stratus_core::Code;

use crate::call::OperationKind;

/// How one attempt of a call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failed(Code),
    Cancelled,
    DeadlineExceeded,
}

/// One attempt of one logical call.
#[derive(Clone, Debug)]
pub struct CallEvent {
    /// Which operation was attempted.
    pub kind: OperationKind,
    /// 1-based attempt number within the logical call.
    pub attempt: u32,
    /// How the attempt ended.
    pub outcome: CallOutcome,
    /// Wall-clock time spent on this attempt (excluding backoff waits).
    pub latency: Duration,
}

/// Consumer of call telemetry, injected at client construction.
pub trait CallObserver: Send + Sync {
    fn on_call(&self, event: CallEvent);
}

impl<O: CallObserver + ?Sized> CallObserver for std::sync::Arc<O> {
    fn on_call(&self, event: CallEvent) {
        (**self).on_call(event);
    }
}

/// The default observer: discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl CallObserver for NoopObserver {
    fn on_call(&self, _event: CallEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_observer_accepts_events() {
        let observer = NoopObserver;
        observer.on_call(CallEvent {
            kind: OperationKind::Get,
            attempt: 1,
            outcome: CallOutcome::Success,
            latency: Duration::from_millis(3),
        });
    }

    #[test]
    fn test_outcome_equality() {
        assert_eq!(CallOutcome::Success, CallOutcome::Success);
        assert_ne!(
            CallOutcome::Failed(Code::Unavailable),
            CallOutcome::Failed(Code::Internal)
        );
    }
}
