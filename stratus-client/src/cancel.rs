//! Caller-driven cancellation.
//!
//! Every call and every subscription accepts a [`CancellationSignal`]; the
//! matching [`CancellationHandle`] stays with the caller. The signal is
//! observed at each suspension point (network wait, backoff wait) via
//! `tokio::select!`, so cancellation takes effect without waiting out a
//! sleep or a hung dispatch.

use tokio::sync::watch;

/// Create a linked cancellation handle/signal pair.
pub fn cancellation() -> (CancellationHandle, CancellationSignal) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx }, CancellationSignal { rx })
}

/// The caller's side of a cancellation pair. Dropping the handle without
/// calling [`cancel`](CancellationHandle::cancel) leaves the operation
/// running to completion.
#[derive(Debug)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The operation's side of a cancellation pair.
#[derive(Clone, Debug)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// A signal that never fires, for calls the caller does not need to
    /// cancel explicitly.
    pub fn never() -> Self {
        static NEVER: std::sync::OnceLock<watch::Sender<bool>> = std::sync::OnceLock::new();
        let tx = NEVER.get_or_init(|| watch::channel(false).0);
        Self { rx: tx.subscribe() }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, this never resolves: an
    /// abandoned handle is not a cancellation.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
