//! Cancellation signal carried through a request.
//!
//! A thin wrapper over a `tokio::sync::watch` channel: the gateway holds
//! the [`CancelHandle`], every suspension point in the turn holds a cloned
//! [`CancelSignal`] and races against it.

use tokio::sync::watch;

/// Fires the cancellation. Dropping the handle without calling
/// [`CancelHandle::cancel`] leaves the request uncancelled.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observes the cancellation.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the request is cancelled; pends forever if the
    /// handle goes away without firing.
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

    /// A signal that never fires. For tests and fire-and-forget callers.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open.
        std::mem::forget(tx);
        Self { rx }
    }
}

/// Create a linked handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (handle, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            true
        });
        handle.cancel();
        let woke = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(woke);
    }

    #[tokio::test]
    async fn never_signal_does_not_fire() {
        let mut signal = CancelSignal::never();
        let result =
            tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(result.is_err(), "never() must not resolve");
    }
}
