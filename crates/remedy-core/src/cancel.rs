//! Per-incident cancellation signal
//!
//! A thin wrapper over `tokio::sync::watch`: the controller keeps the
//! [`CancelHandle`], the incident task races its suspension points against
//! [`CancelSignal::cancelled`].

use tokio::sync::watch;

/// Sending half, held by the controller
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

/// Receiving half, held by the incident task
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelHandle {
    /// New linked pair
    #[must_use]
    pub fn pair() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self(tx), CancelSignal(rx))
    }

    /// Raise the signal; idempotent
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires
    #[must_use]
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self(rx)
    }

    /// Whether cancellation was requested
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested; pending forever otherwise
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                // Sender gone without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}
