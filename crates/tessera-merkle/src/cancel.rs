//! Cooperative cancellation.
//!
//! A [`Canceller`] fans a single cancellation signal out to any number of
//! cloned [`CancelToken`]s. Every operation in the writer that can
//! suspend observes a token; cancellation is never silently ignored.

use tokio::sync::watch;

/// The owning side of a cancellation signal.
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    /// Create a new cancellation source.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable handle that resolves once its [`Canceller`] fires.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that can never fire, for callers without cancellation.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        Self { rx }
    }

    /// Whether the signal has already fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal fires. Pends forever on a `never()` token or
    /// when the `Canceller` is dropped without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
