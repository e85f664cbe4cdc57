//! Stop signal shared by the endpoint tasks of one submission.

use tokio_util::sync::CancellationToken;

/// Cooperative stop flag for one submission.
///
/// Every submission gets a fresh signal, so a stop issued for one bundle never
/// leaks into the next. Endpoint clients check it around their backoff sleeps;
/// an HTTP request already in flight is not aborted.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every endpoint task of this submission to stop retrying.
    ///
    /// Calling it more than once is a no-op.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }

    /// A signal that is stopped whenever `self` is, and may also be stopped on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}
