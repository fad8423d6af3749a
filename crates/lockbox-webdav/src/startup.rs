//! One-shot proof that the event loop is dispatching.
//!
//! The signal is sent before the receiver is ever polled, so it is ready the
//! first time the main loop selects on it and never during registration.
//! Observing it therefore shows the loop has started a pass.

use tokio::sync::oneshot;

use crate::error::ServerError;

#[derive(Debug)]
pub(crate) struct StartupNotification {
    signal: Option<oneshot::Receiver<()>>,
}

impl StartupNotification {
    pub(crate) fn arm() -> Result<Self, ServerError> {
        let (tx, rx) = oneshot::channel();
        tx.send(()).map_err(|()| ServerError::StartupCallback)?;
        Ok(Self { signal: Some(rx) })
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.signal.is_some()
    }

    /// Resolve once, then never again.
    pub(crate) async fn fired(&mut self) -> Result<(), ServerError> {
        let Some(signal) = self.signal.as_mut() else {
            return std::future::pending().await;
        };
        let result = signal.await.map_err(|_| ServerError::StartupCallback);
        self.signal = None;
        result
    }
}
