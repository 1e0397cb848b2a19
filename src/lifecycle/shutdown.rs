//! Shutdown coordination for the gateway.

use std::sync::Arc;

use tokio::sync::watch;

/// Process-wide stop flag.
///
/// Every long-running task holds a [`ShutdownSignal`]: the accept loop,
/// each connection task (streaming ones included) and the admin server.
/// A signal taken after [`Shutdown::trigger`] fires immediately.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been triggered.
    pub async fn recv(&mut self) {
        // An error means every `Shutdown` handle is gone, which also ends the process.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
