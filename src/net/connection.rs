//! Connection ids and live-connection accounting.
//!
//! Every accepted client gets a [`ConnectionId`], used in log fields and as
//! the subscriber key in the pub/sub hub. The [`ConnectionTracker`] counts
//! live clients for the admin stats and lets shutdown wait for them to
//! drain.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::observability::metrics;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Live {
    count: AtomicU64,
    drained: Notify,
}

/// Counts connections that are currently being served.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    live: Arc<Live>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client. The returned guard unregisters it on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.live.count.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened();
        ConnectionGuard {
            live: Arc::clone(&self.live),
            id: ConnectionId::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.live.count.load(Ordering::SeqCst)
    }

    /// Wait until no connection is left, giving up after `deadline`.
    /// Returns true if the gateway drained in time.
    pub async fn wait_for_idle(&self, deadline: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.live.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(deadline, drained).await.is_ok()
    }
}

/// Live registration of one connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    live: Arc<Live>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::connection_closed();
        if self.live.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.live.drained.notify_waiters();
        }
    }
}
