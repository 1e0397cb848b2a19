//! Bounded TCP accept loop.
//!
//! At most `max_connections` sockets are held at once. Once the limit is
//! reached, accepting pauses until a connection task drops its slot.
//! Accepted sockets have Nagle disabled, since every pub/sub message is
//! written as its own chunk and must not wait for the next one.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid bind address '{0}'")]
    Address(String),
    #[error("failed to bind: {0}")]
    Bind(std::io::Error),
    #[error("failed to accept: {0}")]
    Accept(std::io::Error),
    #[error("connection limiter closed")]
    Closed,
}

/// One accepted client socket together with its connection slot.
///
/// The slot is released when the `Accepted` (or its `slot`) is dropped,
/// even if the connection task panics.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub slot: OwnedSemaphorePermit,
}

pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind the gateway's client-facing address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;
        let tcp = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Self::from_listener(tcp, config.max_connections)
    }

    /// Wrap a socket that is already bound, e.g. to an ephemeral port.
    pub fn from_listener(tcp: TcpListener, max_connections: usize) -> Result<Self, ListenerError> {
        let local = tcp.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %local, max_connections, "Gateway listener bound");
        Ok(Self {
            inner: tcp,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Wait for a free slot, then for the next client.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        if self.slots.available_permits() == 0 {
            tracing::debug!(
                max_connections = self.max_connections,
                "Connection limit reached; accepting paused"
            );
        }
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        tracing::debug!(
            peer_addr = %peer,
            free_slots = self.slots.available_permits(),
            "Client accepted"
        );
        Ok(Accepted { stream, peer, slot })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Connection slots not currently held by a client.
    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slot_returns_when_client_is_dropped() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_listener(tcp, 2).unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let accepted = listener.accept().await.unwrap();
        assert!(accepted.stream.nodelay().unwrap());
        assert_eq!(listener.free_slots(), 1);
        drop(accepted);
        assert_eq!(listener.free_slots(), 2);
    }

    #[tokio::test]
    async fn accept_waits_for_a_free_slot() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_listener(tcp, 1).unwrap();
        let addr = listener.local_addr().unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();
        let held = listener.accept().await.unwrap();

        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;
        assert!(blocked.is_err());

        drop(held);
        assert!(listener.accept().await.is_ok());
    }

    #[tokio::test]
    async fn bind_rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "nowhere".into(),
            max_connections: 1,
        };
        assert!(matches!(
            Listener::bind(&config).await,
            Err(ListenerError::Address(addr)) if addr == "nowhere"
        ));
    }
}
