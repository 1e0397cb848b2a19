//! Client-facing TCP plumbing.
//!
//! ```text
//! TcpListener
//!     → listener.rs (connection slots, TCP_NODELAY)
//!     → connection.rs (ConnectionId, live-connection guard)
//!     → http::HttpConnection
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Accepted, Listener, ListenerError};
