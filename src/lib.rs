//! HTTP gateway to a Redis command protocol.
//!
//! Each request path decodes into one Redis command; the reply comes back
//! as JSON, raw RESP or a plain body. `SUBSCRIBE`/`PSUBSCRIBE` turn the
//! connection into a chunked push stream. An ordered ACL list decides which
//! client may run which command.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::HttpConnection ──▶ security::AclList
//!                                        │                        │
//!                                        │                 allowed│
//!                                        ▼                        ▼
//!     Client ◀── http::response ◀── codec::Output ◀──── backend::Backend ◀──▶ Redis
//!                                        ▲
//!                                        │ one chunk per message
//!                                  pubsub::SubscriptionHub
//!
//!     Cross-cutting: config, observability, lifecycle, admin
//! ```

// Core subsystems
pub mod backend;
pub mod codec;
pub mod config;
pub mod http;
pub mod net;
pub mod pubsub;
pub mod security;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use backend::{Backend, BackendError, Command, Message, Reply, Topic};
pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
