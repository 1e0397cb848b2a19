//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, one task per socket)
//!     → connection.rs (request state machine)
//!         → parser.rs (incremental decoder → ParseEvent)
//!         → request.rs (accumulate, keep-alive, translate to Command)
//!         → ACL check → Backend dispatch or SubscriptionHub
//!         → response.rs (framing, entity tags, CORS)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - HTTP/1.x is decoded in-house; the connection watches its socket while a
//!   backend call is pending and turns into a chunked push stream on subscribe
//! - Requests on one connection are answered strictly in arrival order

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod server;

pub use connection::{ConnectionState, HttpConnection};
pub use parser::{ParseError, ParseEvent, RequestDecoder, Version};
pub use request::{HttpError, Request, Resolution, ResolvedCommand};
pub use response::{Response, ResponseBuilder};
pub use server::{GatewayState, HttpServer};
