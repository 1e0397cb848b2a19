//! Pub/sub subsystem.
//!
//! # Data Flow
//! ```text
//! SUBSCRIBE/PSUBSCRIBE request (authorized)
//!     → hub.rs: attach the connection to each topic
//!         first subscriber of a topic → Backend::subscribe + pump task
//!         later subscribers           → join the existing fan-out
//!     → Subscription: per-connection bounded queue of messages
//!     → HTTP connection writes one chunk per message
//! ```
//!
//! # Design Decisions
//! - One upstream subscription per topic, shared by every subscriber
//! - The registry is a `DashMap`, so connection tasks on any worker thread
//!   can join or leave while pumps fan out
//! - A subscriber whose queue fills up is cut off; it never blocks the pump
//!   or other subscribers, and never sees a gap in its stream
//! - Dropping a `Subscription` detaches it; the last one out closes the
//!   upstream subscription

pub mod hub;

pub use hub::{Subscription, SubscriptionHub};
