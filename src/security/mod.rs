//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request (peer address, Authorization header, command name):
//!     → acl.rs (first matching entry, then deny/allow sets)
//!     → cidr.rs (network predicate of an entry)
//!     → Dispatch, or 403 before the backend is touched
//! ```
//!
//! # Design Decisions
//! - Fail closed: no matching entry means deny
//! - The ACL list is compiled once and shared read-only
//! - No trust in client input

pub mod acl;
pub mod cidr;

pub use acl::{Acl, AclConfigError, AclList, ClientIdentity};
pub use cidr::Cidr;
