//! Command-level access control.
//!
//! # Evaluation
//! ```text
//! AclList (ordered, immutable)
//!     → match_client: first entry whose CIDR AND credential predicates
//!       both hold for the client (absent predicate = any)
//!     → allow_command on that entry:
//!         no entry            → deny
//!         in `disabled`       → deny
//!         `enabled` non-empty
//!           and not listed    → deny
//!         otherwise           → allow
//! ```
//!
//! Command names are compared exactly. Requests carry upper-cased names,
//! and configured names are upper-cased when the list is compiled.

use std::collections::HashSet;
use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::AclConfig;
use crate::security::cidr::{Cidr, CidrError};

/// Error building an ACL list from configuration.
#[derive(Debug, thiserror::Error)]
pub enum AclConfigError {
    #[error("acl[{index}]: {source}")]
    Cidr {
        index: usize,
        #[source]
        source: CidrError,
    },
}

/// The parts of a connection an ACL entry can match against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    addr: IpAddr,
    credentials: Option<String>,
}

impl ClientIdentity {
    /// Build the identity of a client from its address and the raw value of
    /// its `Authorization` header, if any.
    pub fn new(addr: IpAddr, authorization: Option<&str>) -> Self {
        Self {
            addr,
            credentials: authorization.and_then(decode_basic_auth),
        }
    }

    /// Source address of the client.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Decoded `user:password`, when a well-formed basic auth header was sent.
    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }
}

/// Decode `Basic <base64>` into its `user:password` text.
pub fn decode_basic_auth(header: &str) -> Option<String> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(decoded).ok()
}

/// One access control entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    pub cidr: Option<Cidr>,
    pub http_basic_auth: Option<String>,
    pub enabled: HashSet<String>,
    pub disabled: HashSet<String>,
}

impl Acl {
    /// Build an entry from its configuration.
    pub fn from_config(config: &AclConfig) -> Result<Self, CidrError> {
        let cidr = config.ip.as_deref().map(str::parse).transpose()?;
        Ok(Self {
            cidr,
            http_basic_auth: config.http_basic_auth.clone(),
            enabled: config.enabled.iter().map(|name| name.to_ascii_uppercase()).collect(),
            disabled: config.disabled.iter().map(|name| name.to_ascii_uppercase()).collect(),
        })
    }

    /// Network and credential predicates, combined with AND.
    pub fn matches(&self, client: &ClientIdentity) -> bool {
        if let Some(cidr) = &self.cidr {
            if !cidr.contains(client.addr) {
                return false;
            }
        }
        if let Some(expected) = &self.http_basic_auth {
            if client.credentials() != Some(expected.as_str()) {
                return false;
            }
        }
        true
    }

    /// The command-level decision of this entry.
    pub fn permits(&self, command: &str) -> bool {
        if self.disabled.contains(command) {
            return false;
        }
        self.enabled.is_empty() || self.enabled.contains(command)
    }
}

/// Ordered, immutable list of ACL entries.
#[derive(Debug, Clone, Default)]
pub struct AclList {
    entries: Vec<Acl>,
}

impl AclList {
    pub fn new(entries: Vec<Acl>) -> Self {
        Self { entries }
    }

    /// Compile the configured entries, keeping their order.
    pub fn from_config(configs: &[AclConfig]) -> Result<Self, AclConfigError> {
        let entries = configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                Acl::from_config(config).map_err(|source| AclConfigError::Cidr { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// First entry whose predicates match the client.
    pub fn match_client(&self, client: &ClientIdentity) -> Option<&Acl> {
        self.entries.iter().find(|acl| acl.matches(client))
    }

    /// Whether `command` may be run by `client`. Fails closed when no entry
    /// matches.
    pub fn allow_command(&self, command: &str, client: &ClientIdentity) -> bool {
        match self.match_client(client) {
            Some(acl) => acl.permits(command),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
