//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Validate ACL predicates (CIDR syntax, basic auth shape)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::security::cidr::Cidr;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every error found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than zero"));
    }
    if config.redis.url.is_empty() {
        errors.push(ValidationError::new("redis.url", "must not be empty"));
    }
    if config.redis.pubsub_buffer == 0 {
        errors.push(ValidationError::new("redis.pubsub_buffer", "must be greater than zero"));
    }
    if config.http.max_body_size == 0 {
        errors.push(ValidationError::new("http.max_body_size", "must be greater than zero"));
    }
    if config.http.max_header_bytes < 256 {
        errors.push(ValidationError::new("http.max_header_bytes", "must be at least 256"));
    }
    if let Some(root) = &config.http.default_root {
        if !root.starts_with('/') {
            errors.push(ValidationError::new("http.default_root", "must start with '/'"));
        }
    }

    for (index, entry) in config.acl.iter().enumerate() {
        if let Some(ip) = &entry.ip {
            if let Err(e) = ip.parse::<Cidr>() {
                errors.push(ValidationError::new(format!("acl[{}].ip", index), e.to_string()));
            }
        }
        if let Some(auth) = &entry.http_basic_auth {
            if !auth.contains(':') {
                errors.push(ValidationError::new(
                    format!("acl[{}].http_basic_auth", index),
                    "expected 'user:password'",
                ));
            }
        }
        let catch_all = entry.ip.is_none() && entry.http_basic_auth.is_none();
        if catch_all && index + 1 < config.acl.len() {
            tracing::warn!(
                index,
                "ACL entry without predicates is not last; entries after it are unreachable"
            );
        }
    }
    if config.acl.is_empty() {
        tracing::warn!("No ACL entries configured; every command will be denied");
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
