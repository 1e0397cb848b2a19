//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Redis backend settings.
    pub redis: RedisConfig,

    /// HTTP request handling limits and defaults.
    pub http: HttpConfig,

    /// Ordered access control list. The first matching entry governs.
    pub acl: Vec<AclConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin surface settings.
    pub admin: AdminConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            redis: RedisConfig::default(),
            http: HttpConfig::default(),
            acl: default_acl(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:7379").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7379".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Redis backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,

    /// Messages buffered per subscriber before it is dropped as too slow.
    pub pubsub_buffer: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pubsub_buffer: 1024,
        }
    }
}

/// HTTP handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Maximum size of the request line plus headers in bytes.
    pub max_header_bytes: usize,

    /// Command path served for `GET /`, e.g. `/GET/index.html`.
    pub default_root: Option<String>,

    /// Deadline for a backend reply in seconds. Zero disables it.
    /// Never applies to pub/sub streams.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
            max_header_bytes: 16 * 1024,
            default_root: None,
            request_timeout_secs: 30,
        }
    }
}

/// One access control entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AclConfig {
    /// Source network in CIDR notation ("10.0.0.0/24"). Absent matches any.
    pub ip: Option<String>,

    /// Expected basic auth credentials as "user:password". Absent matches any.
    pub http_basic_auth: Option<String>,

    /// Explicit allow-list of command names.
    pub enabled: Vec<String>,

    /// Explicit deny-list of command names.
    pub disabled: Vec<String>,
}

fn default_acl() -> Vec<AclConfig> {
    vec![AclConfig {
        disabled: vec![
            "DEBUG".to_string(),
            "FLUSHDB".to_string(),
            "FLUSHALL".to_string(),
        ],
        ..AclConfig::default()
    }]
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:7380".to_string(),
        }
    }
}
