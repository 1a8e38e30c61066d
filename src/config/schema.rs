//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the API server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the API server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Request and shutdown timeouts.
    pub timeouts: TimeoutConfig,

    /// HSTS and CORS settings.
    pub security: SecurityConfig,

    /// Which requests are exempt from the request timeout.
    pub long_running: LongRunningConfig,

    pub authentication: AuthenticationConfig,

    pub authorization: AuthorizationConfig,

    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Serve at all. A disabled server completes shutdown immediately.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body size.
    pub max_request_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            max_request_body_bytes: 3 * 1024 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for non-long-running requests, in seconds.
    pub request_secs: u64,

    /// Lower bound of the lifetime budget given to long-running requests.
    pub min_request_secs: u64,

    /// Time between the stop signal and closing the listener.
    pub shutdown_delay_secs: u64,

    /// Bound on draining open connections after the listener closes.
    pub shutdown_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            min_request_secs: 1800,
            shutdown_delay_secs: 0,
            shutdown_timeout_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn min_request_timeout(&self) -> Duration {
        Duration::from_secs(self.min_request_secs)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.shutdown_delay_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Response hardening and cross-origin settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// e.g. ["max-age=31536000", "includeSubDomains", "preload"]. Empty disables HSTS.
    pub hsts_directives: Vec<String>,

    /// Regular expressions matched against the `Origin` header. Empty disables CORS.
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LongRunningConfig {
    pub verbs: Vec<String>,
    pub subresources: Vec<String>,
}

impl Default for LongRunningConfig {
    fn default() -> Self {
        Self {
            verbs: vec!["watch".to_string()],
            subresources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    /// Install the authentication stage. Disabled means every request passes through.
    pub enabled: bool,

    /// Fall back to `system:anonymous` when no credentials are recognised.
    pub anonymous: bool,

    /// Static bearer tokens.
    pub tokens: Vec<TokenConfig>,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anonymous: false,
            tokens: Vec::new(),
        }
    }
}

/// One static bearer token.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TokenConfig {
    pub token: String,
    pub user: String,
    pub uid: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum AuthorizationMode {
    #[default]
    AlwaysAllow,
    AlwaysDeny,
    Policy,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub mode: AuthorizationMode,

    /// Rules for `Policy` mode.
    pub policy: Vec<PolicyRuleConfig>,
}

/// One allow rule. Unset subject fields are ignored; at least one must be set.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyRuleConfig {
    pub user: Option<String>,
    pub group: Option<String>,
    pub readonly: bool,
    pub verbs: Vec<String>,
    pub resources: Vec<String>,
    pub namespaces: Vec<String>,
    pub non_resource_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit audit events through the logging sink.
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Address for the Prometheus scrape endpoint.
    pub metrics_address: String,

    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}
