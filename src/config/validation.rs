//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Reject HSTS directives and CORS patterns the chain could not use
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use regex::Regex;

use crate::config::schema::{AuthorizationMode, ServerConfig};

/// One semantic problem with a config value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.enabled && config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_request_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_request_body_bytes", "must be greater than 0"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.min_request_secs == 0 {
        errors.push(ValidationError::new("timeouts.min_request_secs", "must be greater than 0"));
    }

    errors.extend(validate_hsts_directives(&config.security.hsts_directives));

    for (i, pattern) in config.security.cors_allowed_origins.iter().enumerate() {
        if let Err(e) = Regex::new(pattern) {
            errors.push(ValidationError::new(
                format!("security.cors_allowed_origins[{}]", i),
                e.to_string(),
            ));
        }
    }

    for (i, token) in config.authentication.tokens.iter().enumerate() {
        if token.token.is_empty() || token.user.is_empty() {
            errors.push(ValidationError::new(
                format!("authentication.tokens[{}]", i),
                "token and user must both be set",
            ));
        }
    }

    if config.authorization.mode == AuthorizationMode::Policy {
        for (i, rule) in config.authorization.policy.iter().enumerate() {
            let field = format!("authorization.policy[{}]", i);
            if rule.user.is_none() && rule.group.is_none() {
                errors.push(ValidationError::new(field.clone(), "user or group must be set"));
            }
            if rule.resources.is_empty() == rule.non_resource_paths.is_empty() {
                errors.push(ValidationError::new(
                    field,
                    "exactly one of resources or non_resource_paths must be set",
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `Strict-Transport-Security: max-age=<secs> [; includeSubDomains] [; preload]`
fn validate_hsts_directives(directives: &[String]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for directive in directives {
        let directive = directive.trim();
        let field = "security.hsts_directives";
        if directive.is_empty() {
            errors.push(ValidationError::new(field, "empty value in strict-transport-security-directives"));
            continue;
        }
        if let Some(secs) = directive.strip_prefix("max-age=") {
            if secs.parse::<u64>().is_err() {
                errors.push(ValidationError::new(
                    field,
                    format!("{:?} is not a valid max-age directive", directive),
                ));
            }
        } else if directive != "includeSubDomains" && directive != "preload" {
            errors.push(ValidationError::new(
                field,
                format!("{:?} is not a valid strict-transport-security directive", directive),
            ));
        }
    }
    errors
}
