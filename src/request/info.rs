//! RequestInfo resolution from method and path.
//!
//! # Responsibilities
//! - Classify a request as resource or non-resource
//! - Derive verb, API group/version, namespace, resource, subresource and name
//!
//! # Data Flow
//! ```text
//! /apis/apps/v1/namespaces/ns/deployments/web/scale  (PUT)
//!     → prefix "apis", group "apps", version "v1"
//!     → namespace "ns", resource "deployments", name "web", subresource "scale"
//!     → verb "update"
//! ```
//!
//! # Design Decisions
//! - Paths too short to be resources fall back to non-resource requests
//! - Non-resource verbs are the lowercase HTTP method
//! - Collection GETs become "list", or "watch" when `?watch=true`

use std::collections::HashSet;

use axum::http::{request::Parts, Method};
use serde::Serialize;
use thiserror::Error;

/// Parsed request metadata used by authorization and the deadline stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub is_resource_request: bool,
    pub path: String,
    pub verb: String,
    pub api_prefix: String,
    pub api_group: String,
    pub api_version: String,
    pub namespace: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestInfoError {
    #[error("unable to determine kind and namespace from url {0}")]
    AmbiguousSpecialVerb(String),
}

/// Resolves RequestInfo for an incoming request.
pub trait RequestInfoResolver: Send + Sync {
    fn new_request_info(&self, parts: &Parts) -> Result<RequestInfo, RequestInfoError>;
}

const SPECIAL_VERBS: &[&str] = &["proxy", "watch"];
const SPECIAL_VERBS_NO_SUBRESOURCES: &[&str] = &["proxy"];
const NAMESPACE_SUBRESOURCES: &[&str] = &["status", "finalize"];

/// Kubernetes-style path layout resolver.
#[derive(Debug, Clone)]
pub struct RequestInfoFactory {
    api_prefixes: HashSet<String>,
    groupless_api_prefixes: HashSet<String>,
}

impl Default for RequestInfoFactory {
    fn default() -> Self {
        Self::new(["api", "apis"], ["api"])
    }
}

impl RequestInfoFactory {
    pub fn new<I, J, S, T>(api_prefixes: I, groupless_api_prefixes: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            api_prefixes: api_prefixes.into_iter().map(Into::into).collect(),
            groupless_api_prefixes: groupless_api_prefixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl RequestInfoResolver for RequestInfoFactory {
    fn new_request_info(&self, parts: &Parts) -> Result<RequestInfo, RequestInfoError> {
        let path = parts.uri.path();
        let mut info = RequestInfo {
            is_resource_request: false,
            path: path.to_string(),
            verb: parts.method.as_str().to_lowercase(),
            ..Default::default()
        };

        let segments = split_path(path);
        if segments.len() < 3 || !self.api_prefixes.contains(segments[0]) {
            return Ok(info);
        }
        let prefix = segments[0];
        let mut current = &segments[1..];

        let mut api_group = "";
        if !self.groupless_api_prefixes.contains(prefix) {
            if current.len() < 3 {
                return Ok(info);
            }
            api_group = current[0];
            current = &current[1..];
        }

        info.is_resource_request = true;
        info.api_prefix = prefix.to_string();
        info.api_group = api_group.to_string();
        info.api_version = current[0].to_string();
        current = &current[1..];

        if SPECIAL_VERBS.contains(&current[0]) {
            if current.len() < 2 {
                return Err(RequestInfoError::AmbiguousSpecialVerb(parts.uri.to_string()));
            }
            info.verb = current[0].to_string();
            current = &current[1..];
        } else {
            info.verb = match parts.method {
                Method::POST => "create",
                Method::GET | Method::HEAD => "get",
                Method::PUT => "update",
                Method::PATCH => "patch",
                Method::DELETE => "delete",
                _ => "",
            }
            .to_string();
        }

        if current[0] == "namespaces" {
            if current.len() > 1 {
                info.namespace = current[1].to_string();
                if current.len() > 2 && !NAMESPACE_SUBRESOURCES.contains(&current[2]) {
                    current = &current[2..];
                }
            }
        }

        info.parts = current.iter().map(|s| s.to_string()).collect();

        let n = info.parts.len();
        if n >= 3 && !SPECIAL_VERBS_NO_SUBRESOURCES.contains(&info.verb.as_str()) {
            info.subresource = info.parts[2].clone();
        }
        if n >= 2 {
            info.name = info.parts[1].clone();
        }
        if n >= 1 {
            info.resource = info.parts[0].clone();
        }

        if info.name.is_empty() && info.verb == "get" {
            let query = parts.uri.query().unwrap_or("");
            let pairs: Vec<(String, String)> =
                serde_urlencoded::from_str(query).unwrap_or_default();
            let watch = pairs
                .iter()
                .any(|(k, v)| k == "watch" && (v == "true" || v == "1"));
            info.verb = if watch { "watch" } else { "list" }.to_string();

            if let Some(name) = pairs
                .iter()
                .filter(|(k, _)| k == "fieldSelector")
                .find_map(|(_, v)| metadata_name_selector(v))
            {
                info.name = name.to_string();
            }
        }

        if info.name.is_empty() && info.verb == "delete" {
            info.verb = "deletecollection".to_string();
        }

        Ok(info)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').collect()
}

fn metadata_name_selector(selector: &str) -> Option<&str> {
    selector.split(',').find_map(|term| {
        let (field, value) = term
            .split_once("==")
            .or_else(|| term.split_once('='))?;
        (field.trim() == "metadata.name").then_some(value.trim())
    })
}
