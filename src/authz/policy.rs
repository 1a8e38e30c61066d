//! Rule-list authorizer.
//!
//! # Responsibilities
//! - Allow requests matched by any configured rule
//! - Stay silent (NoOpinion) otherwise, so it composes inside a union
//! - Swap its rule list atomically on config reload
//!
//! # Design Decisions
//! - A rule targets either resource requests or non-resource paths, never both
//! - Empty lists and `*` both mean "any"
//! - Path entries ending in `*` are prefix matches

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::authz::authorizer::{Attributes, AuthzError, Authorizer, Decision};
use crate::config::schema::PolicyRuleConfig;
use crate::request::context::RequestContext;

const READ_ONLY_VERBS: &[&str] = &["get", "list", "watch"];

pub struct PolicyAuthorizer {
    rules: ArcSwap<Vec<PolicyRuleConfig>>,
}

impl PolicyAuthorizer {
    pub fn new(rules: Vec<PolicyRuleConfig>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    pub fn replace(&self, rules: Vec<PolicyRuleConfig>) {
        tracing::info!(rules = rules.len(), "Authorization policy reloaded");
        self.rules.store(Arc::new(rules));
    }
}

fn any_or(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|item| item == "*" || item == value)
}

fn subject_matches(rule: &PolicyRuleConfig, attrs: &Attributes) -> bool {
    if rule.user.is_none() && rule.group.is_none() {
        return false;
    }
    if let Some(user) = &rule.user {
        if user != "*" && user != attrs.username() {
            return false;
        }
    }
    if let Some(group) = &rule.group {
        if group != "*" && !attrs.groups().iter().any(|g| g == group) {
            return false;
        }
    }
    true
}

fn verb_matches(rule: &PolicyRuleConfig, verb: &str) -> bool {
    if rule.readonly && !READ_ONLY_VERBS.contains(&verb) {
        return false;
    }
    any_or(&rule.verbs, verb)
}

fn resource_matches(rule: &PolicyRuleConfig, attrs: &Attributes) -> bool {
    if rule.resources.is_empty() {
        return false;
    }
    let qualified = if attrs.subresource.is_empty() {
        attrs.resource.clone()
    } else {
        format!("{}/{}", attrs.resource, attrs.subresource)
    };
    let resource_ok = rule
        .resources
        .iter()
        .any(|r| r == "*" || *r == attrs.resource || *r == qualified);
    resource_ok && any_or(&rule.namespaces, &attrs.namespace)
}

fn path_matches(rule: &PolicyRuleConfig, path: &str) -> bool {
    rule.non_resource_paths.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    })
}

/// Whether `rule` grants `attrs`.
pub fn rule_matches(rule: &PolicyRuleConfig, attrs: &Attributes) -> bool {
    if !subject_matches(rule, attrs) || !verb_matches(rule, &attrs.verb) {
        return false;
    }
    if attrs.resource_request {
        resource_matches(rule, attrs)
    } else {
        path_matches(rule, &attrs.path)
    }
}

#[async_trait]
impl Authorizer for PolicyAuthorizer {
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<(Decision, String), AuthzError> {
        let rules = self.rules.load();
        match rules.iter().position(|rule| rule_matches(rule, attributes)) {
            Some(index) => Ok((Decision::Allow, format!("allowed by policy rule {}", index))),
            None => Ok((Decision::NoOpinion, String::new())),
        }
    }
}
