//! Authenticated identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Username of unauthenticated callers.
pub const ANONYMOUS: &str = "system:anonymous";
/// Group every authenticated identity belongs to.
pub const ALL_AUTHENTICATED: &str = "system:authenticated";
/// Group every unauthenticated identity belongs to.
pub const ALL_UNAUTHENTICATED: &str = "system:unauthenticated";

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Identity attached to a request after authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    pub name: String,
    pub uid: String,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS).with_groups([ALL_UNAUTHENTICATED])
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Full username of a service account.
pub fn service_account_username(namespace: &str, name: &str) -> String {
    format!("{}{}:{}", SERVICE_ACCOUNT_PREFIX, namespace, name)
}

/// Splits `system:serviceaccount:<namespace>:<name>` into its parts.
pub fn split_service_account_username(username: &str) -> Option<(&str, &str)> {
    let rest = username.strip_prefix(SERVICE_ACCOUNT_PREFIX)?;
    let (namespace, name) = rest.split_once(':')?;
    if namespace.is_empty() || name.is_empty() || name.contains(':') {
        return None;
    }
    Some((namespace, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_round_trip() {
        let username = service_account_username("kube-system", "builder");
        assert_eq!(username, "system:serviceaccount:kube-system:builder");
        assert_eq!(
            split_service_account_username(&username),
            Some(("kube-system", "builder"))
        );
    }

    #[test]
    fn test_split_rejects_plain_users() {
        assert_eq!(split_service_account_username("alice"), None);
        assert_eq!(split_service_account_username("system:serviceaccount:ns"), None);
        assert_eq!(split_service_account_username("system:serviceaccount::x"), None);
    }

    #[test]
    fn test_anonymous_identity() {
        let user = UserInfo::anonymous();
        assert_eq!(user.name, ANONYMOUS);
        assert!(user.in_group(ALL_UNAUTHENTICATED));
    }
}
