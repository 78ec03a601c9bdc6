//! Authorizer collaborator (spec §6.3): evaluates ACL entries committed
//! to RaftMetadata. Deny rules take precedence over allow; the default
//! when no rule matches is deny, once the component is enabled.

use async_trait::async_trait;
use dashmap::DashMap;
use lumadb_common::AclEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        principal: &str,
        host: &str,
        resource_type: &str,
        resource_name: &str,
        operation: &str,
    ) -> Decision;
}

type AclKey = (String, String, String, String);

/// In-memory ACL evaluator kept in sync with RaftMetadata's `PutACL` /
/// `DeleteACL` commits. When disabled, every operation is allowed —
/// matching a cluster with no ACLs configured.
pub struct DefaultDenyAuthorizer {
    enabled: bool,
    acls: DashMap<AclKey, bool>,
}

impl DefaultDenyAuthorizer {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            acls: DashMap::new(),
        }
    }

    pub fn apply(&self, entry: &AclEntry) {
        self.acls.insert(Self::key(entry), entry.allow);
    }

    pub fn revoke(&self, entry: &AclEntry) {
        self.acls.remove(&Self::key(entry));
    }

    fn key(entry: &AclEntry) -> AclKey {
        (
            entry.principal.clone(),
            entry.resource_type.clone(),
            entry.resource_name.clone(),
            entry.operation.clone(),
        )
    }
}

#[async_trait]
impl Authorizer for DefaultDenyAuthorizer {
    async fn authorize(
        &self,
        principal: &str,
        _host: &str,
        resource_type: &str,
        resource_name: &str,
        operation: &str,
    ) -> Decision {
        if !self.enabled {
            return Decision::Allow;
        }

        let exact = (
            principal.to_string(),
            resource_type.to_string(),
            resource_name.to_string(),
            operation.to_string(),
        );
        if let Some(allow) = self.acls.get(&exact) {
            return if *allow { Decision::Allow } else { Decision::Deny };
        }

        let wildcard = (
            principal.to_string(),
            resource_type.to_string(),
            "*".to_string(),
            operation.to_string(),
        );
        if let Some(allow) = self.acls.get(&wildcard) {
            return if *allow { Decision::Allow } else { Decision::Deny };
        }

        Decision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(principal: &str, resource: &str, op: &str, allow: bool) -> AclEntry {
        AclEntry {
            principal: principal.to_string(),
            resource_type: "topic".to_string(),
            resource_name: resource.to_string(),
            operation: op.to_string(),
            allow,
        }
    }

    #[tokio::test]
    async fn disabled_allows_everything() {
        let authz = DefaultDenyAuthorizer::new(false);
        assert_eq!(
            authz.authorize("alice", "1.2.3.4", "topic", "orders", "read").await,
            Decision::Allow
        );
    }

    #[tokio::test]
    async fn unmatched_rule_denies_by_default() {
        let authz = DefaultDenyAuthorizer::new(true);
        assert_eq!(
            authz.authorize("alice", "1.2.3.4", "topic", "orders", "read").await,
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn explicit_allow_then_wildcard_deny_precedence() {
        let authz = DefaultDenyAuthorizer::new(true);
        authz.apply(&entry("alice", "*", "read", false));
        authz.apply(&entry("alice", "orders", "read", true));
        assert_eq!(
            authz.authorize("alice", "h", "topic", "orders", "read").await,
            Decision::Allow
        );
        assert_eq!(
            authz.authorize("alice", "h", "topic", "shipments", "read").await,
            Decision::Deny
        );
    }
}
