//! Bundles the three collaborator hooks behind one handle the broker
//! wires into its connection and admin-command paths.

use std::sync::Arc;

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::authn::{AllowAllAuthenticator, Authenticator, NegotiationOutcome};
use crate::authz::{Authorizer, Decision, DefaultDenyAuthorizer};

pub struct SecurityManager {
    authenticator: Arc<dyn Authenticator>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditSink>,
}

impl SecurityManager {
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            authenticator,
            authorizer,
            audit,
        }
    }

    /// A manager with no identity provider wired in: every connection
    /// authenticates as `anonymous` and every operation is permitted.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(
            Arc::new(AllowAllAuthenticator),
            Arc::new(DefaultDenyAuthorizer::new(false)),
            Arc::new(TracingAuditSink),
        )
    }

    /// A manager with authorization enforced against committed ACLs.
    #[must_use]
    pub fn with_authorization(authorizer: Arc<DefaultDenyAuthorizer>) -> Self {
        Self::new(Arc::new(AllowAllAuthenticator), authorizer, Arc::new(TracingAuditSink))
    }

    pub async fn authenticate(&self, mechanism: &str, client_bytes: &[u8]) -> lumadb_common::Result<NegotiationOutcome> {
        let outcome = self.authenticator.authenticate(mechanism, client_bytes).await?;
        if outcome.done {
            self.audit.log(AuditEvent::new(
                "authn",
                outcome.principal.clone(),
                format!("negotiated via {mechanism}"),
            ));
        }
        Ok(outcome)
    }

    pub async fn authorize(
        &self,
        principal: &str,
        host: &str,
        resource_type: &str,
        resource_name: &str,
        operation: &str,
    ) -> Decision {
        let decision = self
            .authorizer
            .authorize(principal, host, resource_type, resource_name, operation)
            .await;
        if decision == Decision::Deny {
            self.audit.log(AuditEvent::new(
                "acl",
                Some(principal.to_string()),
                format!("denied {operation} on {resource_type}:{resource_name}"),
            ));
        }
        decision
    }

    pub fn audit(&self, event: AuditEvent) {
        self.audit.log(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_manager_allows_and_authenticates() {
        let manager = SecurityManager::disabled();
        let outcome = manager.authenticate("PLAIN", b"").await.unwrap();
        assert!(outcome.done);
        assert_eq!(
            manager.authorize("anonymous", "h", "topic", "orders", "write").await,
            Decision::Allow
        );
    }
}
