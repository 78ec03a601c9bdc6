//! Authenticator collaborator (spec §6.3).

use async_trait::async_trait;
use lumadb_common::Result;

/// Outcome of one step of a SASL-style negotiation. Once `done`, the
/// connection's principal is fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationOutcome {
    pub principal: Option<String>,
    pub server_bytes: Vec<u8>,
    pub done: bool,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, mechanism: &str, client_bytes: &[u8]) -> Result<NegotiationOutcome>;
}

/// No identity provider configured: every connection negotiates as
/// `anonymous` in a single round trip.
pub struct AllowAllAuthenticator;

#[async_trait]
impl Authenticator for AllowAllAuthenticator {
    async fn authenticate(&self, _mechanism: &str, _client_bytes: &[u8]) -> Result<NegotiationOutcome> {
        Ok(NegotiationOutcome {
            principal: Some("anonymous".to_string()),
            server_bytes: Vec::new(),
            done: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_completes_immediately() {
        let outcome = AllowAllAuthenticator.authenticate("PLAIN", b"").await.unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.principal.as_deref(), Some("anonymous"));
    }
}
