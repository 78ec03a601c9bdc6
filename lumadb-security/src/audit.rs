//! AuditSink collaborator (spec §6.3): fire-and-forget append for authN,
//! ACL, topic, and data-access events.

use lumadb_common::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: Timestamp,
    pub category: String,
    pub principal: Option<String>,
    pub detail: String,
}

impl AuditEvent {
    #[must_use]
    pub fn new(category: impl Into<String>, principal: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: now_ms(),
            category: category.into(),
            principal,
            detail: detail.into(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn log(&self, event: AuditEvent);
}

/// Default sink: routes audit events through the structured logging
/// pipeline rather than a dedicated store.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log(&self, event: AuditEvent) {
        info!(
            category = %event.category,
            principal = ?event.principal,
            detail = %event.detail,
            "audit event"
        );
    }
}

fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}
