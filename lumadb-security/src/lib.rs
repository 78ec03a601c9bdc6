//! Collaborator hooks the broker core calls out to for authentication,
//! authorization, and audit logging (spec §6.3).
//!
//! The concrete identity mechanisms — SASL negotiation, JWT validation,
//! mTLS, RBAC role storage — are an external collaborator's job. This
//! crate defines the traits the core depends on plus reference
//! implementations good enough to run a broker with no identity provider
//! wired in: allow-all authentication and default-deny authorization.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod authn;
pub mod authz;
mod manager;

pub use audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use authn::{AllowAllAuthenticator, Authenticator, NegotiationOutcome};
pub use authz::{Authorizer, Decision, DefaultDenyAuthorizer};
pub use manager::SecurityManager;
