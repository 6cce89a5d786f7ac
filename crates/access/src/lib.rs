//! Ordered, pluggable access decisions for gated requests
//!
//! Every request that is not part of the login flow is evaluated against an
//! ordered list of `AccessRule`s. The first rule whose path pattern matches
//! decides, except that a custom predicate may `Delegate` to the next
//! matching rule. Requests no rule decides are treated as requiring an
//! authenticated session.
//!
//! Custom rules implement `AccessRulePredicate`, a single-method capability
//! injected into the chain at construction. Two predicates ship with the
//! crate: `RequireSecureTransport` and `RequireRegistration`.

pub mod chain;
pub mod pattern;
pub mod predicates;

pub use chain::{AccessDecisionChain, AccessRule, RuleDecision, Verdict};
pub use pattern::PathPattern;
pub use predicates::{RequireRegistration, RequireSecureTransport};

use session::AuthenticatedSession;

/// What the chain knows about an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    /// Whether the client reached the gateway over HTTPS (directly or via
    /// a proxy reporting `X-Forwarded-Proto: https`).
    pub secure: bool,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>, secure: bool) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            secure,
        }
    }
}

/// Outcome of a custom predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Grant access; evaluation stops.
    Allow,
    /// Refuse access; evaluation stops.
    Deny,
    /// No opinion; evaluation continues with the next matching rule.
    Delegate,
}

/// Extension point for custom authorization rules.
///
/// `session` is `Some` only for a valid, non-expired session.
pub trait AccessRulePredicate: Send + Sync {
    /// Identifier for logging (e.g. "secure_transport")
    fn id(&self) -> &str;

    fn evaluate(&self, request: &RequestContext, session: Option<&AuthenticatedSession>)
    -> Decision;
}
