//! Rule evaluation
//!
//! Per request: walk the rules in declaration order, skip rules whose
//! pattern does not match, and stop at the first rule that decides.

use std::fmt;
use std::sync::Arc;

use session::AuthenticatedSession;
use tracing::debug;

use crate::pattern::PathPattern;
use crate::{AccessRulePredicate, Decision, RequestContext};

/// What a matching rule requires.
#[derive(Clone)]
pub enum RuleDecision {
    PermitAll,
    RequireAuthenticated,
    Custom(Arc<dyn AccessRulePredicate>),
}

impl fmt::Debug for RuleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleDecision::PermitAll => write!(f, "PermitAll"),
            RuleDecision::RequireAuthenticated => write!(f, "RequireAuthenticated"),
            RuleDecision::Custom(p) => write!(f, "Custom({})", p.id()),
        }
    }
}

/// One entry of the ordered rule list.
#[derive(Debug, Clone)]
pub struct AccessRule {
    pub pattern: PathPattern,
    pub decision: RuleDecision,
}

impl AccessRule {
    pub fn permit_all(pattern: impl Into<PathPattern>) -> Self {
        Self {
            pattern: pattern.into(),
            decision: RuleDecision::PermitAll,
        }
    }

    pub fn authenticated(pattern: impl Into<PathPattern>) -> Self {
        Self {
            pattern: pattern.into(),
            decision: RuleDecision::RequireAuthenticated,
        }
    }

    pub fn custom(pattern: impl Into<PathPattern>, predicate: Arc<dyn AccessRulePredicate>) -> Self {
        Self {
            pattern: pattern.into(),
            decision: RuleDecision::Custom(predicate),
        }
    }
}

/// Final outcome for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// No valid session where one is required; the caller must authenticate.
    Unauthorized,
    /// Authenticated, but the session is not allowed here.
    Forbidden,
}

impl Verdict {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Unauthorized => "unauthorized",
            Verdict::Forbidden => "forbidden",
        }
    }
}

/// Ordered access rules, built once at startup and shared by every request.
#[derive(Debug, Clone, Default)]
pub struct AccessDecisionChain {
    rules: Vec<AccessRule>,
}

impl AccessDecisionChain {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    /// Append a rule; it is evaluated after every rule already present.
    pub fn with_rule(mut self, rule: AccessRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    /// Evaluate the chain for one request.
    ///
    /// `session` must only be `Some` for a validated, non-expired session.
    pub fn evaluate(
        &self,
        request: &RequestContext,
        session: Option<&AuthenticatedSession>,
    ) -> Verdict {
        for rule in self.rules.iter().filter(|r| r.pattern.matches(&request.path)) {
            let verdict = match &rule.decision {
                RuleDecision::PermitAll => Some(Verdict::Allow),
                RuleDecision::RequireAuthenticated => Some(require_session(session)),
                RuleDecision::Custom(predicate) => match predicate.evaluate(request, session) {
                    Decision::Allow => Some(Verdict::Allow),
                    Decision::Deny if session.is_some() => Some(Verdict::Forbidden),
                    Decision::Deny => Some(Verdict::Unauthorized),
                    Decision::Delegate => None,
                },
            };

            if let Some(verdict) = verdict {
                debug!(
                    path = %request.path,
                    pattern = rule.pattern.as_str(),
                    decision = ?rule.decision,
                    verdict = verdict.label(),
                    "access decided"
                );
                return verdict;
            }
        }

        debug!(path = %request.path, "no rule decided, requiring authentication");
        require_session(session)
    }
}

fn require_session(session: Option<&AuthenticatedSession>) -> Verdict {
    if session.is_some() {
        Verdict::Allow
    } else {
        Verdict::Unauthorized
    }
}
