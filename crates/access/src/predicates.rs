//! Built-in custom predicates

use std::collections::HashSet;

use session::AuthenticatedSession;

use crate::{AccessRulePredicate, Decision, RequestContext};

/// Denies plain-HTTP requests when HTTPS is required.
///
/// Never grants access on its own: when the transport is acceptable the
/// decision is delegated to the next matching rule.
#[derive(Debug, Clone, Copy)]
pub struct RequireSecureTransport {
    required: bool,
}

impl RequireSecureTransport {
    pub fn new(required: bool) -> Self {
        Self { required }
    }
}

impl AccessRulePredicate for RequireSecureTransport {
    fn id(&self) -> &str {
        "secure_transport"
    }

    fn evaluate(&self, request: &RequestContext, _: Option<&AuthenticatedSession>) -> Decision {
        if self.required && !request.secure {
            Decision::Deny
        } else {
            Decision::Delegate
        }
    }
}

/// Allows only sessions issued through one of the listed registrations.
#[derive(Debug, Clone)]
pub struct RequireRegistration {
    registration_ids: HashSet<String>,
}

impl RequireRegistration {
    pub fn new<I, S>(registration_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registration_ids: registration_ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccessRulePredicate for RequireRegistration {
    fn id(&self) -> &str {
        "registration"
    }

    fn evaluate(&self, _: &RequestContext, session: Option<&AuthenticatedSession>) -> Decision {
        match session {
            Some(s) if self.registration_ids.contains(&s.registration_id) => Decision::Allow,
            _ => Decision::Deny,
        }
    }
}
