//! Request-scoped caller identity.
//!
//! The identity provider is an external collaborator: the core only ever sees an
//! opaque user id, or nothing at all. Every core operation receives a
//! [`RequestContext`] explicitly instead of reading ambient state.

use crate::error::PlannerError;

/// Supplies the authenticated user for the current request, if any.
pub trait IdentityProvider {
    fn current_user(&self) -> Option<String>;
}

/// Fixed identity, used by the CLI and by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<String>);

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    user_id: Option<String>,
}

impl RequestContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    /// Captures the provider's answer once for the lifetime of a request.
    pub fn from_provider(provider: &dyn IdentityProvider) -> Self {
        Self {
            user_id: provider.current_user().filter(|id| !id.trim().is_empty()),
        }
    }

    /// Returns the caller's user id or fails with `Unauthenticated`.
    pub fn user_id(&self) -> Result<&str, PlannerError> {
        self.user_id.as_deref().ok_or(PlannerError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_provider_identity_is_anonymous() {
        let ctx = RequestContext::from_provider(&StaticIdentity(Some("  ".into())));
        assert!(matches!(ctx.user_id(), Err(PlannerError::Unauthenticated)));
    }

    #[test]
    fn provider_identity_is_captured() {
        let ctx = RequestContext::from_provider(&StaticIdentity(Some("u-1".into())));
        assert_eq!(ctx.user_id().unwrap(), "u-1");
    }
}
