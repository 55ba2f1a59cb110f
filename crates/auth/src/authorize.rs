use serde::Serialize;
use thiserror::Error;

use crate::{Capability, Principal, PrincipalId, Role, RoleSet};

/// Outcome of a guard check.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    Deny,
    /// The principal's role is not resolved yet. Suspend and re-evaluate; this
    /// is never an allow.
    Pending,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role '{role}' may not use '{capability}'")]
    Forbidden { capability: Capability, role: Role },

    #[error("role resolution pending for principal")]
    Pending,
}

/// Decide whether a principal may reach a resource guarded by `required`.
///
/// - No IO
/// - No panics
/// - Allow iff the principal's role is in `required`
pub fn authorize(principal: &Principal, required: RoleSet) -> AccessDecision {
    match principal.role {
        None => AccessDecision::Pending,
        Some(role) if required.contains(role) => AccessDecision::Allow,
        Some(_) => AccessDecision::Deny,
    }
}

/// Check a capability and turn the decision into a `Result` for `?` at call sites.
pub fn require(principal: &Principal, capability: Capability) -> Result<(), AuthzError> {
    match (authorize(principal, capability.required_roles()), principal.role) {
        (AccessDecision::Allow, _) => Ok(()),
        (AccessDecision::Deny, Some(role)) => {
            tracing::warn!(
                principal_id = %principal.id,
                role = %role,
                capability = %capability,
                "access denied"
            );
            Err(AuthzError::Forbidden { capability, role })
        }
        _ => Err(AuthzError::Pending),
    }
}

/// Detailed explanation of an authorization decision (audit trail).
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub capability: Capability,
    pub required_roles: RoleSet,
    pub decision: AccessDecision,
    pub reason: String,
    pub principal: PrincipalState,
}

/// The parts of the principal the decision was based on.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub principal_id: PrincipalId,
    pub display_name: String,
    pub role: Option<Role>,
}

/// Explain why `principal` is (or would be) allowed or denied `capability`.
pub fn explain_authorization(principal: &Principal, capability: Capability) -> AuthorizationExplanation {
    let required_roles = capability.required_roles();
    let decision = authorize(principal, required_roles);

    let reason = match (decision, principal.role) {
        (AccessDecision::Allow, Some(role)) => {
            format!("role '{role}' is listed for '{capability}'")
        }
        (AccessDecision::Deny, Some(role)) => format!(
            "role '{role}' is not listed for '{capability}' (allowed: {:?})",
            required_roles
        ),
        _ => "role lookup has not completed; re-evaluate once it resolves".to_string(),
    };

    AuthorizationExplanation {
        capability,
        required_roles,
        decision,
        reason,
        principal: PrincipalState {
            principal_id: principal.id,
            display_name: principal.display_name.clone(),
            role: principal.role,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn principal(role: Role) -> Principal {
        Principal::new(PrincipalId::new(), "Ada", role)
    }

    #[test]
    fn teacher_reaches_class_management() {
        let p = principal(Role::Teacher);
        assert_eq!(authorize(&p, Capability::ManageClasses.required_roles()), AccessDecision::Allow);
        assert!(require(&p, Capability::ManageClasses).is_ok());
    }

    #[test]
    fn coordinator_cannot_manage_classes() {
        let p = principal(Role::Coordinator);
        let err = require(&p, Capability::ManageClasses).unwrap_err();
        assert_eq!(
            err,
            AuthzError::Forbidden {
                capability: Capability::ManageClasses,
                role: Role::Coordinator,
            }
        );
    }

    #[test]
    fn admin_is_denied_where_not_listed() {
        let only_teachers = RoleSet::new([Role::Teacher]).unwrap();
        assert_eq!(authorize(&principal(Role::Admin), only_teachers), AccessDecision::Deny);
    }

    #[test]
    fn unresolved_role_is_pending_not_allowed() {
        let p = Principal::unresolved(PrincipalId::new(), "Ada");
        let every_role = RoleSet::new(Role::ALL).unwrap();
        let decision = authorize(&p, every_role);
        assert_eq!(decision, AccessDecision::Pending);
        assert!(!decision.is_allowed());
        assert_eq!(require(&p, Capability::StudentArea), Err(AuthzError::Pending));
    }

    #[test]
    fn explanation_reports_denial_reason() {
        let explanation = explain_authorization(&principal(Role::Student), Capability::ManageRoster);
        assert_eq!(explanation.decision, AccessDecision::Deny);
        assert!(explanation.reason.contains("student"));
        assert_eq!(explanation.principal.role, Some(Role::Student));

        let json = serde_json::to_value(&explanation).unwrap();
        assert_eq!(json["decision"], "deny");
        assert_eq!(json["required_roles"], serde_json::json!(["teacher", "admin"]));
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    proptest! {
        /// Property: the guard allows exactly when the role is a member of the set.
        #[test]
        fn allow_iff_role_in_required_set(
            role in any_role(),
            required in prop::collection::vec(any_role(), 1..5),
        ) {
            let set = RoleSet::new(required.iter().copied()).unwrap();
            let decision = authorize(&principal(role), set);
            prop_assert_eq!(decision.is_allowed(), required.contains(&role));
            prop_assert_ne!(decision, AccessDecision::Pending);
        }
    }
}
