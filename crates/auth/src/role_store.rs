//! Role resolution: principal id → exactly one role.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    AuthzError, Capability, IdentityClaims, Principal, PrincipalId, Role, TokenValidationError,
    require, validate_claims,
};

/// Result of looking up a principal's role.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoleResolution {
    Resolved(Role),
    /// No role recorded (yet) for this principal.
    Unknown,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleStoreError {
    #[error("principal {0} is already registered")]
    AlreadyRegistered(PrincipalId),

    #[error("principal {0} is not registered")]
    NotRegistered(PrincipalId),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Token(#[from] TokenValidationError),

    #[error("role storage error: {0}")]
    Storage(String),
}

/// Role lookup abstraction. Implementations hold exactly one role per principal.
pub trait RoleStore: Send + Sync {
    /// `Unknown` means no role is recorded; a failing backend is an error, not `Unknown`.
    fn role_of(&self, principal_id: PrincipalId) -> Result<RoleResolution, RoleStoreError>;

    /// Record a role for a principal that has none yet.
    fn insert(&self, principal_id: PrincipalId, role: Role) -> Result<(), RoleStoreError>;

    /// Replace the role of an already registered principal.
    fn replace(&self, principal_id: PrincipalId, role: Role) -> Result<Role, RoleStoreError>;
}

impl<S> RoleStore for Arc<S>
where
    S: RoleStore + ?Sized,
{
    fn role_of(&self, principal_id: PrincipalId) -> Result<RoleResolution, RoleStoreError> {
        (**self).role_of(principal_id)
    }

    fn insert(&self, principal_id: PrincipalId, role: Role) -> Result<(), RoleStoreError> {
        (**self).insert(principal_id, role)
    }

    fn replace(&self, principal_id: PrincipalId, role: Role) -> Result<Role, RoleStoreError> {
        (**self).replace(principal_id, role)
    }
}

/// In-memory role store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    roles: RwLock<HashMap<PrincipalId, Role>>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoleStore for InMemoryRoleStore {
    fn role_of(&self, principal_id: PrincipalId) -> Result<RoleResolution, RoleStoreError> {
        let map = self
            .roles
            .read()
            .map_err(|_| RoleStoreError::Storage("lock poisoned".to_string()))?;
        Ok(map
            .get(&principal_id)
            .copied()
            .map_or(RoleResolution::Unknown, RoleResolution::Resolved))
    }

    fn insert(&self, principal_id: PrincipalId, role: Role) -> Result<(), RoleStoreError> {
        let mut map = self
            .roles
            .write()
            .map_err(|_| RoleStoreError::Storage("lock poisoned".to_string()))?;
        if map.contains_key(&principal_id) {
            return Err(RoleStoreError::AlreadyRegistered(principal_id));
        }
        map.insert(principal_id, role);
        Ok(())
    }

    fn replace(&self, principal_id: PrincipalId, role: Role) -> Result<Role, RoleStoreError> {
        let mut map = self
            .roles
            .write()
            .map_err(|_| RoleStoreError::Storage("lock poisoned".to_string()))?;
        match map.get_mut(&principal_id) {
            Some(current) => Ok(core::mem::replace(current, role)),
            None => Err(RoleStoreError::NotRegistered(principal_id)),
        }
    }
}

/// Role given to every self-registered account.
pub fn registration_role() -> Role {
    Role::Student
}

/// Record a freshly signed-up principal. The role is never taken from the client.
pub fn register_principal<S: RoleStore + ?Sized>(
    store: &S,
    principal_id: PrincipalId,
) -> Result<Role, RoleStoreError> {
    let role = registration_role();
    store.insert(principal_id, role)?;
    tracing::info!(principal_id = %principal_id, role = %role, "principal registered");
    Ok(role)
}

/// Change `target`'s role. Only callers holding `AssignRoles` may do this.
pub fn assign_role<S: RoleStore + ?Sized>(
    store: &S,
    actor: &Principal,
    target: PrincipalId,
    role: Role,
) -> Result<Role, RoleStoreError> {
    require(actor, Capability::AssignRoles)?;
    let previous = store.replace(target, role)?;
    tracing::info!(
        actor = %actor.id,
        principal_id = %target,
        from = %previous,
        to = %role,
        "role reassigned"
    );
    Ok(previous)
}

/// Build the principal for validated identity claims.
///
/// An unknown role yields an unresolved principal, which the guard reports as
/// `Pending` until the role store catches up. A failing role store is reported
/// as `Storage` instead.
pub fn resolve_principal<S: RoleStore + ?Sized>(
    store: &S,
    claims: &IdentityClaims,
    now: DateTime<Utc>,
) -> Result<Principal, RoleStoreError> {
    validate_claims(claims, now)?;
    let principal = match store.role_of(claims.sub)? {
        RoleResolution::Resolved(role) => Principal::new(claims.sub, claims.display_name.clone(), role),
        RoleResolution::Unknown => Principal::unresolved(claims.sub, claims.display_name.clone()),
    };
    Ok(principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessDecision, authorize};
    use chrono::Duration;

    fn claims_for(sub: PrincipalId) -> IdentityClaims {
        let now = Utc::now();
        IdentityClaims {
            sub,
            display_name: "Linus".to_string(),
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(30),
        }
    }

    #[test]
    fn registration_always_yields_student() {
        let store = InMemoryRoleStore::new();
        let id = PrincipalId::new();
        assert_eq!(register_principal(&store, id), Ok(Role::Student));
        assert_eq!(store.role_of(id), Ok(RoleResolution::Resolved(Role::Student)));
    }

    #[test]
    fn registering_twice_is_rejected() {
        let store = InMemoryRoleStore::new();
        let id = PrincipalId::new();
        register_principal(&store, id).unwrap();
        assert_eq!(register_principal(&store, id), Err(RoleStoreError::AlreadyRegistered(id)));
    }

    #[test]
    fn only_admin_assigns_roles() {
        let store = InMemoryRoleStore::new();
        let student = PrincipalId::new();
        register_principal(&store, student).unwrap();

        let teacher = Principal::new(PrincipalId::new(), "T", Role::Teacher);
        let err = assign_role(&store, &teacher, student, Role::Teacher).unwrap_err();
        assert!(matches!(err, RoleStoreError::Authz(AuthzError::Forbidden { .. })));
        assert_eq!(store.role_of(student), Ok(RoleResolution::Resolved(Role::Student)));

        let admin = Principal::new(PrincipalId::new(), "A", Role::Admin);
        assert_eq!(assign_role(&store, &admin, student, Role::Teacher), Ok(Role::Student));
        assert_eq!(store.role_of(student), Ok(RoleResolution::Resolved(Role::Teacher)));
    }

    #[test]
    fn assigning_to_unknown_principal_fails() {
        let store = InMemoryRoleStore::new();
        let admin = Principal::new(PrincipalId::new(), "A", Role::Admin);
        let ghost = PrincipalId::new();
        assert_eq!(
            assign_role(&store, &admin, ghost, Role::Coordinator),
            Err(RoleStoreError::NotRegistered(ghost))
        );
    }

    #[test]
    fn resolve_principal_uses_stored_role() {
        let store = InMemoryRoleStore::new();
        let id = PrincipalId::new();
        store.insert(id, Role::Coordinator).unwrap();

        let principal = resolve_principal(&store, &claims_for(id), Utc::now()).unwrap();
        assert_eq!(principal.role, Some(Role::Coordinator));
        assert_eq!(principal.display_name, "Linus");
    }

    #[test]
    fn resolve_principal_without_role_is_pending() {
        let store = InMemoryRoleStore::new();
        let principal = resolve_principal(&store, &claims_for(PrincipalId::new()), Utc::now()).unwrap();
        assert_eq!(principal.role, None);
        assert_eq!(
            authorize(&principal, Capability::StudentArea.required_roles()),
            AccessDecision::Pending
        );
    }

    #[test]
    fn resolve_principal_rejects_expired_claims() {
        let store = InMemoryRoleStore::new();
        let claims = claims_for(PrincipalId::new());
        let later = claims.expires_at + Duration::seconds(1);
        assert_eq!(
            resolve_principal(&store, &claims, later),
            Err(RoleStoreError::Token(TokenValidationError::Expired))
        );
    }

    #[test]
    fn poisoned_role_table_is_a_storage_error() {
        let store = Arc::new(InMemoryRoleStore::new());
        let id = PrincipalId::new();
        store.insert(id, Role::Teacher).unwrap();

        let poisoner = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.roles.write().unwrap();
            panic!("writer died holding the role table");
        })
        .join();

        assert!(matches!(store.role_of(id), Err(RoleStoreError::Storage(_))));
        assert!(matches!(
            resolve_principal(&store, &claims_for(id), Utc::now()),
            Err(RoleStoreError::Storage(_))
        ));
    }
}
