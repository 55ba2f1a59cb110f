//! `classhub-auth`: pure authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage engines: every
//! decision takes an explicit `Principal` and never reads ambient session state.

pub mod authorize;
pub mod capability;
pub mod claims;
pub mod principal;
pub mod role_store;
pub mod roles;

pub use authorize::{
    AccessDecision, AuthorizationExplanation, AuthzError, PrincipalState, authorize,
    explain_authorization, require,
};
pub use capability::{Capability, home_capability};
pub use claims::{IdentityClaims, TokenValidationError, validate_claims};
pub use principal::{Principal, PrincipalId};
pub use role_store::{
    InMemoryRoleStore, RoleResolution, RoleStore, RoleStoreError, assign_role, register_principal,
    registration_role, resolve_principal,
};
pub use roles::{EmptyRoleSet, Role, RoleSet, UnknownRole};
