use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed set of roles a principal can hold.
///
/// Every principal holds exactly one of these. There is no hierarchy: `Admin`
/// only reaches a capability when that capability lists it explicitly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Coordinator,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Student, Role::Teacher, Role::Coordinator, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Coordinator => "coordinator",
            Role::Admin => "admin",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Role::Student => 1 << 0,
            Role::Teacher => 1 << 1,
            Role::Coordinator => 1 << 2,
            Role::Admin => 1 << 3,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "coordinator" => Ok(Role::Coordinator),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("a required role set must not be empty")]
pub struct EmptyRoleSet;

/// Non-empty set of roles allowed to reach a protected capability.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct RoleSet(u8);

impl RoleSet {
    /// Build a role set from any collection of roles. Rejects an empty set.
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Result<Self, EmptyRoleSet> {
        let bits = roles.into_iter().fold(0u8, |acc, r| acc | r.bit());
        if bits == 0 {
            Err(EmptyRoleSet)
        } else {
            Ok(Self(bits))
        }
    }

    pub(crate) const fn of(roles: &[Role]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < roles.len() {
            bits |= roles[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn roles(&self) -> Vec<Role> {
        Role::ALL.into_iter().filter(|r| self.contains(*r)).collect()
    }
}

impl core::fmt::Debug for RoleSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.roles()).finish()
    }
}

impl Serialize for RoleSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.roles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_its_own_name() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert_eq!("superuser".parse::<Role>(), Err(UnknownRole("superuser".to_string())));
    }

    #[test]
    fn empty_role_set_is_rejected() {
        assert_eq!(RoleSet::new([]), Err(EmptyRoleSet));
    }

    #[test]
    fn role_set_contains_only_listed_roles() {
        let set = RoleSet::new([Role::Teacher, Role::Admin]).unwrap();
        assert!(set.contains(Role::Teacher));
        assert!(set.contains(Role::Admin));
        assert!(!set.contains(Role::Student));
        assert!(!set.contains(Role::Coordinator));
        assert_eq!(set.roles(), vec![Role::Teacher, Role::Admin]);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Coordinator).unwrap();
        assert_eq!(json, "\"coordinator\"");
    }
}
