use serde::{Deserialize, Serialize};

use crate::roles::{Role, RoleSet};

/// A protected capability (route area or mutating action) with its own role set.
///
/// Each capability declares the roles that may reach it. Nothing is inherited:
/// admin access exists only where the table below lists `Admin`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Student dashboard.
    StudentArea,
    /// Teacher dashboard.
    TeacherArea,
    /// Coordinator dashboard.
    CoordinatorArea,
    /// Ask to join a class (direct join or request).
    JoinClass,
    /// Create, update, archive and delete classes.
    ManageClasses,
    /// Approve or reject enrollment requests.
    ReviewEnrollmentRequests,
    /// View a class roster and remove enrolled students.
    ManageRoster,
    /// Read-only enrollment views across classes and students.
    ViewEnrollmentOverview,
    /// Change another principal's role.
    AssignRoles,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::StudentArea,
        Capability::TeacherArea,
        Capability::CoordinatorArea,
        Capability::JoinClass,
        Capability::ManageClasses,
        Capability::ReviewEnrollmentRequests,
        Capability::ManageRoster,
        Capability::ViewEnrollmentOverview,
        Capability::AssignRoles,
    ];

    pub fn required_roles(&self) -> RoleSet {
        match self {
            Capability::StudentArea | Capability::JoinClass => RoleSet::of(&[Role::Student]),
            Capability::TeacherArea
            | Capability::ManageClasses
            | Capability::ReviewEnrollmentRequests
            | Capability::ManageRoster => RoleSet::of(&[Role::Teacher, Role::Admin]),
            Capability::CoordinatorArea | Capability::ViewEnrollmentOverview => {
                RoleSet::of(&[Role::Coordinator, Role::Admin])
            }
            Capability::AssignRoles => RoleSet::of(&[Role::Admin]),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::StudentArea => "student_area",
            Capability::TeacherArea => "teacher_area",
            Capability::CoordinatorArea => "coordinator_area",
            Capability::JoinClass => "join_class",
            Capability::ManageClasses => "manage_classes",
            Capability::ReviewEnrollmentRequests => "review_enrollment_requests",
            Capability::ManageRoster => "manage_roster",
            Capability::ViewEnrollmentOverview => "view_enrollment_overview",
            Capability::AssignRoles => "assign_roles",
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Landing area for a freshly signed-in principal.
pub fn home_capability(role: Role) -> Capability {
    match role {
        Role::Student => Capability::StudentArea,
        Role::Teacher | Role::Admin => Capability::TeacherArea,
        Role::Coordinator => Capability::CoordinatorArea,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_capability_declares_a_non_empty_role_set() {
        for cap in Capability::ALL {
            assert!(!cap.required_roles().roles().is_empty(), "{cap} has no roles");
        }
    }

    #[test]
    fn class_management_is_teacher_and_admin_only() {
        let roles = Capability::ManageClasses.required_roles();
        assert_eq!(roles.roles(), vec![Role::Teacher, Role::Admin]);
    }

    #[test]
    fn admin_is_not_a_student() {
        assert!(!Capability::JoinClass.required_roles().contains(Role::Admin));
        assert!(!Capability::StudentArea.required_roles().contains(Role::Admin));
    }

    #[test]
    fn home_area_is_reachable_by_its_role() {
        for role in Role::ALL {
            assert!(home_capability(role).required_roles().contains(role));
        }
    }
}
