use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classhub_auth::{Principal, PrincipalId, Role};
use classhub_core::{ClassId, CourseId, DomainError, DomainResult};

/// Whether students join directly or have to ask first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// Class lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassStatus {
    Active,
    Archived,
}

impl ClassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassStatus::Active => "active",
            ClassStatus::Archived => "archived",
        }
    }
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

/// A class students enroll into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    pub description: Option<String>,
    pub course_id: Option<CourseId>,
    /// Owning teacher. `None` means only admins manage the class.
    pub teacher_id: Option<PrincipalId>,
    pub visibility: Visibility,
    pub status: ClassStatus,
    pub created_at: DateTime<Utc>,
}

/// Read-side projection consumed by the enrollment workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassVisibility {
    pub class_id: ClassId,
    pub is_public: bool,
    pub owner_id: Option<PrincipalId>,
    pub status: ClassStatus,
}

/// Input for creating a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDraft {
    pub name: String,
    pub description: Option<String>,
    pub course_id: Option<CourseId>,
    pub visibility: Visibility,
}

/// Partial update of a class. `None` keeps the existing value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub course_id: Option<Option<CourseId>>,
    pub visibility: Option<Visibility>,
    pub status: Option<ClassStatus>,
}

fn normalize_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("class name cannot be empty"));
    }
    Ok(name.to_string())
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

impl Class {
    /// Build a new active class owned by `owner`.
    pub fn create(
        id: ClassId,
        draft: ClassDraft,
        owner: Option<PrincipalId>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: normalize_name(&draft.name)?,
            description: normalize_description(draft.description),
            course_id: draft.course_id,
            teacher_id: owner,
            visibility: draft.visibility,
            status: ClassStatus::Active,
            created_at,
        })
    }

    /// Return the class with `update` applied; identity and ownership never change.
    pub fn updated(&self, update: ClassUpdate) -> DomainResult<Self> {
        let mut next = self.clone();
        if let Some(name) = update.name {
            next.name = normalize_name(&name)?;
        }
        if let Some(description) = update.description {
            next.description = normalize_description(description);
        }
        if let Some(course_id) = update.course_id {
            next.course_id = course_id;
        }
        if let Some(visibility) = update.visibility {
            next.visibility = visibility;
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        Ok(next)
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn visibility_view(&self) -> ClassVisibility {
        ClassVisibility {
            class_id: self.id,
            is_public: self.is_public(),
            owner_id: self.teacher_id,
            status: self.status,
        }
    }
}

/// Ownership rule for mutating a class and its roster.
///
/// Admins manage every class; a teacher manages only the classes they own.
/// Role gating (`ManageClasses` etc.) is checked separately by the guard.
pub fn ensure_can_manage(principal: &Principal, owner_id: Option<PrincipalId>) -> DomainResult<()> {
    match principal.role {
        Some(Role::Admin) => Ok(()),
        Some(Role::Teacher) if owner_id == Some(principal.id) => Ok(()),
        _ => Err(DomainError::NotClassManager),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> ClassDraft {
        ClassDraft {
            name: name.to_string(),
            description: Some("  ".to_string()),
            course_id: None,
            visibility: Visibility::Private,
        }
    }

    #[test]
    fn create_trims_name_and_drops_blank_description() {
        let class = Class::create(ClassId::new(), draft("  Rust 101 "), None, Utc::now()).unwrap();
        assert_eq!(class.name, "Rust 101");
        assert_eq!(class.description, None);
        assert_eq!(class.status, ClassStatus::Active);
        assert!(!class.is_public());
    }

    #[test]
    fn create_rejects_blank_name() {
        let err = Class::create(ClassId::new(), draft("   "), None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn update_keeps_identity_and_owner() {
        let owner = PrincipalId::new();
        let class = Class::create(ClassId::new(), draft("Algebra"), Some(owner), Utc::now()).unwrap();
        let next = class
            .updated(ClassUpdate {
                visibility: Some(Visibility::Public),
                status: Some(ClassStatus::Archived),
                description: Some(Some("Linear maps".to_string())),
                ..ClassUpdate::default()
            })
            .unwrap();

        assert_eq!(next.id, class.id);
        assert_eq!(next.teacher_id, Some(owner));
        assert_eq!(next.name, "Algebra");
        assert_eq!(next.description.as_deref(), Some("Linear maps"));
        assert!(next.visibility_view().is_public);
        assert_eq!(next.visibility_view().status, ClassStatus::Archived);
    }

    #[test]
    fn owner_teacher_and_admin_may_manage() {
        let owner = PrincipalId::new();
        let teacher = Principal::new(owner, "Owner", Role::Teacher);
        let admin = Principal::new(PrincipalId::new(), "Admin", Role::Admin);
        assert!(ensure_can_manage(&teacher, Some(owner)).is_ok());
        assert!(ensure_can_manage(&admin, Some(owner)).is_ok());
        assert!(ensure_can_manage(&admin, None).is_ok());
    }

    #[test]
    fn other_teacher_and_coordinator_may_not_manage() {
        let owner = PrincipalId::new();
        let other = Principal::new(PrincipalId::new(), "Other", Role::Teacher);
        let coordinator = Principal::new(PrincipalId::new(), "Coord", Role::Coordinator);
        assert_eq!(ensure_can_manage(&other, Some(owner)), Err(DomainError::NotClassManager));
        assert_eq!(ensure_can_manage(&other, None), Err(DomainError::NotClassManager));
        assert_eq!(ensure_can_manage(&coordinator, Some(owner)), Err(DomainError::NotClassManager));
    }
}
