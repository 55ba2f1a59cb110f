use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classhub_auth::PrincipalId;
use classhub_core::{ClassId, EnrollmentId};

/// Membership status. Only `Approved` rows are materialized by the workflow;
/// `Pending` is accepted when reading rows written by other tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Approved,
    Pending,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Approved => "approved",
            EnrollmentStatus::Pending => "pending",
        }
    }
}

/// A student's membership in a class. At most one per (student, class).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub student_id: PrincipalId,
    pub class_id: ClassId,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn approved(
        id: EnrollmentId,
        student_id: PrincipalId,
        class_id: ClassId,
        enrolled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            student_id,
            class_id,
            status: EnrollmentStatus::Approved,
            enrolled_at,
        }
    }
}

