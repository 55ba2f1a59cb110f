use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use classhub_auth::PrincipalId;
use classhub_core::{ClassId, EnrollmentId, EnrollmentRequestId};
use classhub_enrollment::{Class, ClassVisibility, Decision, Enrollment, EnrollmentRequest};

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to domain errors. Uniqueness
/// and status guards surface as `AlreadyExists` / `StaleDecision`; everything
/// transient is `Storage` and safe to retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A decision targeted a request that is no longer pending.
    #[error("stale decision: {0}")]
    StaleDecision(String),

    /// A conditional write found the row changed since the caller read it.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Result of a decision: the updated request, plus the enrollment for approvals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecidedRequest {
    pub request: EnrollmentRequest,
    /// Set for approvals. Written in the same atomic step as the status change.
    pub enrollment: Option<Enrollment>,
    /// `false` when the student already had an enrollment for the class and the
    /// existing row was kept.
    pub enrollment_created: bool,
}

/// What a class deletion removed along with the class row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassDeletion {
    pub class_id: ClassId,
    pub removed_requests: u64,
    /// Pending requests voided by the deletion (removed, never marked rejected).
    pub removed_pending_requests: u64,
    pub removed_enrollments: u64,
}

/// Read-side class lookups consumed by the workflow.
#[async_trait::async_trait]
pub trait ClassDirectory: Send + Sync {
    /// Visibility, owner and lifecycle status, or `NotFound`.
    async fn get_visibility(&self, class_id: ClassId) -> Result<ClassVisibility, StoreError>;

    async fn get_class(&self, class_id: ClassId) -> Result<Option<Class>, StoreError>;

    /// All classes, newest first.
    async fn list_classes(&self) -> Result<Vec<Class>, StoreError>;

    async fn list_classes_for_teacher(&self, teacher_id: PrincipalId) -> Result<Vec<Class>, StoreError>;
}

/// Class mutations.
#[async_trait::async_trait]
pub trait ClassStore: ClassDirectory {
    /// Insert a new class. `AlreadyExists` if the id is taken.
    async fn insert_class(&self, class: Class) -> Result<Class, StoreError>;

    /// Replace the class row only if it still equals `expected` (compare-and-swap).
    ///
    /// `Conflict` if another writer changed it since `expected` was read;
    /// `NotFound` if it was deleted.
    async fn update_class(&self, expected: &Class, class: Class) -> Result<Class, StoreError>;

    /// Delete a class and, in the same atomic step, every request and
    /// enrollment that references it.
    async fn delete_class(&self, class_id: ClassId) -> Result<ClassDeletion, StoreError>;
}

/// Atomic operations over enrollment requests and enrollments.
#[async_trait::async_trait]
pub trait EnrollmentRepository: Send + Sync {
    async fn find_pending_request(
        &self,
        student_id: PrincipalId,
        class_id: ClassId,
    ) -> Result<Option<EnrollmentRequest>, StoreError>;

    async fn find_enrollment(
        &self,
        student_id: PrincipalId,
        class_id: ClassId,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn get_request(&self, request_id: EnrollmentRequestId) -> Result<Option<EnrollmentRequest>, StoreError>;

    async fn get_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Option<Enrollment>, StoreError>;

    /// Insert a pending request.
    ///
    /// `AlreadyExists` if a pending request for the same (student, class) exists;
    /// `NotFound` if the class does not exist.
    async fn create_request(&self, request: EnrollmentRequest) -> Result<EnrollmentRequest, StoreError>;

    /// Decide a request only if it is still pending (compare-and-swap on status).
    ///
    /// Approval inserts the enrollment in the same atomic step. A request that
    /// was already decided yields `StaleDecision`.
    async fn decide_request(
        &self,
        request_id: EnrollmentRequestId,
        decision: Decision,
        reviewer_id: PrincipalId,
        reviewed_at: DateTime<Utc>,
    ) -> Result<DecidedRequest, StoreError>;

    /// Insert an enrollment. `AlreadyExists` if the pair is already enrolled.
    async fn create_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError>;

    /// Delete exactly one enrollment row and return it. Requests are untouched.
    async fn delete_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Enrollment, StoreError>;

    async fn list_by_class(&self, class_id: ClassId) -> Result<Vec<Enrollment>, StoreError>;

    async fn list_requests_by_class(&self, class_id: ClassId) -> Result<Vec<EnrollmentRequest>, StoreError>;

    /// Pending requests for every class owned by `teacher_id`, oldest first.
    async fn list_pending_requests_for_teacher(
        &self,
        teacher_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, StoreError>;

    async fn list_enrollments_for_student(&self, student_id: PrincipalId) -> Result<Vec<Enrollment>, StoreError>;

    async fn list_requests_for_student(
        &self,
        student_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, StoreError>;
}

/// Everything the workflow needs from one backing store.
pub trait EnrollmentBackend: ClassStore + EnrollmentRepository {}

impl<T> EnrollmentBackend for T where T: ClassStore + EnrollmentRepository + ?Sized {}

#[async_trait::async_trait]
impl<S> ClassDirectory for Arc<S>
where
    S: ClassDirectory + ?Sized,
{
    async fn get_visibility(&self, class_id: ClassId) -> Result<ClassVisibility, StoreError> {
        (**self).get_visibility(class_id).await
    }

    async fn get_class(&self, class_id: ClassId) -> Result<Option<Class>, StoreError> {
        (**self).get_class(class_id).await
    }

    async fn list_classes(&self) -> Result<Vec<Class>, StoreError> {
        (**self).list_classes().await
    }

    async fn list_classes_for_teacher(&self, teacher_id: PrincipalId) -> Result<Vec<Class>, StoreError> {
        (**self).list_classes_for_teacher(teacher_id).await
    }
}

#[async_trait::async_trait]
impl<S> ClassStore for Arc<S>
where
    S: ClassStore + ?Sized,
{
    async fn insert_class(&self, class: Class) -> Result<Class, StoreError> {
        (**self).insert_class(class).await
    }

    async fn update_class(&self, expected: &Class, class: Class) -> Result<Class, StoreError> {
        (**self).update_class(expected, class).await
    }

    async fn delete_class(&self, class_id: ClassId) -> Result<ClassDeletion, StoreError> {
        (**self).delete_class(class_id).await
    }
}

#[async_trait::async_trait]
impl<S> EnrollmentRepository for Arc<S>
where
    S: EnrollmentRepository + ?Sized,
{
    async fn find_pending_request(
        &self,
        student_id: PrincipalId,
        class_id: ClassId,
    ) -> Result<Option<EnrollmentRequest>, StoreError> {
        (**self).find_pending_request(student_id, class_id).await
    }

    async fn find_enrollment(
        &self,
        student_id: PrincipalId,
        class_id: ClassId,
    ) -> Result<Option<Enrollment>, StoreError> {
        (**self).find_enrollment(student_id, class_id).await
    }

    async fn get_request(&self, request_id: EnrollmentRequestId) -> Result<Option<EnrollmentRequest>, StoreError> {
        (**self).get_request(request_id).await
    }

    async fn get_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        (**self).get_enrollment(enrollment_id).await
    }

    async fn create_request(&self, request: EnrollmentRequest) -> Result<EnrollmentRequest, StoreError> {
        (**self).create_request(request).await
    }

    async fn decide_request(
        &self,
        request_id: EnrollmentRequestId,
        decision: Decision,
        reviewer_id: PrincipalId,
        reviewed_at: DateTime<Utc>,
    ) -> Result<DecidedRequest, StoreError> {
        (**self)
            .decide_request(request_id, decision, reviewer_id, reviewed_at)
            .await
    }

    async fn create_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        (**self).create_enrollment(enrollment).await
    }

    async fn delete_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Enrollment, StoreError> {
        (**self).delete_enrollment(enrollment_id).await
    }

    async fn list_by_class(&self, class_id: ClassId) -> Result<Vec<Enrollment>, StoreError> {
        (**self).list_by_class(class_id).await
    }

    async fn list_requests_by_class(&self, class_id: ClassId) -> Result<Vec<EnrollmentRequest>, StoreError> {
        (**self).list_requests_by_class(class_id).await
    }

    async fn list_pending_requests_for_teacher(
        &self,
        teacher_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, StoreError> {
        (**self).list_pending_requests_for_teacher(teacher_id).await
    }

    async fn list_enrollments_for_student(&self, student_id: PrincipalId) -> Result<Vec<Enrollment>, StoreError> {
        (**self).list_enrollments_for_student(student_id).await
    }

    async fn list_requests_for_student(
        &self,
        student_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, StoreError> {
        (**self).list_requests_for_student(student_id).await
    }
}
