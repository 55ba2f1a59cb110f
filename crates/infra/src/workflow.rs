//! Enrollment workflow (application-level orchestration).
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! Principal + request
//!   ↓
//! 1. Guard: capability check on the principal's role (pure)
//!   ↓
//! 2. Directory: class visibility / ownership lookup
//!   ↓
//! 3. Domain: plan the transition (pure, `classhub-enrollment`)
//!   ↓
//! 4. Repository: one atomic write guarded by a uniqueness or status check
//!   ↓
//! Outcome describing the new state
//! ```
//!
//! The workflow holds no locks and keeps no state between calls. When a write
//! loses a race (duplicate pending request, duplicate enrollment) the storage
//! constraint reports it and the join is re-planned from a fresh read.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use classhub_auth::{
    AccessDecision, AuthzError, Capability, Principal, PrincipalId, Role, RoleSet, authorize, require,
};
use classhub_core::{ClassId, DomainError, EnrollmentId, EnrollmentRequestId};
use classhub_enrollment::{
    Class, ClassDraft, ClassStatus, ClassUpdate, Decision, Enrollment, EnrollmentRequest, JoinPlan,
    JoinRefused, ensure_can_manage, normalize_message, plan_join,
};

use crate::enrollment_store::{ClassDeletion, DecidedRequest, EnrollmentBackend, StoreError};

/// Joins and class edits re-read at most this many times after losing a write race.
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    /// Guard or ownership denial. Not retried.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The principal's role is still resolving; re-evaluate later.
    #[error("authorization pending")]
    AuthorizationPending,

    #[error("not found: {0}")]
    NotFound(String),

    /// The request was already decided by someone else. Refresh and move on.
    #[error("stale decision: {0}")]
    StaleDecision(String),

    #[error("class is archived")]
    ClassArchived,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient storage failure. Safe to retry the whole operation.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl WorkflowError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Storage(_))
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => WorkflowError::NotFound(msg),
            StoreError::AlreadyExists(msg) => WorkflowError::Conflict(msg),
            StoreError::StaleDecision(msg) => WorkflowError::StaleDecision(msg),
            StoreError::Conflict(msg) => WorkflowError::Conflict(msg),
            StoreError::Storage(msg) => WorkflowError::Storage(msg),
        }
    }
}

impl From<AuthzError> for WorkflowError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Pending => WorkflowError::AuthorizationPending,
            forbidden @ AuthzError::Forbidden { .. } => WorkflowError::Unauthorized(forbidden.to_string()),
        }
    }
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => WorkflowError::Validation(msg),
            already @ DomainError::AlreadyDecided { .. } => WorkflowError::StaleDecision(already.to_string()),
            not_manager @ DomainError::NotClassManager => WorkflowError::Unauthorized(not_manager.to_string()),
        }
    }
}

impl From<JoinRefused> for WorkflowError {
    fn from(value: JoinRefused) -> Self {
        match value {
            JoinRefused::ClassArchived => WorkflowError::ClassArchived,
        }
    }
}

/// Result of a join attempt. The `Already*` variants are informational no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum JoinOutcome {
    Enrolled(Enrollment),
    Requested(EnrollmentRequest),
    AlreadyEnrolled(Enrollment),
    AlreadyRequested(EnrollmentRequest),
}

impl JoinOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, JoinOutcome::AlreadyEnrolled(_) | JoinOutcome::AlreadyRequested(_))
    }
}

/// Everything a class manager sees for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRoster {
    pub class: Class,
    pub enrollments: Vec<Enrollment>,
    /// Request history for the class, pending and decided.
    pub requests: Vec<EnrollmentRequest>,
}

impl ClassRoster {
    pub fn pending_requests(&self) -> impl Iterator<Item = &EnrollmentRequest> {
        self.requests.iter().filter(|r| r.is_pending())
    }
}

/// A student's memberships and requests across classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentOverview {
    pub student_id: PrincipalId,
    pub enrollments: Vec<Enrollment>,
    pub requests: Vec<EnrollmentRequest>,
}

/// Enrollment state machine over an `EnrollmentBackend`.
#[derive(Debug, Clone)]
pub struct EnrollmentWorkflow<S> {
    store: S,
}

impl<S> EnrollmentWorkflow<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> EnrollmentWorkflow<S>
where
    S: EnrollmentBackend,
{
    // ─────────────────────────────────────────────────────────────────────────
    // Class management
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a class owned by the calling teacher (or admin).
    pub async fn create_class(&self, principal: &Principal, draft: ClassDraft) -> Result<Class, WorkflowError> {
        require(principal, Capability::ManageClasses)?;
        let class = Class::create(ClassId::new(), draft, Some(principal.id), Utc::now())?;
        let class = self.store.insert_class(class).await?;
        info!(
            class_id = %class.id,
            owner = %principal.id,
            visibility = class.visibility.as_str(),
            "class created"
        );
        Ok(class)
    }

    pub async fn update_class(
        &self,
        principal: &Principal,
        class_id: ClassId,
        update: ClassUpdate,
    ) -> Result<Class, WorkflowError> {
        require(principal, Capability::ManageClasses)?;

        // The update is re-applied to a fresh read when another edit lands first,
        // so it only ever changes the fields it names.
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let class = self.load_class(class_id).await?;
            ensure_can_manage(principal, class.teacher_id)?;

            match self.store.update_class(&class, class.updated(update.clone())?).await {
                Ok(updated) => {
                    info!(class_id = %class_id, actor = %principal.id, status = updated.status.as_str(), "class updated");
                    return Ok(updated);
                }
                Err(StoreError::Conflict(reason)) => {
                    debug!(class_id = %class_id, attempt, reason = %reason, "class edit raced another edit; re-reading");
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(WorkflowError::Conflict(format!("class {class_id} kept changing during the update")))
    }

    /// Archive a class: existing rows stay, new joins are refused.
    pub async fn archive_class(&self, principal: &Principal, class_id: ClassId) -> Result<Class, WorkflowError> {
        let update = ClassUpdate {
            status: Some(ClassStatus::Archived),
            ..ClassUpdate::default()
        };
        self.update_class(principal, class_id, update).await
    }

    /// Delete a class with all of its requests and enrollments.
    ///
    /// Pending requests are voided with the class, not marked rejected.
    pub async fn delete_class(&self, principal: &Principal, class_id: ClassId) -> Result<ClassDeletion, WorkflowError> {
        require(principal, Capability::ManageClasses)?;
        let visibility = self.store.get_visibility(class_id).await?;
        ensure_can_manage(principal, visibility.owner_id)?;

        let deletion = self.store.delete_class(class_id).await?;
        info!(
            class_id = %class_id,
            actor = %principal.id,
            removed_requests = deletion.removed_requests,
            removed_pending_requests = deletion.removed_pending_requests,
            removed_enrollments = deletion.removed_enrollments,
            "class deleted"
        );
        Ok(deletion)
    }

    /// Classes visible to the principal: students browse active classes only.
    pub async fn browse_classes(&self, principal: &Principal) -> Result<Vec<Class>, WorkflowError> {
        let any_role = RoleSet::new(Role::ALL).map_err(|e| WorkflowError::Validation(e.to_string()))?;
        match authorize(principal, any_role) {
            AccessDecision::Allow => {}
            AccessDecision::Pending => return Err(WorkflowError::AuthorizationPending),
            AccessDecision::Deny => return Err(WorkflowError::Unauthorized("no role".to_string())),
        }

        let classes = self.store.list_classes().await?;
        if principal.has_role(Role::Student) {
            return Ok(classes
                .into_iter()
                .filter(|c| c.status == ClassStatus::Active)
                .collect());
        }
        Ok(classes)
    }

    /// Classes owned by the calling teacher.
    pub async fn my_classes(&self, principal: &Principal) -> Result<Vec<Class>, WorkflowError> {
        require(principal, Capability::TeacherArea)?;
        Ok(self.store.list_classes_for_teacher(principal.id).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Join
    // ─────────────────────────────────────────────────────────────────────────

    /// A student asks to join a class.
    ///
    /// Public classes enroll directly; private classes get a pending request.
    /// Repeating the call is a no-op reported as `AlreadyEnrolled` /
    /// `AlreadyRequested`.
    pub async fn join_class(
        &self,
        principal: &Principal,
        class_id: ClassId,
        message: Option<String>,
    ) -> Result<JoinOutcome, WorkflowError> {
        require(principal, Capability::JoinClass)?;
        let message = normalize_message(message)?;
        let student_id = principal.id;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let visibility = self.store.get_visibility(class_id).await?;
            let enrollment = self.store.find_enrollment(student_id, class_id).await?;
            let pending = self.store.find_pending_request(student_id, class_id).await?;

            let write = match plan_join(&visibility, enrollment, pending)? {
                JoinPlan::AlreadyEnrolled(enrollment) => {
                    debug!(student_id = %student_id, class_id = %class_id, "join ignored: already enrolled");
                    return Ok(JoinOutcome::AlreadyEnrolled(enrollment));
                }
                JoinPlan::AlreadyRequested(request) => {
                    debug!(student_id = %student_id, class_id = %class_id, "join ignored: already requested");
                    return Ok(JoinOutcome::AlreadyRequested(request));
                }
                JoinPlan::Enroll => {
                    let enrollment = Enrollment::approved(EnrollmentId::new(), student_id, class_id, Utc::now());
                    self.store
                        .create_enrollment(enrollment)
                        .await
                        .map(JoinOutcome::Enrolled)
                }
                JoinPlan::Request => {
                    let request = EnrollmentRequest::pending(
                        EnrollmentRequestId::new(),
                        student_id,
                        class_id,
                        message.clone(),
                        Utc::now(),
                    );
                    self.store
                        .create_request(request)
                        .await
                        .map(JoinOutcome::Requested)
                }
            };

            match write {
                Ok(outcome) => {
                    info!(student_id = %student_id, class_id = %class_id, outcome = outcome_kind(&outcome), "join applied");
                    return Ok(outcome);
                }
                Err(StoreError::AlreadyExists(reason)) => {
                    debug!(
                        student_id = %student_id,
                        class_id = %class_id,
                        attempt,
                        reason = %reason,
                        "join lost a write race; re-planning"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(WorkflowError::Conflict(format!(
            "join for student {student_id} in class {class_id} kept racing"
        )))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────────

    /// Approve a pending request. The status change and the new enrollment are
    /// written in one atomic step.
    pub async fn approve_request(
        &self,
        principal: &Principal,
        request_id: EnrollmentRequestId,
    ) -> Result<DecidedRequest, WorkflowError> {
        self.decide(principal, request_id, Decision::Approve).await
    }

    pub async fn reject_request(
        &self,
        principal: &Principal,
        request_id: EnrollmentRequestId,
    ) -> Result<DecidedRequest, WorkflowError> {
        self.decide(principal, request_id, Decision::Reject).await
    }

    async fn decide(
        &self,
        principal: &Principal,
        request_id: EnrollmentRequestId,
        decision: Decision,
    ) -> Result<DecidedRequest, WorkflowError> {
        require(principal, Capability::ReviewEnrollmentRequests)?;
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("request {request_id}")))?;
        let visibility = self.store.get_visibility(request.class_id).await?;
        ensure_can_manage(principal, visibility.owner_id)?;

        match self
            .store
            .decide_request(request_id, decision, principal.id, Utc::now())
            .await
        {
            Ok(decided) => {
                info!(
                    request_id = %request_id,
                    reviewer = %principal.id,
                    student_id = %decided.request.student_id,
                    class_id = %decided.request.class_id,
                    decision = ?decision,
                    enrollment_created = decided.enrollment_created,
                    "enrollment request decided"
                );
                Ok(decided)
            }
            Err(StoreError::StaleDecision(reason)) => {
                warn!(request_id = %request_id, reviewer = %principal.id, reason = %reason, "stale decision");
                Err(WorkflowError::StaleDecision(reason))
            }
            Err(other) => Err(other.into()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roster
    // ─────────────────────────────────────────────────────────────────────────

    /// Remove a student from a class. Request history stays untouched, so the
    /// student can start a fresh join cycle.
    pub async fn remove_student(
        &self,
        principal: &Principal,
        enrollment_id: EnrollmentId,
    ) -> Result<Enrollment, WorkflowError> {
        require(principal, Capability::ManageRoster)?;
        let enrollment = self
            .store
            .get_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("enrollment {enrollment_id}")))?;
        let visibility = self.store.get_visibility(enrollment.class_id).await?;
        ensure_can_manage(principal, visibility.owner_id)?;

        let removed = self.store.delete_enrollment(enrollment_id).await?;
        info!(
            enrollment_id = %enrollment_id,
            student_id = %removed.student_id,
            class_id = %removed.class_id,
            actor = %principal.id,
            "student removed from class"
        );
        Ok(removed)
    }

    /// Enrollments and request history of one class.
    ///
    /// Owners and admins see their classes through `ManageRoster`; coordinators
    /// read every class through `ViewEnrollmentOverview`.
    pub async fn class_roster(&self, principal: &Principal, class_id: ClassId) -> Result<ClassRoster, WorkflowError> {
        // No store read until the role check passes.
        let reads_everything =
            authorize(principal, Capability::ViewEnrollmentOverview.required_roles()).is_allowed();
        if !reads_everything {
            require(principal, Capability::ManageRoster)?;
        }

        let class = self.load_class(class_id).await?;
        if !reads_everything {
            ensure_can_manage(principal, class.teacher_id)?;
        }

        let enrollments = self.store.list_by_class(class_id).await?;
        let requests = self.store.list_requests_by_class(class_id).await?;
        Ok(ClassRoster {
            class,
            enrollments,
            requests,
        })
    }

    /// Pending requests across the classes owned by `teacher_id`.
    ///
    /// Teachers read their own queue; coordinators and admins read anyone's.
    pub async fn pending_requests_for_teacher(
        &self,
        principal: &Principal,
        teacher_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, WorkflowError> {
        if principal.id == teacher_id {
            require(principal, Capability::ReviewEnrollmentRequests)?;
        } else {
            require(principal, Capability::ViewEnrollmentOverview)?;
        }
        Ok(self.store.list_pending_requests_for_teacher(teacher_id).await?)
    }

    /// A student's enrollments and requests. Students only see their own.
    pub async fn student_overview(
        &self,
        principal: &Principal,
        student_id: PrincipalId,
    ) -> Result<StudentOverview, WorkflowError> {
        if principal.id == student_id {
            require(principal, Capability::StudentArea)?;
        } else {
            require(principal, Capability::ViewEnrollmentOverview)?;
        }

        let enrollments = self.store.list_enrollments_for_student(student_id).await?;
        let requests = self.store.list_requests_for_student(student_id).await?;
        Ok(StudentOverview {
            student_id,
            enrollments,
            requests,
        })
    }

    async fn load_class(&self, class_id: ClassId) -> Result<Class, WorkflowError> {
        self.store
            .get_class(class_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("class {class_id}")))
    }
}

fn outcome_kind(outcome: &JoinOutcome) -> &'static str {
    match outcome {
        JoinOutcome::Enrolled(_) => "enrolled",
        JoinOutcome::Requested(_) => "requested",
        JoinOutcome::AlreadyEnrolled(_) => "already_enrolled",
        JoinOutcome::AlreadyRequested(_) => "already_requested",
    }
}
