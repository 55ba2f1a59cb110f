//! Join-attempt planning.
//!
//! `plan_join` decides, from what the caller observed, which single write (if
//! any) a join attempt needs. The observation may already be stale when the
//! write lands; storage uniqueness constraints settle that race, and the
//! workflow re-plans from a fresh read when a write reports a duplicate.

use thiserror::Error;

use crate::{ClassStatus, ClassVisibility, Enrollment, EnrollmentRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPlan {
    /// Public class: create an approved enrollment, no request row.
    Enroll,
    /// Private class: create a pending request.
    Request,
    /// Idempotent no-op.
    AlreadyEnrolled(Enrollment),
    /// Idempotent no-op: a request is already waiting for review.
    AlreadyRequested(EnrollmentRequest),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JoinRefused {
    #[error("class is archived and does not accept new students")]
    ClassArchived,
}

pub fn plan_join(
    class: &ClassVisibility,
    enrollment: Option<Enrollment>,
    pending_request: Option<EnrollmentRequest>,
) -> Result<JoinPlan, JoinRefused> {
    if let Some(enrollment) = enrollment {
        return Ok(JoinPlan::AlreadyEnrolled(enrollment));
    }
    if class.status == ClassStatus::Archived {
        return Err(JoinRefused::ClassArchived);
    }
    if class.is_public {
        return Ok(JoinPlan::Enroll);
    }
    match pending_request {
        Some(request) => Ok(JoinPlan::AlreadyRequested(request)),
        None => Ok(JoinPlan::Request),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use classhub_auth::PrincipalId;
    use classhub_core::{ClassId, EnrollmentId, EnrollmentRequestId};
    use proptest::prelude::*;

    fn class(is_public: bool, status: ClassStatus) -> ClassVisibility {
        ClassVisibility {
            class_id: ClassId::new(),
            is_public,
            owner_id: Some(PrincipalId::new()),
            status,
        }
    }

    fn enrollment(class: &ClassVisibility) -> Enrollment {
        Enrollment::approved(EnrollmentId::new(), PrincipalId::new(), class.class_id, Utc::now())
    }

    fn pending(class: &ClassVisibility) -> EnrollmentRequest {
        EnrollmentRequest::pending(
            EnrollmentRequestId::new(),
            PrincipalId::new(),
            class.class_id,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn public_class_enrolls_directly() {
        let c = class(true, ClassStatus::Active);
        assert_eq!(plan_join(&c, None, None), Ok(JoinPlan::Enroll));
    }

    #[test]
    fn private_class_creates_request() {
        let c = class(false, ClassStatus::Active);
        assert_eq!(plan_join(&c, None, None), Ok(JoinPlan::Request));
    }

    #[test]
    fn private_class_with_pending_request_is_noop() {
        let c = class(false, ClassStatus::Active);
        let request = pending(&c);
        assert_eq!(
            plan_join(&c, None, Some(request.clone())),
            Ok(JoinPlan::AlreadyRequested(request))
        );
    }

    #[test]
    fn existing_enrollment_wins_over_everything() {
        let c = class(false, ClassStatus::Archived);
        let e = enrollment(&c);
        assert_eq!(
            plan_join(&c, Some(e.clone()), Some(pending(&c))),
            Ok(JoinPlan::AlreadyEnrolled(e))
        );
    }

    #[test]
    fn archived_class_refuses_new_students() {
        let c = class(true, ClassStatus::Archived);
        assert_eq!(plan_join(&c, None, None), Err(JoinRefused::ClassArchived));
    }

    proptest! {
        /// Property: a join never plans a write when a record for the pair exists
        /// (an enrollment, or a pending request on a private class).
        #[test]
        fn existing_records_never_produce_writes(
            is_public in any::<bool>(),
            archived in any::<bool>(),
            has_enrollment in any::<bool>(),
            has_pending in any::<bool>(),
        ) {
            let status = if archived { ClassStatus::Archived } else { ClassStatus::Active };
            let c = class(is_public, status);
            let e = has_enrollment.then(|| enrollment(&c));
            let r = has_pending.then(|| pending(&c));

            match plan_join(&c, e, r) {
                Ok(JoinPlan::Enroll | JoinPlan::Request) => {
                    prop_assert!(!has_enrollment);
                    prop_assert!(!archived);
                    prop_assert!(is_public || !has_pending);
                }
                Ok(JoinPlan::AlreadyEnrolled(_) | JoinPlan::AlreadyRequested(_)) => {}
                Err(JoinRefused::ClassArchived) => {
                    prop_assert!(archived && !has_enrollment);
                }
            }
        }
    }
}
