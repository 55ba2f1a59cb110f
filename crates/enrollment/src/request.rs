use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classhub_auth::PrincipalId;
use classhub_core::{ClassId, DomainError, DomainResult, EnrollmentRequestId};

/// Longest join message a student may attach.
pub const MAX_MESSAGE_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

/// A reviewer's verdict on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn resulting_status(&self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Approved,
            Decision::Reject => RequestStatus::Rejected,
        }
    }
}

/// A student's request to join a private class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub id: EnrollmentRequestId,
    pub student_id: PrincipalId,
    pub class_id: ClassId,
    pub message: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_by: Option<PrincipalId>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl EnrollmentRequest {
    pub fn pending(
        id: EnrollmentRequestId,
        student_id: PrincipalId,
        class_id: ClassId,
        message: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            student_id,
            class_id,
            message,
            status: RequestStatus::Pending,
            created_at,
            reviewed_by: None,
            reviewed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Produce the decided version of this request.
    ///
    /// Decisions are single-shot: deciding anything but a pending request is a
    /// `AlreadyDecided`, never an overwrite of the earlier verdict.
    pub fn decide(
        &self,
        decision: Decision,
        reviewer: PrincipalId,
        reviewed_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !self.is_pending() {
            return Err(DomainError::AlreadyDecided {
                request_id: self.id,
                status: self.status.as_str(),
            });
        }
        Ok(Self {
            status: decision.resulting_status(),
            reviewed_by: Some(reviewer),
            reviewed_at: Some(reviewed_at),
            ..self.clone()
        })
    }
}

/// Trim a join message; blank becomes `None`, oversized is rejected.
pub fn normalize_message(message: Option<String>) -> DomainResult<Option<String>> {
    let Some(message) = message else {
        return Ok(None);
    };
    let message = message.trim();
    if message.is_empty() {
        return Ok(None);
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(DomainError::validation(format!(
            "message exceeds {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(Some(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_request() -> EnrollmentRequest {
        EnrollmentRequest::pending(
            EnrollmentRequestId::new(),
            PrincipalId::new(),
            ClassId::new(),
            Some("please".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn approve_records_reviewer_and_time() {
        let request = pending_request();
        let reviewer = PrincipalId::new();
        let at = Utc::now();
        let decided = request.decide(Decision::Approve, reviewer, at).unwrap();

        assert_eq!(decided.status, RequestStatus::Approved);
        assert_eq!(decided.reviewed_by, Some(reviewer));
        assert_eq!(decided.reviewed_at, Some(at));
        assert_eq!(decided.id, request.id);
        assert_eq!(decided.message, request.message);
    }

    #[test]
    fn second_decision_is_refused() {
        let reviewer = PrincipalId::new();
        let rejected = pending_request()
            .decide(Decision::Reject, reviewer, Utc::now())
            .unwrap();

        let err = rejected.decide(Decision::Approve, reviewer, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyDecided { status: "rejected", .. }));
    }

    #[test]
    fn decide_does_not_mutate_original() {
        let request = pending_request();
        let _ = request.decide(Decision::Reject, PrincipalId::new(), Utc::now()).unwrap();
        assert!(request.is_pending());
    }

    #[test]
    fn blank_message_becomes_none() {
        assert_eq!(normalize_message(Some("   ".to_string())), Ok(None));
        assert_eq!(normalize_message(None), Ok(None));
        assert_eq!(
            normalize_message(Some("  hi there ".to_string())),
            Ok(Some("hi there".to_string()))
        );
    }

    #[test]
    fn oversized_message_is_rejected() {
        let long = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(matches!(normalize_message(Some(long)), Err(DomainError::Validation(_))));

        let exact = "y".repeat(MAX_MESSAGE_LEN);
        assert_eq!(normalize_message(Some(exact.clone())), Ok(Some(exact)));
    }
}
