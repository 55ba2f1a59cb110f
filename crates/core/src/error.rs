//! Domain error model.

use thiserror::Error;

use crate::EnrollmentRequestId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures raised by domain rules. Storage failures are infra's.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input: blank class name, oversized join message.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Decisions are single-shot; the request already carries a verdict.
    #[error("request {request_id} was already {status}")]
    AlreadyDecided {
        request_id: EnrollmentRequestId,
        status: &'static str,
    },

    /// The principal neither owns the class nor is an admin.
    #[error("principal does not manage this class")]
    NotClassManager,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_decided_names_the_request() {
        let request_id = EnrollmentRequestId::new();
        let err = DomainError::AlreadyDecided {
            request_id,
            status: "approved",
        };
        assert_eq!(err.to_string(), format!("request {request_id} was already approved"));
    }
}
