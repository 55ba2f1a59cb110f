use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PrincipalId;

/// Claims handed over by the external identity provider (transport-agnostic).
///
/// Claims never carry a role: roles are resolved through a `RoleStore`, so a
/// client cannot escalate by editing what it sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject / principal identifier.
    pub sub: PrincipalId,

    pub display_name: String,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate identity claims.
///
/// Signature verification / decoding happens in the identity provider.
pub fn validate_claims(claims: &IdentityClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(issued_at: DateTime<Utc>, ttl_minutes: i64) -> IdentityClaims {
        IdentityClaims {
            sub: PrincipalId::new(),
            display_name: "Grace".to_string(),
            issued_at,
            expires_at: issued_at + Duration::minutes(ttl_minutes),
        }
    }

    #[test]
    fn accepts_claims_inside_window() {
        let now = Utc::now();
        assert_eq!(validate_claims(&claims(now - Duration::minutes(1), 10), now), Ok(()));
    }

    #[test]
    fn rejects_expired_claims() {
        let now = Utc::now();
        assert_eq!(
            validate_claims(&claims(now - Duration::minutes(20), 10), now),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn rejects_future_claims() {
        let now = Utc::now();
        assert_eq!(
            validate_claims(&claims(now + Duration::minutes(5), 10), now),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn rejects_inverted_window() {
        let now = Utc::now();
        assert_eq!(
            validate_claims(&claims(now, -1), now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}
