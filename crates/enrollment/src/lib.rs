//! Enrollment domain module (classes, enrollment requests, enrollments).
//!
//! Business rules are implemented as deterministic domain logic (no IO, no
//! storage). The infra layer applies the resulting plans atomically.

pub mod class;
pub mod enrollment;
pub mod join;
pub mod request;

pub use class::{Class, ClassDraft, ClassStatus, ClassUpdate, ClassVisibility, Visibility, ensure_can_manage};
pub use enrollment::{Enrollment, EnrollmentStatus};
pub use join::{JoinPlan, JoinRefused, plan_join};
pub use request::{
    Decision, EnrollmentRequest, MAX_MESSAGE_LEN, RequestStatus, normalize_message,
};
