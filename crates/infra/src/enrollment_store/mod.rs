//! Class and enrollment storage boundary.
//!
//! The traits here are the only way the workflow touches persistence. Every
//! mutating call is atomic with its own uniqueness / status check, so callers
//! never need a read-then-write window to keep the invariants.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEnrollmentStore;
pub use postgres::PostgresEnrollmentStore;
pub use r#trait::{
    ClassDeletion, ClassDirectory, ClassStore, DecidedRequest, EnrollmentBackend,
    EnrollmentRepository, StoreError,
};
