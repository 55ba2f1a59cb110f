//! Infrastructure layer: storage backends, the enrollment workflow, config.

pub mod config;
pub mod enrollment_store;
pub mod workflow;


pub use config::{InfraConfig, StoreKind, build_store};
pub use enrollment_store::{
    ClassDeletion, ClassDirectory, ClassStore, DecidedRequest, EnrollmentBackend,
    EnrollmentRepository, InMemoryEnrollmentStore, PostgresEnrollmentStore, StoreError,
};
pub use workflow::{ClassRoster, EnrollmentWorkflow, JoinOutcome, StudentOverview, WorkflowError};
