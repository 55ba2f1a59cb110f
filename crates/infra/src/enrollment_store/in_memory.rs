use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use classhub_auth::PrincipalId;
use classhub_core::{ClassId, EnrollmentId, EnrollmentRequestId};
use classhub_enrollment::{
    Class, ClassVisibility, Decision, Enrollment, EnrollmentRequest, RequestStatus,
};

use super::r#trait::{
    ClassDeletion, ClassDirectory, ClassStore, DecidedRequest, EnrollmentRepository, StoreError,
};

type PairKey = (PrincipalId, ClassId);

#[derive(Debug, Default)]
struct Tables {
    classes: HashMap<ClassId, Class>,
    requests: HashMap<EnrollmentRequestId, EnrollmentRequest>,
    enrollments: HashMap<EnrollmentId, Enrollment>,
    /// Unique index: at most one pending request per (student, class).
    pending_by_pair: HashMap<PairKey, EnrollmentRequestId>,
    /// Unique index: at most one enrollment per (student, class).
    enrollment_by_pair: HashMap<PairKey, EnrollmentId>,
}

impl Tables {
    fn insert_enrollment(&mut self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        let key = (enrollment.student_id, enrollment.class_id);
        if !self.classes.contains_key(&enrollment.class_id) {
            return Err(StoreError::NotFound(format!("class {}", enrollment.class_id)));
        }
        if self.enrollment_by_pair.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!(
                "enrollment for student {} in class {}",
                enrollment.student_id, enrollment.class_id
            )));
        }
        self.enrollment_by_pair.insert(key, enrollment.id);
        self.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment)
    }
}

/// In-memory class/enrollment store.
///
/// Intended for tests/dev. All tables sit behind one lock and every operation
/// takes it exactly once, so each call is linearizable.
#[derive(Debug, Default)]
pub struct InMemoryEnrollmentStore {
    tables: RwLock<Tables>,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn sorted_classes(mut classes: Vec<Class>) -> Vec<Class> {
        classes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        classes
    }

    fn sorted_requests(mut requests: Vec<EnrollmentRequest>) -> Vec<EnrollmentRequest> {
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        requests
    }

    fn sorted_enrollments(mut enrollments: Vec<Enrollment>) -> Vec<Enrollment> {
        enrollments.sort_by(|a, b| a.enrolled_at.cmp(&b.enrolled_at).then(a.id.cmp(&b.id)));
        enrollments
    }
}

#[async_trait::async_trait]
impl ClassDirectory for InMemoryEnrollmentStore {
    async fn get_visibility(&self, class_id: ClassId) -> Result<ClassVisibility, StoreError> {
        let tables = self.read()?;
        tables
            .classes
            .get(&class_id)
            .map(Class::visibility_view)
            .ok_or_else(|| StoreError::NotFound(format!("class {class_id}")))
    }

    async fn get_class(&self, class_id: ClassId) -> Result<Option<Class>, StoreError> {
        Ok(self.read()?.classes.get(&class_id).cloned())
    }

    async fn list_classes(&self) -> Result<Vec<Class>, StoreError> {
        let classes = self.read()?.classes.values().cloned().collect();
        Ok(Self::sorted_classes(classes))
    }

    async fn list_classes_for_teacher(&self, teacher_id: PrincipalId) -> Result<Vec<Class>, StoreError> {
        let classes = self
            .read()?
            .classes
            .values()
            .filter(|c| c.teacher_id == Some(teacher_id))
            .cloned()
            .collect();
        Ok(Self::sorted_classes(classes))
    }
}

#[async_trait::async_trait]
impl ClassStore for InMemoryEnrollmentStore {
    async fn insert_class(&self, class: Class) -> Result<Class, StoreError> {
        let mut tables = self.write()?;
        if tables.classes.contains_key(&class.id) {
            return Err(StoreError::AlreadyExists(format!("class {}", class.id)));
        }
        tables.classes.insert(class.id, class.clone());
        Ok(class)
    }

    async fn update_class(&self, expected: &Class, class: Class) -> Result<Class, StoreError> {
        let mut tables = self.write()?;
        match tables.classes.get_mut(&class.id) {
            Some(existing) if existing == expected => {
                *existing = class.clone();
                Ok(class)
            }
            Some(_) => Err(StoreError::Conflict(format!("class {} changed since it was read", class.id))),
            None => Err(StoreError::NotFound(format!("class {}", class.id))),
        }
    }

    async fn delete_class(&self, class_id: ClassId) -> Result<ClassDeletion, StoreError> {
        let mut tables = self.write()?;
        if tables.classes.remove(&class_id).is_none() {
            return Err(StoreError::NotFound(format!("class {class_id}")));
        }

        let mut removed_requests = 0;
        let mut removed_pending_requests = 0;
        tables.requests.retain(|_, r| {
            if r.class_id != class_id {
                return true;
            }
            removed_requests += 1;
            if r.status == RequestStatus::Pending {
                removed_pending_requests += 1;
            }
            false
        });

        let before = tables.enrollments.len();
        tables.enrollments.retain(|_, e| e.class_id != class_id);
        let removed_enrollments = (before - tables.enrollments.len()) as u64;

        tables.pending_by_pair.retain(|(_, c), _| *c != class_id);
        tables.enrollment_by_pair.retain(|(_, c), _| *c != class_id);

        Ok(ClassDeletion {
            class_id,
            removed_requests,
            removed_pending_requests,
            removed_enrollments,
        })
    }
}

#[async_trait::async_trait]
impl EnrollmentRepository for InMemoryEnrollmentStore {
    async fn find_pending_request(
        &self,
        student_id: PrincipalId,
        class_id: ClassId,
    ) -> Result<Option<EnrollmentRequest>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .pending_by_pair
            .get(&(student_id, class_id))
            .and_then(|id| tables.requests.get(id))
            .cloned())
    }

    async fn find_enrollment(
        &self,
        student_id: PrincipalId,
        class_id: ClassId,
    ) -> Result<Option<Enrollment>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .enrollment_by_pair
            .get(&(student_id, class_id))
            .and_then(|id| tables.enrollments.get(id))
            .cloned())
    }

    async fn get_request(&self, request_id: EnrollmentRequestId) -> Result<Option<EnrollmentRequest>, StoreError> {
        Ok(self.read()?.requests.get(&request_id).cloned())
    }

    async fn get_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.read()?.enrollments.get(&enrollment_id).cloned())
    }

    async fn create_request(&self, request: EnrollmentRequest) -> Result<EnrollmentRequest, StoreError> {
        let mut tables = self.write()?;
        if !tables.classes.contains_key(&request.class_id) {
            return Err(StoreError::NotFound(format!("class {}", request.class_id)));
        }
        if tables.requests.contains_key(&request.id) {
            return Err(StoreError::AlreadyExists(format!("request {}", request.id)));
        }

        let key = (request.student_id, request.class_id);
        if request.status == RequestStatus::Pending {
            if tables.pending_by_pair.contains_key(&key) {
                return Err(StoreError::AlreadyExists(format!(
                    "pending request for student {} in class {}",
                    request.student_id, request.class_id
                )));
            }
            tables.pending_by_pair.insert(key, request.id);
        }
        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn decide_request(
        &self,
        request_id: EnrollmentRequestId,
        decision: Decision,
        reviewer_id: PrincipalId,
        reviewed_at: DateTime<Utc>,
    ) -> Result<DecidedRequest, StoreError> {
        let mut tables = self.write()?;
        let current = tables
            .requests
            .get(&request_id)
            .ok_or_else(|| StoreError::NotFound(format!("request {request_id}")))?;

        let decided = current
            .decide(decision, reviewer_id, reviewed_at)
            .map_err(|e| StoreError::StaleDecision(e.to_string()))?;
        let key = (decided.student_id, decided.class_id);

        // Enrollment first: if it fails nothing has been written yet.
        let (enrollment, enrollment_created) = match decision {
            Decision::Reject => (None, false),
            Decision::Approve => match tables.enrollment_by_pair.get(&key).copied() {
                Some(existing) => (tables.enrollments.get(&existing).cloned(), false),
                None => {
                    let enrollment = Enrollment::approved(
                        EnrollmentId::new(),
                        decided.student_id,
                        decided.class_id,
                        reviewed_at,
                    );
                    (Some(tables.insert_enrollment(enrollment)?), true)
                }
            },
        };

        tables.pending_by_pair.remove(&key);
        tables.requests.insert(request_id, decided.clone());

        Ok(DecidedRequest {
            request: decided,
            enrollment,
            enrollment_created,
        })
    }

    async fn create_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        self.write()?.insert_enrollment(enrollment)
    }

    async fn delete_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Enrollment, StoreError> {
        let mut tables = self.write()?;
        let removed = tables
            .enrollments
            .remove(&enrollment_id)
            .ok_or_else(|| StoreError::NotFound(format!("enrollment {enrollment_id}")))?;
        tables
            .enrollment_by_pair
            .remove(&(removed.student_id, removed.class_id));
        Ok(removed)
    }

    async fn list_by_class(&self, class_id: ClassId) -> Result<Vec<Enrollment>, StoreError> {
        let enrollments = self
            .read()?
            .enrollments
            .values()
            .filter(|e| e.class_id == class_id)
            .cloned()
            .collect();
        Ok(Self::sorted_enrollments(enrollments))
    }

    async fn list_requests_by_class(&self, class_id: ClassId) -> Result<Vec<EnrollmentRequest>, StoreError> {
        let requests = self
            .read()?
            .requests
            .values()
            .filter(|r| r.class_id == class_id)
            .cloned()
            .collect();
        Ok(Self::sorted_requests(requests))
    }

    async fn list_pending_requests_for_teacher(
        &self,
        teacher_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, StoreError> {
        let tables = self.read()?;
        let requests = tables
            .requests
            .values()
            .filter(|r| r.is_pending())
            .filter(|r| {
                tables
                    .classes
                    .get(&r.class_id)
                    .is_some_and(|c| c.teacher_id == Some(teacher_id))
            })
            .cloned()
            .collect();
        Ok(Self::sorted_requests(requests))
    }

    async fn list_enrollments_for_student(&self, student_id: PrincipalId) -> Result<Vec<Enrollment>, StoreError> {
        let enrollments = self
            .read()?
            .enrollments
            .values()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect();
        Ok(Self::sorted_enrollments(enrollments))
    }

    async fn list_requests_for_student(
        &self,
        student_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, StoreError> {
        let requests = self
            .read()?
            .requests
            .values()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        Ok(Self::sorted_requests(requests))
    }
}
