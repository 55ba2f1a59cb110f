//! Postgres-backed class/enrollment store.
//!
//! Invariants are enforced by the schema in `migrations/`, not by reads
//! before writes:
//!
//! | Invariant | Backing constraint | Surfaced as |
//! |-----------|--------------------|-------------|
//! | one pending request per (student, class) | partial unique index `enrollment_requests_one_pending` | `AlreadyExists` |
//! | one enrollment per (student, class) | `enrollments_one_per_pair` | `AlreadyExists` / existing row kept on approval |
//! | decisions are single-shot | `UPDATE ... WHERE status = 'pending'` | `StaleDecision` |
//! | class edits never overwrite a concurrent edit | `UPDATE ... WHERE <columns as read>` | `Conflict` |
//! | no rows for a missing class | FK `ON DELETE CASCADE` | `NotFound` (`23503`) |
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | any other | `Storage` |
//! | PoolClosed / IO / other | N/A | `Storage` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use classhub_auth::PrincipalId;
use classhub_core::{ClassId, CourseId, EnrollmentId, EnrollmentRequestId};
use classhub_enrollment::{
    Class, ClassStatus, ClassVisibility, Decision, Enrollment, EnrollmentRequest, EnrollmentStatus,
    RequestStatus, Visibility,
};

use super::r#trait::{
    ClassDeletion, ClassDirectory, ClassStore, DecidedRequest, EnrollmentRepository, StoreError,
};

const MIGRATION: &str = include_str!("../../migrations/0001_classes_and_enrollment.sql");

const CLASS_COLUMNS: &str =
    "id, name, description, course_id, teacher_id, visibility, status, created_at";
const REQUEST_COLUMNS: &str =
    "id, student_id, class_id, message, status, created_at, reviewed_by, reviewed_at";
const ENROLLMENT_COLUMNS: &str = "id, student_id, class_id, status, enrolled_at";

/// Postgres-backed store for classes, enrollment requests and enrollments.
///
/// Uses the SQLx connection pool (thread-safe). Multi-statement operations run
/// in one transaction.
#[derive(Debug, Clone)]
pub struct PostgresEnrollmentStore {
    pool: Arc<PgPool>,
}

impl PostgresEnrollmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables, indexes and constraints if they are missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_classes(&self, sql: &str, teacher_id: Option<Uuid>) -> Result<Vec<Class>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(teacher_id) = teacher_id {
            query = query.bind(teacher_id);
        }
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_classes", e))?;
        rows.iter().map(class_from_row).collect()
    }

    async fn fetch_requests(
        &self,
        operation: &str,
        sql: &str,
        id: Uuid,
    ) -> Result<Vec<EnrollmentRequest>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(request_from_row).collect()
    }

    async fn fetch_enrollments(&self, operation: &str, sql: &str, id: Uuid) -> Result<Vec<Enrollment>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(enrollment_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ClassDirectory for PostgresEnrollmentStore {
    async fn get_visibility(&self, class_id: ClassId) -> Result<ClassVisibility, StoreError> {
        self.get_class(class_id)
            .await?
            .map(|c| c.visibility_view())
            .ok_or_else(|| StoreError::NotFound(format!("class {class_id}")))
    }

    async fn get_class(&self, class_id: ClassId) -> Result<Option<Class>, StoreError> {
        let row = sqlx::query(&format!("SELECT {CLASS_COLUMNS} FROM classes WHERE id = $1"))
            .bind(class_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_class", e))?;
        row.as_ref().map(class_from_row).transpose()
    }

    async fn list_classes(&self) -> Result<Vec<Class>, StoreError> {
        let sql = format!("SELECT {CLASS_COLUMNS} FROM classes ORDER BY created_at DESC, id DESC");
        self.fetch_classes(&sql, None).await
    }

    async fn list_classes_for_teacher(&self, teacher_id: PrincipalId) -> Result<Vec<Class>, StoreError> {
        let sql = format!(
            "SELECT {CLASS_COLUMNS} FROM classes WHERE teacher_id = $1 ORDER BY created_at DESC, id DESC"
        );
        self.fetch_classes(&sql, Some(*teacher_id.as_uuid())).await
    }
}

#[async_trait::async_trait]
impl ClassStore for PostgresEnrollmentStore {
    #[instrument(skip(self, class), fields(class_id = %class.id), err)]
    async fn insert_class(&self, class: Class) -> Result<Class, StoreError> {
        sqlx::query(&format!(
            "INSERT INTO classes ({CLASS_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(class.id.as_uuid())
        .bind(&class.name)
        .bind(class.description.as_deref())
        .bind(class.course_id.map(Uuid::from))
        .bind(class.teacher_id.map(Uuid::from))
        .bind(class.visibility.as_str())
        .bind(class.status.as_str())
        .bind(class.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_class", e))?;
        Ok(class)
    }

    #[instrument(skip(self, expected, class), fields(class_id = %class.id), err)]
    async fn update_class(&self, expected: &Class, class: Class) -> Result<Class, StoreError> {
        // Compare-and-swap on every mutable column the caller read.
        let result = sqlx::query(
            r#"
            UPDATE classes
            SET name = $2, description = $3, course_id = $4, visibility = $5, status = $6
            WHERE id = $1
              AND name = $7
              AND description IS NOT DISTINCT FROM $8
              AND course_id IS NOT DISTINCT FROM $9
              AND visibility = $10
              AND status = $11
            "#,
        )
        .bind(class.id.as_uuid())
        .bind(&class.name)
        .bind(class.description.as_deref())
        .bind(class.course_id.map(Uuid::from))
        .bind(class.visibility.as_str())
        .bind(class.status.as_str())
        .bind(&expected.name)
        .bind(expected.description.as_deref())
        .bind(expected.course_id.map(Uuid::from))
        .bind(expected.visibility.as_str())
        .bind(expected.status.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_class", e))?;

        if result.rows_affected() == 1 {
            return Ok(class);
        }
        match self.get_class(class.id).await? {
            Some(_) => Err(StoreError::Conflict(format!("class {} changed since it was read", class.id))),
            None => Err(StoreError::NotFound(format!("class {}", class.id))),
        }
    }

    #[instrument(skip(self), fields(class_id = %class_id), err)]
    async fn delete_class(&self, class_id: ClassId) -> Result<ClassDeletion, StoreError> {
        let mut tx = begin(&self.pool).await?;

        let request_rows = sqlx::query("DELETE FROM enrollment_requests WHERE class_id = $1 RETURNING status")
            .bind(class_id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_class_requests", e))?;
        let mut removed_pending_requests = 0u64;
        for row in &request_rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("delete_class_requests", e))?;
            if status == RequestStatus::Pending.as_str() {
                removed_pending_requests += 1;
            }
        }

        let removed_enrollments = sqlx::query("DELETE FROM enrollments WHERE class_id = $1")
            .bind(class_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_class_enrollments", e))?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM classes WHERE id = $1")
            .bind(class_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_class", e))?
            .rows_affected();

        if deleted == 0 {
            rollback(tx).await?;
            return Err(StoreError::NotFound(format!("class {class_id}")));
        }

        commit(tx).await?;
        Ok(ClassDeletion {
            class_id,
            removed_requests: request_rows.len() as u64,
            removed_pending_requests,
            removed_enrollments,
        })
    }
}

#[async_trait::async_trait]
impl EnrollmentRepository for PostgresEnrollmentStore {
    async fn find_pending_request(
        &self,
        student_id: PrincipalId,
        class_id: ClassId,
    ) -> Result<Option<EnrollmentRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM enrollment_requests \
             WHERE student_id = $1 AND class_id = $2 AND status = 'pending'"
        ))
        .bind(student_id.as_uuid())
        .bind(class_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_pending_request", e))?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn find_enrollment(
        &self,
        student_id: PrincipalId,
        class_id: ClassId,
    ) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = $1 AND class_id = $2"
        ))
        .bind(student_id.as_uuid())
        .bind(class_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_enrollment", e))?;
        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn get_request(&self, request_id: EnrollmentRequestId) -> Result<Option<EnrollmentRequest>, StoreError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM enrollment_requests WHERE id = $1"))
            .bind(request_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_request", e))?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn get_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1"))
            .bind(enrollment_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_enrollment", e))?;
        row.as_ref().map(enrollment_from_row).transpose()
    }

    #[instrument(
        skip(self, request),
        fields(student_id = %request.student_id, class_id = %request.class_id),
        err
    )]
    async fn create_request(&self, request: EnrollmentRequest) -> Result<EnrollmentRequest, StoreError> {
        sqlx::query(&format!(
            "INSERT INTO enrollment_requests ({REQUEST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(request.id.as_uuid())
        .bind(request.student_id.as_uuid())
        .bind(request.class_id.as_uuid())
        .bind(request.message.as_deref())
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.reviewed_by.map(Uuid::from))
        .bind(request.reviewed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_request", e))?;
        Ok(request)
    }

    #[instrument(skip(self), fields(request_id = %request_id, decision = ?decision), err)]
    async fn decide_request(
        &self,
        request_id: EnrollmentRequestId,
        decision: Decision,
        reviewer_id: PrincipalId,
        reviewed_at: DateTime<Utc>,
    ) -> Result<DecidedRequest, StoreError> {
        let mut tx = begin(&self.pool).await?;

        // Compare-and-swap: concurrent deciders serialize on the row lock and
        // the loser re-evaluates `status = 'pending'` as false.
        let row = sqlx::query(&format!(
            "UPDATE enrollment_requests SET status = $2, reviewed_by = $3, reviewed_at = $4 \
             WHERE id = $1 AND status = 'pending' RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(request_id.as_uuid())
        .bind(decision.resulting_status().as_str())
        .bind(reviewer_id.as_uuid())
        .bind(reviewed_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("decide_request", e))?;

        let Some(row) = row else {
            let existing = sqlx::query("SELECT status FROM enrollment_requests WHERE id = $1")
                .bind(request_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("decide_request", e))?;
            rollback(tx).await?;
            return Err(match existing {
                Some(row) => {
                    let status: String = row.try_get("status").map_err(|e| map_sqlx_error("decide_request", e))?;
                    StoreError::StaleDecision(format!("request {request_id} was already {status}"))
                }
                None => StoreError::NotFound(format!("request {request_id}")),
            });
        };
        let request = request_from_row(&row)?;

        let (enrollment, enrollment_created) = match decision {
            Decision::Reject => (None, false),
            Decision::Approve => {
                let inserted = sqlx::query(&format!(
                    "INSERT INTO enrollments ({ENROLLMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT ON CONSTRAINT enrollments_one_per_pair DO NOTHING \
                     RETURNING {ENROLLMENT_COLUMNS}"
                ))
                .bind(EnrollmentId::new().as_uuid())
                .bind(request.student_id.as_uuid())
                .bind(request.class_id.as_uuid())
                .bind(EnrollmentStatus::Approved.as_str())
                .bind(reviewed_at)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("decide_request_enroll", e))?;

                match inserted {
                    Some(row) => (Some(enrollment_from_row(&row)?), true),
                    None => {
                        let existing = sqlx::query(&format!(
                            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = $1 AND class_id = $2"
                        ))
                        .bind(request.student_id.as_uuid())
                        .bind(request.class_id.as_uuid())
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("decide_request_existing", e))?;
                        (Some(enrollment_from_row(&existing)?), false)
                    }
                }
            }
        };

        commit(tx).await?;
        Ok(DecidedRequest {
            request,
            enrollment,
            enrollment_created,
        })
    }

    #[instrument(
        skip(self, enrollment),
        fields(student_id = %enrollment.student_id, class_id = %enrollment.class_id),
        err
    )]
    async fn create_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        sqlx::query(&format!(
            "INSERT INTO enrollments ({ENROLLMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(enrollment.id.as_uuid())
        .bind(enrollment.student_id.as_uuid())
        .bind(enrollment.class_id.as_uuid())
        .bind(enrollment.status.as_str())
        .bind(enrollment.enrolled_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_enrollment", e))?;
        Ok(enrollment)
    }

    #[instrument(skip(self), fields(enrollment_id = %enrollment_id), err)]
    async fn delete_enrollment(&self, enrollment_id: EnrollmentId) -> Result<Enrollment, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM enrollments WHERE id = $1 RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(enrollment_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_enrollment", e))?;
        match row {
            Some(row) => enrollment_from_row(&row),
            None => Err(StoreError::NotFound(format!("enrollment {enrollment_id}"))),
        }
    }

    async fn list_by_class(&self, class_id: ClassId) -> Result<Vec<Enrollment>, StoreError> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE class_id = $1 ORDER BY enrolled_at, id"
        );
        self.fetch_enrollments("list_by_class", &sql, *class_id.as_uuid()).await
    }

    async fn list_requests_by_class(&self, class_id: ClassId) -> Result<Vec<EnrollmentRequest>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM enrollment_requests WHERE class_id = $1 ORDER BY created_at, id"
        );
        self.fetch_requests("list_requests_by_class", &sql, *class_id.as_uuid()).await
    }

    async fn list_pending_requests_for_teacher(
        &self,
        teacher_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, StoreError> {
        let sql = r#"
            SELECT r.id, r.student_id, r.class_id, r.message, r.status, r.created_at,
                   r.reviewed_by, r.reviewed_at
            FROM enrollment_requests r
            JOIN classes c ON c.id = r.class_id
            WHERE c.teacher_id = $1 AND r.status = 'pending'
            ORDER BY r.created_at, r.id
        "#;
        self.fetch_requests("list_pending_requests_for_teacher", sql, *teacher_id.as_uuid())
            .await
    }

    async fn list_enrollments_for_student(&self, student_id: PrincipalId) -> Result<Vec<Enrollment>, StoreError> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = $1 ORDER BY enrolled_at, id"
        );
        self.fetch_enrollments("list_enrollments_for_student", &sql, *student_id.as_uuid())
            .await
    }

    async fn list_requests_for_student(
        &self,
        student_id: PrincipalId,
    ) -> Result<Vec<EnrollmentRequest>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM enrollment_requests WHERE student_id = $1 ORDER BY created_at, id"
        );
        self.fetch_requests("list_requests_for_student", &sql, *student_id.as_uuid())
            .await
    }
}

async fn begin(pool: &PgPool) -> Result<Transaction<'static, Postgres>, StoreError> {
    pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
    tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
}

async fn rollback(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
    tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Storage(format!("failed to decode column '{name}': {e}")))
}

fn unknown_value(column: &str, value: &str) -> StoreError {
    StoreError::Storage(format!("unexpected {column} value '{value}'"))
}

fn class_from_row(row: &PgRow) -> Result<Class, StoreError> {
    let visibility: String = column(row, "visibility")?;
    let status: String = column(row, "status")?;
    Ok(Class {
        id: ClassId::from_uuid(column(row, "id")?),
        name: column(row, "name")?,
        description: column(row, "description")?,
        course_id: column::<Option<Uuid>>(row, "course_id")?.map(CourseId::from_uuid),
        teacher_id: column::<Option<Uuid>>(row, "teacher_id")?.map(PrincipalId::from_uuid),
        visibility: match visibility.as_str() {
            "public" => Visibility::Public,
            "private" => Visibility::Private,
            other => return Err(unknown_value("visibility", other)),
        },
        status: match status.as_str() {
            "active" => ClassStatus::Active,
            "archived" => ClassStatus::Archived,
            other => return Err(unknown_value("class status", other)),
        },
        created_at: column(row, "created_at")?,
    })
}

fn request_from_row(row: &PgRow) -> Result<EnrollmentRequest, StoreError> {
    let status: String = column(row, "status")?;
    Ok(EnrollmentRequest {
        id: EnrollmentRequestId::from_uuid(column(row, "id")?),
        student_id: PrincipalId::from_uuid(column(row, "student_id")?),
        class_id: ClassId::from_uuid(column(row, "class_id")?),
        message: column(row, "message")?,
        status: match status.as_str() {
            "pending" => RequestStatus::Pending,
            "approved" => RequestStatus::Approved,
            "rejected" => RequestStatus::Rejected,
            other => return Err(unknown_value("request status", other)),
        },
        created_at: column(row, "created_at")?,
        reviewed_by: column::<Option<Uuid>>(row, "reviewed_by")?.map(PrincipalId::from_uuid),
        reviewed_at: column(row, "reviewed_at")?,
    })
}

fn enrollment_from_row(row: &PgRow) -> Result<Enrollment, StoreError> {
    let status: String = column(row, "status")?;
    Ok(Enrollment {
        id: EnrollmentId::from_uuid(column(row, "id")?),
        student_id: PrincipalId::from_uuid(column(row, "student_id")?),
        class_id: ClassId::from_uuid(column(row, "class_id")?),
        status: match status.as_str() {
            "approved" => EnrollmentStatus::Approved,
            "pending" => EnrollmentStatus::Pending,
            other => return Err(unknown_value("enrollment status", other)),
        },
        enrolled_at: column(row, "enrolled_at")?,
    })
}
