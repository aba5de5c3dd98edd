// src/store/postgres.rs

use async_trait::async_trait;
use sqlx::{PgPool, types::Json};

use crate::{
    integrity::{IntegrityError, IntegrityResult},
    models::{
        attempt::{AttemptRecord, NewAttempt},
        identity::{Staff, StaffRole, StaffScope},
        ledger::{NewLedger, UnlockLedger},
        quiz::QuizDefinition,
    },
    store::{AttemptStore, LedgerStore, MembershipDirectory, QuizDirectory},
};

const LEDGER_COLUMNS: &str = "\
    id, student_id, quiz_id, course_id, is_locked, authorization_level, \
    teacher_unlock_count, hod_unlock_count, dean_unlock_count, admin_unlock_count, \
    failure_reason, lock_timestamp, unlock_history, version, created_at, updated_at";

const ATTEMPT_COLUMNS: &str =
    "id, student_id, quiz_id, result, disqualified, failure_reason, submitted_at";

const QUIZ_COLUMNS: &str = "\
    id, course_id, title, max_score, pass_threshold, max_penalty, per_violation_penalty, \
    tab_switch_threshold, tab_switch_penalty, teacher_unlock_quota, hod_unlock_quota, \
    lock_on_auto_submit";

/// PostgreSQL-backed store. Queries are checked at runtime.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn ledger(&self, id: i64) -> IntegrityResult<Option<UnlockLedger>> {
        let ledger = sqlx::query_as::<_, UnlockLedger>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM unlock_ledgers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ledger)
    }

    async fn find_ledger(
        &self,
        student_id: i64,
        quiz_id: i64,
    ) -> IntegrityResult<Option<UnlockLedger>> {
        let ledger = sqlx::query_as::<_, UnlockLedger>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM unlock_ledgers WHERE student_id = $1 AND quiz_id = $2"
        ))
        .bind(student_id)
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ledger)
    }

    async fn insert_ledger(&self, new: NewLedger) -> IntegrityResult<UnlockLedger> {
        // A concurrent creator wins the unique (student_id, quiz_id) key and
        // this insert returns no row.
        sqlx::query_as::<_, UnlockLedger>(&format!(
            r#"
            INSERT INTO unlock_ledgers
                (student_id, quiz_id, course_id, is_locked, authorization_level,
                 failure_reason, lock_timestamp)
            VALUES ($1, $2, $3, TRUE, $4, $5, $6)
            ON CONFLICT (student_id, quiz_id) DO NOTHING
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(new.student_id)
        .bind(new.quiz_id)
        .bind(new.course_id)
        .bind(new.authorization_level)
        .bind(&new.failure_reason)
        .bind(new.lock_timestamp)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert unlock ledger: {:?}", e);
            IntegrityError::from(e)
        })?
        .ok_or_else(|| {
            IntegrityError::ConcurrentModification(format!(
                "ledger for student {} quiz {}",
                new.student_id, new.quiz_id
            ))
        })
    }

    async fn update_ledger(&self, ledger: &UnlockLedger) -> IntegrityResult<UnlockLedger> {
        sqlx::query_as::<_, UnlockLedger>(&format!(
            r#"
            UPDATE unlock_ledgers SET
                is_locked = $3,
                authorization_level = $4,
                teacher_unlock_count = $5,
                hod_unlock_count = $6,
                dean_unlock_count = $7,
                admin_unlock_count = $8,
                failure_reason = $9,
                lock_timestamp = $10,
                unlock_history = $11,
                updated_at = $12,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(ledger.id)
        .bind(ledger.version)
        .bind(ledger.is_locked)
        .bind(ledger.authorization_level)
        .bind(ledger.teacher_unlock_count)
        .bind(ledger.hod_unlock_count)
        .bind(ledger.dean_unlock_count)
        .bind(ledger.admin_unlock_count)
        .bind(&ledger.failure_reason)
        .bind(ledger.lock_timestamp)
        .bind(&ledger.unlock_history)
        .bind(ledger.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update unlock ledger {}: {:?}", ledger.id, e);
            IntegrityError::from(e)
        })?
        .ok_or_else(|| IntegrityError::ConcurrentModification(format!("ledger {}", ledger.id)))
    }

    async fn locked_ledgers(&self, scope: &StaffScope) -> IntegrityResult<Vec<UnlockLedger>> {
        let ledgers = match scope {
            StaffScope::All => {
                sqlx::query_as::<_, UnlockLedger>(&format!(
                    "SELECT {LEDGER_COLUMNS} FROM unlock_ledgers \
                     WHERE is_locked ORDER BY lock_timestamp, id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
            StaffScope::Enrollments(pairs) if pairs.is_empty() => Vec::new(),
            StaffScope::Enrollments(pairs) => {
                let (course_ids, student_ids): (Vec<i64>, Vec<i64>) =
                    pairs.iter().copied().unzip();

                sqlx::query_as::<_, UnlockLedger>(&format!(
                    r#"
                    SELECT {LEDGER_COLUMNS} FROM unlock_ledgers
                    WHERE is_locked
                      AND (course_id, student_id) IN (
                          SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[])
                      )
                    ORDER BY lock_timestamp, id
                    "#
                ))
                .bind(course_ids)
                .bind(student_ids)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(ledgers)
    }

    async fn all_ledgers(&self) -> IntegrityResult<Vec<UnlockLedger>> {
        let ledgers = sqlx::query_as::<_, UnlockLedger>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM unlock_ledgers ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(ledgers)
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn record_attempt(&self, attempt: NewAttempt) -> IntegrityResult<AttemptRecord> {
        let record = sqlx::query_as::<_, AttemptRecord>(&format!(
            r#"
            INSERT INTO quiz_attempts
                (student_id, quiz_id, result, disqualified, failure_reason, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(attempt.student_id)
        .bind(attempt.quiz_id)
        .bind(Json(&attempt.result))
        .bind(attempt.failure_reason.is_some())
        .bind(&attempt.failure_reason)
        .bind(attempt.submitted_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to record quiz attempt: {:?}", e);
            IntegrityError::from(e)
        })?;

        Ok(record)
    }

    async fn count_attempts(&self, student_id: i64, quiz_id: i64) -> IntegrityResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM quiz_attempts WHERE student_id = $1 AND quiz_id = $2",
        )
        .bind(student_id)
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl QuizDirectory for PgStore {
    async fn quiz(&self, quiz_id: i64) -> IntegrityResult<Option<QuizDefinition>> {
        let quiz = sqlx::query_as::<_, QuizDefinition>(&format!(
            "SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1"
        ))
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(quiz)
    }
}

#[async_trait]
impl MembershipDirectory for PgStore {
    async fn scope_of(&self, staff: &Staff) -> IntegrityResult<StaffScope> {
        let sql = match staff.role {
            StaffRole::Admin => return Ok(StaffScope::All),
            StaffRole::Teacher => {
                r#"
                SELECT DISTINCT s.course_id, ss.student_id
                FROM sections s
                JOIN section_students ss ON ss.section_id = s.id
                WHERE s.teacher_id = $1
                "#
            }
            StaffRole::Hod => {
                r#"
                SELECT DISTINCT s.course_id, ss.student_id
                FROM sections s
                JOIN section_students ss ON ss.section_id = s.id
                JOIN courses c ON c.id = s.course_id
                JOIN departments d ON d.id = c.department_id
                WHERE d.hod_id = $1
                "#
            }
            StaffRole::Dean => {
                r#"
                SELECT DISTINCT s.course_id, ss.student_id
                FROM sections s
                JOIN section_students ss ON ss.section_id = s.id
                JOIN courses c ON c.id = s.course_id
                JOIN departments d ON d.id = c.department_id
                JOIN schools sc ON sc.id = d.school_id
                WHERE sc.dean_id = $1
                "#
            }
        };

        let pairs = sqlx::query_as::<_, (i64, i64)>(sql)
            .bind(staff.id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to resolve scope for staff {}: {:?}", staff.id, e);
                IntegrityError::from(e)
            })?;

        Ok(StaffScope::Enrollments(pairs.into_iter().collect()))
    }
}
