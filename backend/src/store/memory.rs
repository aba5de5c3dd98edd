// src/store/memory.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tokio::sync::RwLock;

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

/// A teaching section with its place in the school hierarchy.
#[derive(Debug, Clone)]
pub struct Section {
    pub id: i64,
    pub course_id: i64,
    pub department_id: i64,
    pub school_id: i64,
    pub teacher_id: i64,
    pub student_ids: Vec<i64>,
}

#[derive(Default)]
struct Inner {
    ledgers: BTreeMap<i64, UnlockLedger>,
    next_ledger_id: i64,
    attempts: Vec<AttemptRecord>,
    quizzes: HashMap<i64, QuizDefinition>,
    sections: Vec<Section>,
    department_heads: HashMap<i64, i64>,
    school_deans: HashMap<i64, i64>,
}

/// Process-local store with the same compare-and-swap rules as PostgreSQL.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_quiz(&self, quiz: QuizDefinition) {
        self.inner.write().await.quizzes.insert(quiz.id, quiz);
    }

    pub async fn add_section(&self, section: Section) {
        self.inner.write().await.sections.push(section);
    }

    pub async fn assign_hod(&self, department_id: i64, hod_id: i64) {
        self.inner
            .write()
            .await
            .department_heads
            .insert(department_id, hod_id);
    }

    pub async fn assign_dean(&self, school_id: i64, dean_id: i64) {
        self.inner.write().await.school_deans.insert(school_id, dean_id);
    }

    /// Replaces a ledger without a version check, used to stage drifted records.
    #[cfg(test)]
    pub(crate) async fn overwrite_ledger(&self, ledger: UnlockLedger) {
        self.inner.write().await.ledgers.insert(ledger.id, ledger);
    }
}

fn sort_by_lock_time(ledgers: &mut [UnlockLedger]) {
    ledgers.sort_by_key(|l| (l.lock_timestamp, l.id));
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn ledger(&self, id: i64) -> IntegrityResult<Option<UnlockLedger>> {
        Ok(self.inner.read().await.ledgers.get(&id).cloned())
    }

    async fn find_ledger(
        &self,
        student_id: i64,
        quiz_id: i64,
    ) -> IntegrityResult<Option<UnlockLedger>> {
        Ok(self
            .inner
            .read()
            .await
            .ledgers
            .values()
            .find(|l| l.student_id == student_id && l.quiz_id == quiz_id)
            .cloned())
    }

    async fn insert_ledger(&self, new: NewLedger) -> IntegrityResult<UnlockLedger> {
        let mut inner = self.inner.write().await;

        let exists = inner
            .ledgers
            .values()
            .any(|l| l.student_id == new.student_id && l.quiz_id == new.quiz_id);
        if exists {
            return Err(IntegrityError::ConcurrentModification(format!(
                "ledger for student {} quiz {}",
                new.student_id, new.quiz_id
            )));
        }

        inner.next_ledger_id += 1;
        let now = Utc::now();
        let ledger = UnlockLedger {
            id: inner.next_ledger_id,
            student_id: new.student_id,
            quiz_id: new.quiz_id,
            course_id: new.course_id,
            is_locked: true,
            authorization_level: new.authorization_level,
            teacher_unlock_count: 0,
            hod_unlock_count: 0,
            dean_unlock_count: 0,
            admin_unlock_count: 0,
            failure_reason: Some(new.failure_reason),
            lock_timestamp: Some(new.lock_timestamp),
            unlock_history: Json(Vec::new()),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        inner.ledgers.insert(ledger.id, ledger.clone());
        Ok(ledger)
    }

    async fn update_ledger(&self, ledger: &UnlockLedger) -> IntegrityResult<UnlockLedger> {
        let mut inner = self.inner.write().await;

        let stored = inner
            .ledgers
            .get_mut(&ledger.id)
            .ok_or(IntegrityError::LedgerNotFound(ledger.id))?;

        if stored.version != ledger.version {
            return Err(IntegrityError::ConcurrentModification(format!(
                "ledger {}",
                ledger.id
            )));
        }

        let mut next = ledger.clone();
        next.version = stored.version + 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn locked_ledgers(&self, scope: &StaffScope) -> IntegrityResult<Vec<UnlockLedger>> {
        let mut ledgers: Vec<UnlockLedger> = self
            .inner
            .read()
            .await
            .ledgers
            .values()
            .filter(|l| l.is_locked && scope.contains(l.course_id, l.student_id))
            .cloned()
            .collect();
        sort_by_lock_time(&mut ledgers);
        Ok(ledgers)
    }

    async fn all_ledgers(&self) -> IntegrityResult<Vec<UnlockLedger>> {
        Ok(self.inner.read().await.ledgers.values().cloned().collect())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn record_attempt(&self, attempt: NewAttempt) -> IntegrityResult<AttemptRecord> {
        let mut inner = self.inner.write().await;
        let record = AttemptRecord {
            id: inner.attempts.len() as i64 + 1,
            student_id: attempt.student_id,
            quiz_id: attempt.quiz_id,
            disqualified: attempt.failure_reason.is_some(),
            failure_reason: attempt.failure_reason,
            result: Json(attempt.result),
            submitted_at: attempt.submitted_at,
        };
        inner.attempts.push(record.clone());
        Ok(record)
    }

    async fn count_attempts(&self, student_id: i64, quiz_id: i64) -> IntegrityResult<i64> {
        let count = self
            .inner
            .read()
            .await
            .attempts
            .iter()
            .filter(|a| a.student_id == student_id && a.quiz_id == quiz_id)
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl QuizDirectory for MemoryStore {
    async fn quiz(&self, quiz_id: i64) -> IntegrityResult<Option<QuizDefinition>> {
        Ok(self.inner.read().await.quizzes.get(&quiz_id).cloned())
    }
}

#[async_trait]
impl MembershipDirectory for MemoryStore {
    async fn scope_of(&self, staff: &Staff) -> IntegrityResult<StaffScope> {
        let inner = self.inner.read().await;

        if staff.role == StaffRole::Admin {
            return Ok(StaffScope::All);
        }

        let in_scope = |section: &Section| match staff.role {
            StaffRole::Teacher => section.teacher_id == staff.id,
            StaffRole::Hod => inner.department_heads.get(&section.department_id) == Some(&staff.id),
            StaffRole::Dean => inner.school_deans.get(&section.school_id) == Some(&staff.id),
            StaffRole::Admin => true,
        };

        let pairs: HashSet<(i64, i64)> = inner
            .sections
            .iter()
            .filter(|s| in_scope(*s))
            .flat_map(|s| s.student_ids.iter().map(move |student| (s.course_id, *student)))
            .collect();

        Ok(StaffScope::Enrollments(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{integrity::ledger::UnlockQuotas, models::ledger::AuthorizationLevel};

    fn new_ledger(student_id: i64) -> NewLedger {
        crate::integrity::ledger::new_locked_ledger(
            student_id,
            1,
            10,
            "score below threshold",
            Utc::now(),
            &UnlockQuotas::default(),
        )
    }

    #[tokio::test]
    async fn insert_is_unique_per_student_and_quiz() {
        let store = MemoryStore::new();
        let ledger = store.insert_ledger(new_ledger(5)).await.unwrap();
        assert_eq!(ledger.authorization_level, AuthorizationLevel::Teacher);
        assert!(ledger.is_locked);

        let err = store.insert_ledger(new_ledger(5)).await.unwrap_err();
        assert!(matches!(err, IntegrityError::ConcurrentModification(_)));
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = MemoryStore::new();
        let ledger = store.insert_ledger(new_ledger(5)).await.unwrap();

        let mut first = ledger.clone();
        first.is_locked = false;
        let saved = store.update_ledger(&first).await.unwrap();
        assert_eq!(saved.version, 1);

        let mut second = ledger;
        second.failure_reason = Some("stale".into());
        let err = store.update_ledger(&second).await.unwrap_err();
        assert!(matches!(err, IntegrityError::ConcurrentModification(_)));

        let stored = store.ledger(saved.id).await.unwrap().unwrap();
        assert!(!stored.is_locked);
        assert_eq!(stored.failure_reason.as_deref(), Some("score below threshold"));
    }

    #[tokio::test]
    async fn scope_follows_hierarchy() {
        let store = MemoryStore::new();
        store
            .add_section(Section {
                id: 1,
                course_id: 10,
                department_id: 100,
                school_id: 1000,
                teacher_id: 7,
                student_ids: vec![1, 2],
            })
            .await;
        store
            .add_section(Section {
                id: 2,
                course_id: 11,
                department_id: 101,
                school_id: 1000,
                teacher_id: 8,
                student_ids: vec![3],
            })
            .await;
        store.assign_hod(100, 20).await;
        store.assign_dean(1000, 30).await;

        let teacher = store
            .scope_of(&Staff { id: 7, role: StaffRole::Teacher })
            .await
            .unwrap();
        assert!(teacher.contains(10, 1));
        assert!(!teacher.contains(11, 3));

        let hod = store
            .scope_of(&Staff { id: 20, role: StaffRole::Hod })
            .await
            .unwrap();
        assert!(hod.contains(10, 2));
        assert!(!hod.contains(11, 3));

        let dean = store
            .scope_of(&Staff { id: 30, role: StaffRole::Dean })
            .await
            .unwrap();
        assert!(dean.contains(10, 1));
        assert!(dean.contains(11, 3));

        let stranger = store
            .scope_of(&Staff { id: 31, role: StaffRole::Dean })
            .await
            .unwrap();
        assert_eq!(stranger, StaffScope::Enrollments(HashSet::new()));
    }
}
