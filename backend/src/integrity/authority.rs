// src/integrity/authority.rs

//! Ledger transitions run against a store.
//!
//! Every write is a read-modify-write under compare-and-swap. A lost race
//! re-reads the ledger and re-validates the transition against the fresh copy,
//! so two staff members unlocking at once can never both consume the same lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    config::LEDGER_CAS_RETRIES,
    integrity::{
        IntegrityError, IntegrityResult,
        ledger::{UnlockQuotas, new_locked_ledger},
    },
    models::{
        identity::{Staff, StaffRole, StaffScope},
        ledger::{AuthorizationLevel, LedgerView, UnlockLedger},
        quiz::QuizDefinition,
    },
    store::{LedgerStore, QuizDirectory},
};

/// Resolves unlock quotas per quiz, caching lookups for one request.
pub struct QuotaCache<'a> {
    quizzes: &'a dyn QuizDirectory,
    cache: HashMap<i64, UnlockQuotas>,
}

impl<'a> QuotaCache<'a> {
    pub fn new(quizzes: &'a dyn QuizDirectory) -> Self {
        Self {
            quizzes,
            cache: HashMap::new(),
        }
    }

    pub async fn quotas(&mut self, quiz_id: i64) -> IntegrityResult<UnlockQuotas> {
        if let Some(quotas) = self.cache.get(&quiz_id) {
            return Ok(*quotas);
        }
        let quotas = match self.quizzes.quiz(quiz_id).await? {
            Some(quiz) => quiz.quotas(),
            None => {
                tracing::warn!(quiz_id, "quiz definition missing, using default unlock quotas");
                UnlockQuotas::default()
            }
        };
        self.cache.insert(quiz_id, quotas);
        Ok(quotas)
    }
}

/// Read-modify-write of one ledger under compare-and-swap.
///
/// `apply` returns `Ok(true)` when it changed the ledger and `Ok(false)` when
/// there is nothing to write. After a lost race the ledger is re-read and
/// `apply` runs again on the fresh copy.
pub async fn modify_ledger<F>(
    ledgers: &dyn LedgerStore,
    ledger_id: i64,
    mut apply: F,
) -> IntegrityResult<(UnlockLedger, bool)>
where
    F: FnMut(&mut UnlockLedger) -> IntegrityResult<bool> + Send,
{
    for attempt in 0..=LEDGER_CAS_RETRIES {
        let mut ledger = ledgers
            .ledger(ledger_id)
            .await?
            .ok_or(IntegrityError::LedgerNotFound(ledger_id))?;

        if !apply(&mut ledger)? {
            return Ok((ledger, false));
        }

        match ledgers.update_ledger(&ledger).await {
            Ok(saved) => return Ok((saved, true)),
            Err(IntegrityError::ConcurrentModification(_)) => {
                tracing::warn!(ledger_id, attempt, "Lost ledger compare-and-swap, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    Err(IntegrityError::ConcurrentModification(format!(
        "ledger {}",
        ledger_id
    )))
}

/// Places (or re-places) a lock after a disqualifying attempt.
///
/// Creates the ledger on the first disqualification. An already-locked ledger
/// is returned unchanged.
pub async fn record_disqualification(
    ledgers: &dyn LedgerStore,
    quiz: &QuizDefinition,
    student_id: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> IntegrityResult<UnlockLedger> {
    let quotas = quiz.quotas();

    for attempt in 0..=LEDGER_CAS_RETRIES {
        let outcome = match ledgers.find_ledger(student_id, quiz.id).await? {
            None => {
                let new = new_locked_ledger(student_id, quiz.id, quiz.course_id, reason, now, &quotas);
                ledgers.insert_ledger(new).await
            }
            Some(mut ledger) => {
                if !ledger.relock(reason, now, &quotas) {
                    tracing::debug!(ledger_id = ledger.id, "Ledger already locked");
                    return Ok(ledger);
                }
                ledgers.update_ledger(&ledger).await
            }
        };

        match outcome {
            Ok(ledger) => {
                tracing::info!(
                    ledger_id = ledger.id,
                    student_id,
                    quiz_id = quiz.id,
                    level = %ledger.authorization_level,
                    "Quiz attempts locked: {}",
                    reason
                );
                return Ok(ledger);
            }
            Err(IntegrityError::ConcurrentModification(_)) => {
                tracing::warn!(student_id, quiz_id = quiz.id, attempt, "Lost ledger race while locking, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    Err(IntegrityError::ConcurrentModification(format!(
        "ledger for student {} quiz {}",
        student_id, quiz.id
    )))
}

/// Clears a lock on behalf of `actor`.
///
/// Fails with `NotLocked`, `InsufficientAuthority` or `QuotaExceeded` without
/// touching the stored ledger.
pub async fn unlock(
    ledgers: &dyn LedgerStore,
    ledger_id: i64,
    actor: &Staff,
    reason: &str,
    quotas: &UnlockQuotas,
    now: DateTime<Utc>,
) -> IntegrityResult<UnlockLedger> {
    let (ledger, _) = modify_ledger(ledgers, ledger_id, |ledger| {
        ledger.apply_unlock(actor, reason, now, quotas)?;
        Ok(true)
    })
    .await?;

    tracing::info!(
        ledger_id,
        actor_id = actor.id,
        actor_role = %actor.role,
        next_level = %ledger.authorization_level,
        attempt_limit = ledger.attempt_limit(),
        "Ledger unlocked"
    );
    Ok(ledger)
}

/// Persists a corrected level for a ledger read by a dashboard.
///
/// A failed write is logged and the unhealed read is returned.
async fn heal_on_read(
    ledgers: &dyn LedgerStore,
    ledger: UnlockLedger,
    quotas: &UnlockQuotas,
) -> UnlockLedger {
    let mut healed = ledger.clone();
    if !healed.heal_level(quotas) {
        return ledger;
    }

    match ledgers.update_ledger(&healed).await {
        Ok(saved) => {
            tracing::info!(
                ledger_id = saved.id,
                from = %ledger.authorization_level,
                to = %saved.authorization_level,
                "Self-healed ledger authorization level"
            );
            saved
        }
        Err(e) => {
            tracing::warn!(ledger_id = ledger.id, "Self-heal write failed: {}", e);
            ledger
        }
    }
}

/// Which levels a role's dashboard lists.
fn visible_to(role: StaffRole, level: AuthorizationLevel) -> bool {
    match role {
        StaffRole::Teacher => level == AuthorizationLevel::Teacher,
        StaffRole::Hod => level <= AuthorizationLevel::Hod,
        StaffRole::Dean => level == AuthorizationLevel::Dean,
        StaffRole::Admin => true,
    }
}

/// Whether a role is the one expected to act on a listed entry.
fn actionable_by(role: StaffRole, level: AuthorizationLevel) -> bool {
    match role {
        StaffRole::Admin => true,
        _ => role == level.required_role(),
    }
}

/// Locked students on `staff`'s dashboard.
///
/// Every scoped ledger is self-healed before filtering, and the filter uses the
/// tier implied by the counters, so a record whose stored tier drifted is
/// listed for the role that can actually clear it.
pub async fn locked_students_for(
    ledgers: &dyn LedgerStore,
    quizzes: &dyn QuizDirectory,
    staff: &Staff,
    scope: &StaffScope,
) -> IntegrityResult<Vec<LedgerView>> {
    let locked = ledgers.locked_ledgers(scope).await?;

    let mut quotas = QuotaCache::new(quizzes);
    let mut views = Vec::with_capacity(locked.len());

    for ledger in locked {
        let q = quotas.quotas(ledger.quiz_id).await?;
        let ledger = heal_on_read(ledgers, ledger, &q).await;
        let level = ledger.expected_level(&q);

        if !visible_to(staff.role, level) {
            continue;
        }

        views.push(LedgerView {
            attempt_limit: ledger.attempt_limit(),
            actionable: actionable_by(staff.role, level),
            ledger,
        });
    }

    Ok(views)
}
