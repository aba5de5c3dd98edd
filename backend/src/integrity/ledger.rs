// src/integrity/ledger.rs

//! Lock/unlock state machine of a single ledger.
//!
//! States are `UNLOCKED` and `LOCKED(level)`. The level is never chosen
//! freely: it is always the lowest tier whose quota is not yet exhausted,
//! so escalation falls out of the counters.

use chrono::{DateTime, Utc};

use crate::{
    config::{DEFAULT_HOD_UNLOCK_QUOTA, DEFAULT_TEACHER_UNLOCK_QUOTA},
    integrity::{IntegrityError, IntegrityResult, scoring::ScoringPolicy},
    models::{
        attempt::{AttemptGate, QuizAttemptResult},
        identity::{Staff, StaffRole},
        ledger::{AuthorizationLevel, NewLedger, UnlockEvent, UnlockLedger},
    },
};

/// Unlocks each bounded tier may grant on one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockQuotas {
    pub teacher: i32,
    pub hod: i32,
}

impl Default for UnlockQuotas {
    fn default() -> Self {
        Self {
            teacher: DEFAULT_TEACHER_UNLOCK_QUOTA,
            hod: DEFAULT_HOD_UNLOCK_QUOTA,
        }
    }
}

impl UnlockQuotas {
    /// The lowest tier that still has quota, DEAN once both are exhausted.
    pub fn level_for(&self, teacher_unlocks: i32, hod_unlocks: i32) -> AuthorizationLevel {
        if teacher_unlocks < self.teacher {
            AuthorizationLevel::Teacher
        } else if hod_unlocks < self.hod {
            AuthorizationLevel::Hod
        } else {
            AuthorizationLevel::Dean
        }
    }
}

/// Decides whether a scored attempt disqualifies the student, and why.
///
/// Returns `None` for an attempt that leaves the ledger untouched.
pub fn lock_reason(result: &QuizAttemptResult, policy: &ScoringPolicy) -> Option<String> {
    let mut reasons = Vec::new();

    if !result.passed {
        reasons.push(format!(
            "score below threshold ({:.1}% < {}%)",
            result.final_percentage, policy.pass_threshold
        ));
    }
    if policy.max_penalty > 0 && result.penalty_percent >= policy.max_penalty {
        reasons.push("security violation (penalty cap reached)".to_string());
    }
    let report = &result.security_report;
    if report.tab_switch_count > i64::from(policy.tab_switch_threshold) {
        reasons.push(format!(
            "excessive tab switching ({} switches)",
            report.tab_switch_count
        ));
    }
    if report.is_auto_submit && policy.lock_on_auto_submit {
        reasons.push("forced auto-submit".to_string());
    }

    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    }
}

/// A ledger for a student's first disqualifying attempt.
pub fn new_locked_ledger(
    student_id: i64,
    quiz_id: i64,
    course_id: i64,
    reason: &str,
    now: DateTime<Utc>,
    quotas: &UnlockQuotas,
) -> NewLedger {
    NewLedger {
        student_id,
        quiz_id,
        course_id,
        authorization_level: quotas.level_for(0, 0),
        failure_reason: reason.to_string(),
        lock_timestamp: now,
    }
}

/// Attempts allowed when no ledger exists.
pub const BASE_ATTEMPT_LIMIT: i64 = 1;

pub fn attempt_limit_for(ledger: Option<&UnlockLedger>) -> i64 {
    ledger.map_or(BASE_ATTEMPT_LIMIT, UnlockLedger::attempt_limit)
}

/// Lock and attempt exhaustion are independent gates; both must be open.
pub fn attempt_gate(ledger: Option<&UnlockLedger>, attempts_taken: i64) -> AttemptGate {
    match ledger {
        Some(ledger) if ledger.is_locked => AttemptGate::Locked {
            required_level: ledger.authorization_level,
        },
        _ if attempts_taken >= attempt_limit_for(ledger) => AttemptGate::Exhausted,
        _ => AttemptGate::Open,
    }
}

impl UnlockLedger {
    pub fn expected_level(&self, quotas: &UnlockQuotas) -> AuthorizationLevel {
        quotas.level_for(self.teacher_unlock_count, self.hod_unlock_count)
    }

    /// Corrects a stored level that drifted from what the counters imply.
    /// Returns whether anything changed.
    pub fn heal_level(&mut self, quotas: &UnlockQuotas) -> bool {
        let expected = self.expected_level(quotas);
        if self.authorization_level == expected {
            return false;
        }
        self.authorization_level = expected;
        true
    }

    pub fn total_unlocks(&self) -> i64 {
        i64::from(self.teacher_unlock_count)
            + i64::from(self.hod_unlock_count)
            + i64::from(self.dean_unlock_count)
            + i64::from(self.admin_unlock_count)
    }

    /// One base attempt plus one per granted unlock.
    pub fn attempt_limit(&self) -> i64 {
        BASE_ATTEMPT_LIMIT + self.total_unlocks()
    }

    /// `UNLOCKED -> LOCKED(level)`. A no-op returning `false` when already locked.
    pub fn relock(&mut self, reason: &str, now: DateTime<Utc>, quotas: &UnlockQuotas) -> bool {
        if self.is_locked {
            return false;
        }
        self.is_locked = true;
        self.authorization_level = self.expected_level(quotas);
        self.failure_reason = Some(reason.to_string());
        self.lock_timestamp = Some(now);
        self.updated_at = now;
        true
    }

    /// `LOCKED(level) -> UNLOCKED`, granting exactly one more attempt.
    ///
    /// On error the ledger is left untouched.
    pub fn apply_unlock(
        &mut self,
        actor: &Staff,
        reason: &str,
        now: DateTime<Utc>,
        quotas: &UnlockQuotas,
    ) -> IntegrityResult<()> {
        if !self.is_locked {
            return Err(IntegrityError::NotLocked);
        }

        let level = self.expected_level(quotas);
        if !actor.role.can_clear(level) {
            return Err(IntegrityError::InsufficientAuthority {
                actor: actor.role,
                required: level,
            });
        }

        let counter = match actor.role {
            StaffRole::Teacher => {
                if self.teacher_unlock_count >= quotas.teacher {
                    return Err(IntegrityError::QuotaExceeded {
                        actor: actor.role,
                        quota: quotas.teacher,
                    });
                }
                &mut self.teacher_unlock_count
            }
            StaffRole::Hod => {
                if self.hod_unlock_count >= quotas.hod {
                    return Err(IntegrityError::QuotaExceeded {
                        actor: actor.role,
                        quota: quotas.hod,
                    });
                }
                &mut self.hod_unlock_count
            }
            StaffRole::Dean => &mut self.dean_unlock_count,
            StaffRole::Admin => &mut self.admin_unlock_count,
        };
        *counter = counter.saturating_add(1);

        self.unlock_history.0.push(UnlockEvent {
            unlocked_by: actor.role,
            unlocked_by_id: actor.id,
            level_at_unlock: level,
            unlock_timestamp: now,
            reason: reason.to_string(),
        });
        self.is_locked = false;
        self.authorization_level = self.expected_level(quotas);
        self.updated_at = now;
        Ok(())
    }

    /// Rebuilds counters from the audit trail.
    ///
    /// Each counter becomes `max(stored, entries in history)`; the bounded
    /// tiers are clamped to their quota. The level is healed afterwards.
    pub fn reconcile_counters(&mut self, quotas: &UnlockQuotas) -> bool {
        let before = (
            self.teacher_unlock_count,
            self.hod_unlock_count,
            self.dean_unlock_count,
            self.admin_unlock_count,
            self.authorization_level,
        );

        let recorded = |role: StaffRole| {
            let n = self
                .unlock_history
                .0
                .iter()
                .filter(|event| event.unlocked_by == role)
                .count();
            i32::try_from(n).unwrap_or(i32::MAX)
        };
        let teacher = recorded(StaffRole::Teacher);
        let hod = recorded(StaffRole::Hod);
        let dean = recorded(StaffRole::Dean);
        let admin = recorded(StaffRole::Admin);

        self.teacher_unlock_count = self.teacher_unlock_count.max(teacher).min(quotas.teacher);
        self.hod_unlock_count = self.hod_unlock_count.max(hod).min(quotas.hod);
        self.dean_unlock_count = self.dean_unlock_count.max(dean);
        self.admin_unlock_count = self.admin_unlock_count.max(admin);
        self.heal_level(quotas);

        before
            != (
                self.teacher_unlock_count,
                self.hod_unlock_count,
                self.dean_unlock_count,
                self.admin_unlock_count,
                self.authorization_level,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        integrity::scoring::score,
        models::attempt::SecurityReport,
    };
    use sqlx::types::Json;

    fn locked_ledger(id: i64) -> UnlockLedger {
        let now = Utc::now();
        UnlockLedger {
            id,
            student_id: 100,
            quiz_id: 200,
            course_id: 300,
            is_locked: true,
            authorization_level: AuthorizationLevel::Teacher,
            teacher_unlock_count: 0,
            hod_unlock_count: 0,
            dean_unlock_count: 0,
            admin_unlock_count: 0,
            failure_reason: Some("score below threshold".to_string()),
            lock_timestamp: Some(now),
            unlock_history: Json(Vec::new()),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn staff(role: StaffRole) -> Staff {
        Staff { id: 9, role }
    }

    fn assert_limit_identity(ledger: &UnlockLedger) {
        assert_eq!(
            ledger.attempt_limit(),
            1 + i64::from(ledger.teacher_unlock_count)
                + i64::from(ledger.hod_unlock_count)
                + i64::from(ledger.dean_unlock_count)
                + i64::from(ledger.admin_unlock_count)
        );
    }

    #[test]
    fn level_is_lowest_tier_with_quota() {
        let quotas = UnlockQuotas::default();
        assert_eq!(quotas.level_for(0, 0), AuthorizationLevel::Teacher);
        assert_eq!(quotas.level_for(2, 3), AuthorizationLevel::Teacher);
        assert_eq!(quotas.level_for(3, 0), AuthorizationLevel::Hod);
        assert_eq!(quotas.level_for(3, 3), AuthorizationLevel::Dean);
        assert_eq!(quotas.level_for(7, 9), AuthorizationLevel::Dean);
    }

    #[test]
    fn three_teacher_unlocks_escalate_to_hod() {
        let quotas = UnlockQuotas::default();
        let mut ledger = locked_ledger(1);
        let now = Utc::now();

        for round in 1..=3 {
            assert_eq!(ledger.authorization_level, AuthorizationLevel::Teacher);
            ledger
                .apply_unlock(&staff(StaffRole::Teacher), "retake granted", now, &quotas)
                .unwrap();
            assert_eq!(ledger.teacher_unlock_count, round);
            assert!(!ledger.is_locked);
            assert_limit_identity(&ledger);

            assert!(ledger.relock("score below threshold", now, &quotas));
        }

        assert_eq!(ledger.teacher_unlock_count, 3);
        assert_eq!(ledger.authorization_level, AuthorizationLevel::Hod);
        assert_eq!(ledger.attempt_limit(), 4);
        assert_eq!(ledger.unlock_history.0.len(), 3);
    }

    #[test]
    fn teacher_cannot_unlock_after_escalation() {
        let quotas = UnlockQuotas::default();
        let mut ledger = locked_ledger(1);
        ledger.teacher_unlock_count = 3;
        ledger.authorization_level = AuthorizationLevel::Hod;
        let before = ledger.clone();

        let err = ledger
            .apply_unlock(&staff(StaffRole::Teacher), "please", Utc::now(), &quotas)
            .unwrap_err();
        assert_eq!(
            err,
            IntegrityError::InsufficientAuthority {
                actor: StaffRole::Teacher,
                required: AuthorizationLevel::Hod,
            }
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn dean_unlock_always_succeeds_and_is_unbounded() {
        let quotas = UnlockQuotas::default();
        let mut ledger = locked_ledger(1);
        let now = Utc::now();

        for round in 1..=10 {
            ledger
                .apply_unlock(&staff(StaffRole::Dean), "dean override", now, &quotas)
                .unwrap();
            assert_eq!(ledger.dean_unlock_count, round);
            assert_limit_identity(&ledger);
            ledger.relock("forced auto-submit", now, &quotas);
        }
        // Dean unlocks never advance the bounded tiers.
        assert_eq!(ledger.authorization_level, AuthorizationLevel::Teacher);
    }

    #[test]
    fn both_quotas_exhausted_means_dean() {
        let quotas = UnlockQuotas::default();
        let mut ledger = locked_ledger(1);
        let now = Utc::now();

        for role in [StaffRole::Teacher; 3].into_iter().chain([StaffRole::Hod; 3]) {
            ledger.apply_unlock(&staff(role), "ok", now, &quotas).unwrap();
            ledger.relock("again", now, &quotas);
        }

        assert_eq!(ledger.authorization_level, AuthorizationLevel::Dean);
        let err = ledger
            .apply_unlock(&staff(StaffRole::Hod), "ok", now, &quotas)
            .unwrap_err();
        assert!(matches!(err, IntegrityError::InsufficientAuthority { .. }));

        ledger
            .apply_unlock(&staff(StaffRole::Admin), "admin override", now, &quotas)
            .unwrap();
        assert_eq!(ledger.admin_unlock_count, 1);
        assert_eq!(ledger.authorization_level, AuthorizationLevel::Dean);
        assert_eq!(ledger.attempt_limit(), 8);
    }

    #[test]
    fn exhausted_hod_cannot_grant_discretionary_unlock() {
        let quotas = UnlockQuotas::default();
        let mut ledger = locked_ledger(1);
        ledger.hod_unlock_count = 3;
        let before = ledger.clone();

        let err = ledger
            .apply_unlock(&staff(StaffRole::Hod), "again", Utc::now(), &quotas)
            .unwrap_err();
        assert_eq!(
            err,
            IntegrityError::QuotaExceeded {
                actor: StaffRole::Hod,
                quota: 3
            }
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn unlock_requires_lock() {
        let mut ledger = locked_ledger(1);
        ledger.is_locked = false;
        let err = ledger
            .apply_unlock(&staff(StaffRole::Admin), "x", Utc::now(), &UnlockQuotas::default())
            .unwrap_err();
        assert_eq!(err, IntegrityError::NotLocked);
    }

    #[test]
    fn unlock_uses_counters_not_drifted_level() {
        let quotas = UnlockQuotas::default();
        let mut ledger = locked_ledger(1);
        // Stored as DEAN although no tier has used its quota.
        ledger.authorization_level = AuthorizationLevel::Dean;

        ledger
            .apply_unlock(&staff(StaffRole::Teacher), "drifted", Utc::now(), &quotas)
            .unwrap();
        assert_eq!(ledger.teacher_unlock_count, 1);
        assert_eq!(ledger.unlock_history.0[0].level_at_unlock, AuthorizationLevel::Teacher);
        assert_eq!(ledger.authorization_level, AuthorizationLevel::Teacher);
    }

    #[test]
    fn heal_is_idempotent() {
        let quotas = UnlockQuotas::default();
        let mut ledger = locked_ledger(1);
        ledger.teacher_unlock_count = 3;
        ledger.hod_unlock_count = 3;

        assert!(ledger.heal_level(&quotas));
        assert_eq!(ledger.authorization_level, AuthorizationLevel::Dean);
        assert!(!ledger.heal_level(&quotas));
    }

    #[test]
    fn relock_on_locked_ledger_is_noop() {
        let mut ledger = locked_ledger(1);
        let before = ledger.clone();
        assert!(!ledger.relock("other", Utc::now(), &UnlockQuotas::default()));
        assert_eq!(ledger, before);
    }

    #[test]
    fn reconcile_rebuilds_counters_from_history() {
        let quotas = UnlockQuotas::default();
        let mut ledger = locked_ledger(1);
        let now = Utc::now();
        for role in [StaffRole::Teacher; 4].into_iter().chain([StaffRole::Dean]) {
            ledger.unlock_history.0.push(UnlockEvent {
                unlocked_by: role,
                unlocked_by_id: 1,
                level_at_unlock: AuthorizationLevel::Teacher,
                unlock_timestamp: now,
                reason: "legacy".to_string(),
            });
        }
        ledger.hod_unlock_count = 2;

        assert!(ledger.reconcile_counters(&quotas));
        assert_eq!(ledger.teacher_unlock_count, 3);
        assert_eq!(ledger.hod_unlock_count, 2);
        assert_eq!(ledger.dean_unlock_count, 1);
        assert_eq!(ledger.authorization_level, AuthorizationLevel::Hod);

        assert!(!ledger.reconcile_counters(&quotas));
    }

    #[test]
    fn gates_are_independent() {
        let mut ledger = locked_ledger(1);
        assert_eq!(
            attempt_gate(Some(&ledger), 0),
            AttemptGate::Locked {
                required_level: AuthorizationLevel::Teacher
            }
        );

        ledger.is_locked = false;
        assert_eq!(attempt_gate(Some(&ledger), 1), AttemptGate::Exhausted);

        ledger.teacher_unlock_count = 1;
        assert_eq!(attempt_gate(Some(&ledger), 1), AttemptGate::Open);

        assert_eq!(attempt_gate(None, 0), AttemptGate::Open);
        assert_eq!(attempt_gate(None, 1), AttemptGate::Exhausted);
    }

    #[test]
    fn lock_reason_reflects_policy() {
        let policy = ScoringPolicy::default();

        let passed = score(9, 10, &SecurityReport::default(), &policy).unwrap();
        assert_eq!(lock_reason(&passed, &policy), None);

        let failed = score(5, 10, &SecurityReport::default(), &policy).unwrap();
        assert!(lock_reason(&failed, &policy).unwrap().contains("below threshold"));

        let auto = SecurityReport {
            is_auto_submit: true,
            ..SecurityReport::default()
        };
        let forced = score(10, 10, &auto, &policy).unwrap();
        assert_eq!(lock_reason(&forced, &policy).as_deref(), Some("forced auto-submit"));

        let lenient = ScoringPolicy {
            lock_on_auto_submit: false,
            ..ScoringPolicy::default()
        };
        assert_eq!(lock_reason(&forced, &lenient), None);

        let tabs = SecurityReport {
            tab_switch_count: 9,
            ..SecurityReport::default()
        };
        let switched = score(10, 10, &tabs, &policy).unwrap();
        assert!(lock_reason(&switched, &policy).unwrap().contains("tab switching"));
    }
}
