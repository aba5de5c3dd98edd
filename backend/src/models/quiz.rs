// src/models/quiz.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{
    config::{
        DEFAULT_HOD_UNLOCK_QUOTA, DEFAULT_MAX_PENALTY, DEFAULT_PASS_THRESHOLD,
        DEFAULT_PER_VIOLATION_PENALTY, DEFAULT_TAB_SWITCH_PENALTY, DEFAULT_TAB_SWITCH_THRESHOLD,
        DEFAULT_TEACHER_UNLOCK_QUOTA,
    },
    integrity::{
        ledger::UnlockQuotas,
        scoring::{ScoringPolicy, ViolationFilter},
    },
};

/// Represents the 'quizzes' table: the quiz definition and its integrity policy.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct QuizDefinition {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub max_score: i32,

    /// Percentage (0..=100) needed after penalties.
    pub pass_threshold: i32,
    pub max_penalty: i32,
    pub per_violation_penalty: i32,
    pub tab_switch_threshold: i32,
    pub tab_switch_penalty: i32,

    pub teacher_unlock_quota: i32,
    pub hod_unlock_quota: i32,

    /// Whether a forced auto-submit alone disqualifies the attempt.
    pub lock_on_auto_submit: bool,
}

impl QuizDefinition {
    /// A definition carrying the default policy constants.
    pub fn with_defaults(id: i64, course_id: i64, title: &str, max_score: i32) -> Self {
        Self {
            id,
            course_id,
            title: title.to_string(),
            max_score,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            max_penalty: DEFAULT_MAX_PENALTY,
            per_violation_penalty: DEFAULT_PER_VIOLATION_PENALTY,
            tab_switch_threshold: DEFAULT_TAB_SWITCH_THRESHOLD,
            tab_switch_penalty: DEFAULT_TAB_SWITCH_PENALTY,
            teacher_unlock_quota: DEFAULT_TEACHER_UNLOCK_QUOTA,
            hod_unlock_quota: DEFAULT_HOD_UNLOCK_QUOTA,
            lock_on_auto_submit: true,
        }
    }

    pub fn scoring_policy(&self, benign_violations: &ViolationFilter) -> ScoringPolicy {
        ScoringPolicy {
            pass_threshold: f64::from(self.pass_threshold.clamp(0, 100)),
            max_penalty: non_negative(self.max_penalty).min(100),
            per_violation_penalty: non_negative(self.per_violation_penalty),
            tab_switch_threshold: non_negative(self.tab_switch_threshold),
            tab_switch_penalty: non_negative(self.tab_switch_penalty),
            lock_on_auto_submit: self.lock_on_auto_submit,
            benign_violations: benign_violations.clone(),
        }
    }

    pub fn quotas(&self) -> UnlockQuotas {
        UnlockQuotas {
            teacher: self.teacher_unlock_quota.max(0),
            hod: self.hod_unlock_quota.max(0),
        }
    }
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
