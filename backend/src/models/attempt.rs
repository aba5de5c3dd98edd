// src/models/attempt.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

use crate::models::ledger::LedgerView;

/// A single misconduct signal reported by the quiz client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Client category, e.g. "tab_switch", "fullscreen_exit", "copy_paste".
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Security signals collected during one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityReport {
    pub tab_switch_count: i64,
    pub violations: Vec<Violation>,
    pub is_auto_submit: bool,
}

/// Output of the integrity scorer. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAttemptResult {
    pub raw_score: i64,
    pub max_score: i64,
    pub raw_percentage: f64,
    pub counted_violations: u32,
    pub excluded_violations: u32,
    pub penalty_percent: u32,
    pub final_percentage: f64,
    pub final_score: i64,
    pub passed: bool,
    pub security_report: SecurityReport,
}

/// DTO for submitting a graded quiz attempt.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    pub raw_score: i64,

    #[serde(default)]
    #[validate(custom(function = validate_report_size))]
    pub security_report: SecurityReport,
}

/// Caps the violation list to keep attempt records bounded.
fn validate_report_size(report: &SecurityReport) -> Result<(), validator::ValidationError> {
    if report.violations.len() > 1000 {
        return Err(validator::ValidationError::new("too_many_violations"));
    }
    Ok(())
}

/// Represents the 'quiz_attempts' table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: i64,
    pub student_id: i64,
    pub quiz_id: i64,
    pub result: Json<QuizAttemptResult>,
    pub disqualified: bool,
    pub failure_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Data needed to persist an attempt.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub student_id: i64,
    pub quiz_id: i64,
    pub result: QuizAttemptResult,
    pub failure_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Response after a submission has been scored and recorded.
#[derive(Debug, Serialize)]
pub struct SubmitAttemptResponse {
    pub attempt_id: i64,
    pub result: QuizAttemptResult,
    pub disqualified: bool,
    pub failure_reason: Option<String>,
    pub attempts_taken: i64,
    pub attempt_limit: i64,
    pub ledger: Option<LedgerView>,
}

/// Whether a student may start another attempt, and why not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptGate {
    Open,
    Locked {
        required_level: crate::models::ledger::AuthorizationLevel,
    },
    Exhausted,
}

#[derive(Debug, Serialize)]
pub struct EligibilityResponse {
    pub quiz_id: i64,
    pub attempts_taken: i64,
    pub attempt_limit: i64,
    pub gate: AttemptGate,
}
