// src/models/ledger.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

use crate::models::identity::StaffRole;

/// The tier that must act next to clear a lock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "authorization_level", rename_all = "UPPERCASE")]
pub enum AuthorizationLevel {
    Teacher,
    Hod,
    Dean,
}

impl AuthorizationLevel {
    /// The lowest staff rank allowed to clear this level.
    pub fn required_role(self) -> StaffRole {
        match self {
            AuthorizationLevel::Teacher => StaffRole::Teacher,
            AuthorizationLevel::Hod => StaffRole::Hod,
            AuthorizationLevel::Dean => StaffRole::Dean,
        }
    }
}

impl std::fmt::Display for AuthorizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.required_role().fmt(f)
    }
}

/// One entry of a ledger's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockEvent {
    pub unlocked_by: StaffRole,
    pub unlocked_by_id: i64,
    /// The level the lock was held at when it was cleared.
    pub level_at_unlock: AuthorizationLevel,
    pub unlock_timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Represents the 'unlock_ledgers' table.
/// The permanent integrity record for one student/quiz pair.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct UnlockLedger {
    pub id: i64,
    pub student_id: i64,
    pub quiz_id: i64,
    pub course_id: i64,

    /// True while the student may not start another attempt.
    pub is_locked: bool,

    pub authorization_level: AuthorizationLevel,

    pub teacher_unlock_count: i32,
    pub hod_unlock_count: i32,
    pub dean_unlock_count: i32,
    pub admin_unlock_count: i32,

    pub failure_reason: Option<String>,
    pub lock_timestamp: Option<DateTime<Utc>>,

    /// Append-only, chronological. Stored as JSONB.
    pub unlock_history: Json<Vec<UnlockEvent>>,

    /// Compare-and-swap token, bumped on every write.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to create a ledger on the first disqualifying attempt.
#[derive(Debug, Clone)]
pub struct NewLedger {
    pub student_id: i64,
    pub quiz_id: i64,
    pub course_id: i64,
    pub authorization_level: AuthorizationLevel,
    pub failure_reason: String,
    pub lock_timestamp: DateTime<Utc>,
}

/// Ledger as returned to dashboards and staff endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerView {
    #[serde(flatten)]
    pub ledger: UnlockLedger,
    pub attempt_limit: i64,
    /// Whether the requesting role is expected to act on this entry.
    pub actionable: bool,
}

/// Longest unlock reason kept in the audit trail, in characters.
pub const MAX_UNLOCK_REASON_CHARS: usize = 500;

/// DTO for unlocking a ledger.
///
/// The raw bound leaves room for markup; the 500 character limit applies to
/// the sanitized text.
#[derive(Debug, Deserialize, Validate)]
pub struct UnlockRequest {
    #[validate(length(
        min = 1,
        max = 4000,
        message = "Reason length must be between 1 and 4000 characters."
    ))]
    pub reason: String,
}

/// Outcome of a maintenance sweep over all ledgers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub scanned: usize,
    pub corrected: usize,
    pub failed: usize,
}
