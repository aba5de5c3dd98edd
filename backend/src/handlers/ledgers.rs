// src/handlers/ledgers.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    error::AppError,
    integrity::authority::{self, QuotaCache},
    models::{
        identity::Staff,
        ledger::{LedgerView, MAX_UNLOCK_REASON_CHARS, UnlockLedger, UnlockRequest},
    },
    state::AppState,
    utils::{html::clean_reason, jwt::Claims},
};

/// Loads a ledger the caller has jurisdiction over.
async fn scoped_ledger(state: &AppState, staff: &Staff, id: i64) -> Result<UnlockLedger, AppError> {
    let ledger = state
        .ledgers
        .ledger(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ledger {} not found", id)))?;
    let scope = state.members.scope_of(staff).await?;
    if !scope.contains(ledger.course_id, ledger.student_id) {
        tracing::warn!(
            ledger_id = id,
            staff_id = staff.id,
            "Ledger requested outside staff jurisdiction"
        );
        return Err(AppError::Forbidden(
            "Student is outside your jurisdiction".to_string(),
        ));
    }
    Ok(ledger)
}

pub async fn get_ledger(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let staff = claims.staff()?;
    let ledger = scoped_ledger(&state, &staff, id).await?;

    Ok(Json(LedgerView {
        attempt_limit: ledger.attempt_limit(),
        actionable: ledger.is_locked && staff.role.can_clear(ledger.authorization_level),
        ledger,
    }))
}

/// Clears a lock, granting the student one more attempt.
pub async fn unlock_ledger(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UnlockRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let reason = clean_reason(&payload.reason);
    if reason.is_empty() {
        return Err(AppError::BadRequest("Reason must contain text".to_string()));
    }
    if reason.chars().count() > MAX_UNLOCK_REASON_CHARS {
        return Err(AppError::BadRequest(format!(
            "Reason must not exceed {} characters",
            MAX_UNLOCK_REASON_CHARS
        )));
    }

    let staff = claims.staff()?;
    let ledger = scoped_ledger(&state, &staff, id).await?;
    let quotas = QuotaCache::new(state.quizzes.as_ref())
        .quotas(ledger.quiz_id)
        .await?;

    let ledger = authority::unlock(state.ledgers.as_ref(), id, &staff, &reason, &quotas, Utc::now()).await?;

    Ok(Json(LedgerView {
        attempt_limit: ledger.attempt_limit(),
        actionable: false,
        ledger,
    }))
}
