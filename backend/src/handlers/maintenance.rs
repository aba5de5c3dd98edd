// src/handlers/maintenance.rs

use axum::{
    Json,
    extract::{Extension, State},
    response::IntoResponse,
};

use crate::{error::AppError, integrity::maintenance, state::AppState, utils::jwt::Claims};

/// Recomputes every ledger's authorization level.
/// Admin only.
pub async fn heal_levels(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(admin = %claims.sub, "Level heal requested");
    let report = maintenance::heal_levels(state.ledgers.as_ref(), state.quizzes.as_ref()).await?;
    Ok(Json(report))
}

/// Rebuilds unlock counters from the audit trail.
/// Admin only.
pub async fn reconcile_counters(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(admin = %claims.sub, "Counter reconciliation requested");
    let report =
        maintenance::reconcile_counters(state.ledgers.as_ref(), state.quizzes.as_ref()).await?;
    Ok(Json(report))
}
