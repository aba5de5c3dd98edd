// src/handlers/dashboard.rs

use axum::{
    Json,
    extract::{Extension, State},
    response::IntoResponse,
};

use crate::{error::AppError, integrity::authority, state::AppState, utils::jwt::Claims};

/// Locked students awaiting the caller's tier, oldest lock first.
pub async fn locked_students(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let staff = claims.staff()?;
    let scope = state.members.scope_of(&staff).await?;

    let views = authority::locked_students_for(
        state.ledgers.as_ref(),
        state.quizzes.as_ref(),
        &staff,
        &scope,
    )
    .await?;

    Ok(Json(views))
}
