// src/handlers/attempts.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    error::AppError,
    integrity::{
        authority,
        ledger::{attempt_gate, attempt_limit_for, lock_reason},
        scoring::score,
    },
    models::{
        attempt::{AttemptGate, EligibilityResponse, NewAttempt, SubmitAttemptRequest, SubmitAttemptResponse},
        ledger::LedgerView,
    },
    state::AppState,
    utils::jwt::Claims,
};

/// Reports whether the caller may start another attempt on a quiz.
pub async fn eligibility(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;

    if state.quizzes.quiz(quiz_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Quiz {} not found", quiz_id)));
    }

    let ledger = state.ledgers.find_ledger(student_id, quiz_id).await?;
    let attempts_taken = state.attempts.count_attempts(student_id, quiz_id).await?;

    Ok(Json(EligibilityResponse {
        quiz_id,
        attempts_taken,
        attempt_limit: attempt_limit_for(ledger.as_ref()),
        gate: attempt_gate(ledger.as_ref(), attempts_taken),
    }))
}

/// Scores a finished attempt and applies the lock decision.
///
/// * Refuses the attempt while the ledger is locked or attempts are used up.
/// * Scores it against the quiz's integrity policy.
/// * Locks the ledger when the attempt disqualifies the student, then records it.
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let student_id = claims.user_id()?;

    let quiz = state
        .quizzes
        .quiz(quiz_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Quiz {} not found", quiz_id)))?;

    let ledger = state.ledgers.find_ledger(student_id, quiz_id).await?;
    let attempts_taken = state.attempts.count_attempts(student_id, quiz_id).await?;

    match attempt_gate(ledger.as_ref(), attempts_taken) {
        AttemptGate::Open => {}
        AttemptGate::Locked { required_level } => {
            return Err(AppError::Forbidden(format!(
                "Quiz attempts are locked until {} authorization",
                required_level
            )));
        }
        AttemptGate::Exhausted => {
            return Err(AppError::Forbidden("No attempts remaining".to_string()));
        }
    }

    let policy = quiz.scoring_policy(&state.violation_filter);
    let result = score(
        payload.raw_score,
        i64::from(quiz.max_score),
        &payload.security_report,
        &policy,
    )?;
    let failure_reason = lock_reason(&result, &policy);
    let now = Utc::now();

    // A disqualifying attempt is only counted once its lock is in place.
    let ledger = match &failure_reason {
        Some(reason) => Some(
            authority::record_disqualification(state.ledgers.as_ref(), &quiz, student_id, reason, now)
                .await?,
        ),
        None => ledger,
    };

    let record = state
        .attempts
        .record_attempt(NewAttempt {
            student_id,
            quiz_id,
            result: result.clone(),
            failure_reason: failure_reason.clone(),
            submitted_at: now,
        })
        .await
        .map_err(|e| {
            tracing::error!(
                student_id,
                quiz_id,
                ledger_id = ledger.as_ref().map(|l| l.id),
                error = %e,
                "Attempt not recorded after ledger decision"
            );
            e
        })?;

    tracing::info!(
        attempt_id = record.id,
        student_id,
        quiz_id,
        final_percentage = result.final_percentage,
        passed = result.passed,
        "Quiz attempt recorded"
    );

    let attempt_limit = attempt_limit_for(ledger.as_ref());
    let response = SubmitAttemptResponse {
        attempt_id: record.id,
        result,
        disqualified: failure_reason.is_some(),
        failure_reason,
        attempts_taken: attempts_taken + 1,
        attempt_limit,
        ledger: ledger.map(|ledger| LedgerView {
            attempt_limit,
            actionable: false,
            ledger,
        }),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::{
        config::Config,
        integrity::{IntegrityError, IntegrityResult, scoring::ViolationFilter},
        models::{
            attempt::{AttemptRecord, NewAttempt},
            identity::Role,
            quiz::QuizDefinition,
        },
        routes::create_router,
        state::AppState,
        store::{AttemptStore, LedgerStore, MemoryStore},
        utils::jwt::sign_jwt,
    };

    const SECRET: &str = "attempt-handler-secret";
    const STUDENT: i64 = 100;
    const QUIZ: i64 = 1;

    /// Attempt store whose inserts always fail.
    struct BrokenAttempts(Arc<MemoryStore>);

    #[async_trait]
    impl AttemptStore for BrokenAttempts {
        async fn record_attempt(&self, _attempt: NewAttempt) -> IntegrityResult<AttemptRecord> {
            Err(IntegrityError::Store("connection reset".to_string()))
        }

        async fn count_attempts(&self, student_id: i64, quiz_id: i64) -> IntegrityResult<i64> {
            self.0.count_attempts(student_id, quiz_id).await
        }
    }

    #[tokio::test]
    async fn failed_attempt_insert_leaves_the_student_locked() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_quiz(QuizDefinition::with_defaults(QUIZ, 10, "Optics", 10))
            .await;

        let config = Config {
            database_url: None,
            jwt_secret: SECRET.to_string(),
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            benign_violation_patterns: Vec::new(),
        };
        let mut state = AppState::with_memory(config, store.clone(), ViolationFilter::default());
        state.attempts = Arc::new(BrokenAttempts(store.clone()));

        let token = sign_jwt(STUDENT, Role::Student, SECRET, 60).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/quizzes/{}/attempts", QUIZ))
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"raw_score": 2}"#))
            .unwrap();

        let response = create_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ledger = store.find_ledger(STUDENT, QUIZ).await.unwrap().expect("ledger written");
        assert!(ledger.is_locked);
        assert_eq!(store.count_attempts(STUDENT, QUIZ).await.unwrap(), 0);
    }
}
