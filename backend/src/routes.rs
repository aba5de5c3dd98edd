// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{attempts, dashboard, ledgers, maintenance},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware, staff_middleware, student_middleware},
};

/// Assembles the main application router.
///
/// * Students submit attempts and read their eligibility.
/// * Staff read and unlock ledgers within their jurisdiction.
/// * Admins run the maintenance sweeps.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let quiz_routes = Router::new()
        .route("/{quiz_id}/attempts", post(attempts::submit_attempt))
        .route("/{quiz_id}/eligibility", get(attempts::eligibility))
        .layer(middleware::from_fn(student_middleware));

    let ledger_routes = Router::new()
        .route("/{id}", get(ledgers::get_ledger))
        .route("/{id}/unlock", post(ledgers::unlock_ledger))
        .layer(middleware::from_fn(staff_middleware));

    let dashboard_routes = Router::new()
        .route("/locked", get(dashboard::locked_students))
        .layer(middleware::from_fn(staff_middleware));

    let admin_routes = Router::new()
        .route("/maintenance/heal-levels", post(maintenance::heal_levels))
        .route(
            "/maintenance/reconcile-counters",
            post(maintenance::reconcile_counters),
        )
        .layer(middleware::from_fn(admin_middleware));

    // Every route is authenticated; role guards above run after this.
    let api = Router::new()
        .nest("/quizzes", quiz_routes)
        .nest("/ledgers", ledger_routes)
        .nest("/dashboard", dashboard_routes)
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", api)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::Config,
        integrity::scoring::ViolationFilter,
        models::identity::Role,
        store::MemoryStore,
        utils::jwt::sign_jwt,
    };

    const SECRET: &str = "router-test-secret";

    fn app() -> Router {
        let config = Config {
            database_url: None,
            jwt_secret: SECRET.to_string(),
            rust_log: "info".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            benign_violation_patterns: Vec::new(),
        };
        let state = AppState::with_memory(config, Arc::new(MemoryStore::new()), ViolationFilter::default());
        create_router(state)
    }

    fn get(uri: &str, role: Option<Role>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(role) = role {
            let token = sign_jwt(1, role, SECRET, 60).unwrap();
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let response = app().oneshot(get("/api/dashboard/locked", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn role_guards_apply_per_route_group() {
        let response = app()
            .oneshot(get("/api/dashboard/locked", Some(Role::Student)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app()
            .oneshot(get("/api/quizzes/1/eligibility", Some(Role::Teacher)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app()
            .oneshot(get("/api/dashboard/locked", Some(Role::Teacher)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_quiz_is_not_found() {
        let response = app()
            .oneshot(get("/api/quizzes/99/eligibility", Some(Role::Student)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
