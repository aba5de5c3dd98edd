use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    integrity::scoring::ViolationFilter,
    store::{AttemptStore, LedgerStore, MembershipDirectory, MemoryStore, PgStore, QuizDirectory},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub ledgers: Arc<dyn LedgerStore>,
    pub attempts: Arc<dyn AttemptStore>,
    pub quizzes: Arc<dyn QuizDirectory>,
    pub members: Arc<dyn MembershipDirectory>,
    pub violation_filter: ViolationFilter,
}

impl AppState {
    /// Wires every store seam to one backend.
    pub fn new<S>(config: Config, store: Arc<S>, violation_filter: ViolationFilter) -> Self
    where
        S: LedgerStore + AttemptStore + QuizDirectory + MembershipDirectory + 'static,
    {
        Self {
            config,
            ledgers: store.clone(),
            attempts: store.clone(),
            quizzes: store.clone(),
            members: store,
            violation_filter,
        }
    }

    pub fn with_postgres(config: Config, store: PgStore, violation_filter: ViolationFilter) -> Self {
        Self::new(config, Arc::new(store), violation_filter)
    }

    pub fn with_memory(config: Config, store: Arc<MemoryStore>, violation_filter: ViolationFilter) -> Self {
        Self::new(config, store, violation_filter)
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
