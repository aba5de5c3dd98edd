// src/store/mod.rs

//! Persistence seams.
//!
//! The ledger is a single mutable document per (student, quiz). Every write
//! goes through [`LedgerStore::update_ledger`], a compare-and-swap on the
//! ledger's `version`, so two writers can never both apply a change computed
//! from the same read.

use async_trait::async_trait;

use crate::{
    integrity::IntegrityResult,
    models::{
        attempt::{AttemptRecord, NewAttempt},
        identity::{Staff, StaffScope},
        ledger::{NewLedger, UnlockLedger},
        quiz::QuizDefinition,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ledger(&self, id: i64) -> IntegrityResult<Option<UnlockLedger>>;

    async fn find_ledger(
        &self,
        student_id: i64,
        quiz_id: i64,
    ) -> IntegrityResult<Option<UnlockLedger>>;

    /// Creates a locked ledger.
    ///
    /// Fails with `ConcurrentModification` when a ledger for the same
    /// (student, quiz) already exists.
    async fn insert_ledger(&self, new: NewLedger) -> IntegrityResult<UnlockLedger>;

    /// Persists `ledger` only if the stored version still equals
    /// `ledger.version`. Returns the stored ledger with its bumped version.
    ///
    /// Fails with `ConcurrentModification` on a version mismatch.
    async fn update_ledger(&self, ledger: &UnlockLedger) -> IntegrityResult<UnlockLedger>;

    /// Locked ledgers within `scope`, oldest lock first.
    async fn locked_ledgers(&self, scope: &StaffScope) -> IntegrityResult<Vec<UnlockLedger>>;

    async fn all_ledgers(&self) -> IntegrityResult<Vec<UnlockLedger>>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn record_attempt(&self, attempt: NewAttempt) -> IntegrityResult<AttemptRecord>;

    async fn count_attempts(&self, student_id: i64, quiz_id: i64) -> IntegrityResult<i64>;
}

/// Quiz definition store: max score and per-quiz policy constants.
#[async_trait]
pub trait QuizDirectory: Send + Sync {
    async fn quiz(&self, quiz_id: i64) -> IntegrityResult<Option<QuizDefinition>>;
}

/// Section/course membership store: resolves a staff member's jurisdiction.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn scope_of(&self, staff: &Staff) -> IntegrityResult<StaffScope>;
}
