// src/integrity/mod.rs

//! Quiz-attempt integrity scoring and the escalating unlock authority ledger.
//!
//! * `scoring` turns a raw result plus a security report into an adjusted score.
//! * `ledger` is the lock/unlock state machine over a single ledger.
//! * `authority` runs ledger transitions against a store with compare-and-swap.
//! * `maintenance` holds the idempotent repair sweeps exposed to admins.

use std::fmt;

use crate::models::{identity::StaffRole, ledger::AuthorizationLevel};

pub mod authority;
pub mod ledger;
pub mod maintenance;
pub mod scoring;

/// Errors raised by the integrity core.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityError {
    /// Malformed scoring input. The attempt is rejected and not persisted.
    InvalidInput(String),

    /// The acting rank is below the level currently holding the lock.
    InsufficientAuthority {
        actor: StaffRole,
        required: AuthorizationLevel,
    },

    /// The acting tier already granted its full quota on this ledger.
    QuotaExceeded { actor: StaffRole, quota: i32 },

    /// Unlock requested on a ledger that is not locked.
    NotLocked,

    /// A compare-and-swap on the ledger kept losing to concurrent writers.
    ConcurrentModification(String),

    LedgerNotFound(i64),

    /// Backend failure (database, poisoned state).
    Store(String),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            IntegrityError::InsufficientAuthority { actor, required } => write!(
                f,
                "{} cannot unlock a ledger held at {} level",
                actor, required
            ),
            IntegrityError::QuotaExceeded { actor, quota } => write!(
                f,
                "{} unlock quota of {} is exhausted for this ledger",
                actor, quota
            ),
            IntegrityError::NotLocked => write!(f, "Ledger is not locked"),
            IntegrityError::ConcurrentModification(what) => {
                write!(f, "Concurrent modification of {}, please retry", what)
            }
            IntegrityError::LedgerNotFound(id) => write!(f, "Ledger {} not found", id),
            IntegrityError::Store(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl std::error::Error for IntegrityError {}

impl From<sqlx::Error> for IntegrityError {
    fn from(err: sqlx::Error) -> Self {
        IntegrityError::Store(err.to_string())
    }
}
