// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Default percentage a quiz attempt needs after penalties to pass.
pub const DEFAULT_PASS_THRESHOLD: i32 = 70;

/// Default upper bound on the integrity penalty, in percentage points.
pub const DEFAULT_MAX_PENALTY: i32 = 20;

/// Default penalty per counted security violation.
pub const DEFAULT_PER_VIOLATION_PENALTY: i32 = 5;

/// Tab switches tolerated before the tab-switch penalty applies.
pub const DEFAULT_TAB_SWITCH_THRESHOLD: i32 = 3;

pub const DEFAULT_TAB_SWITCH_PENALTY: i32 = 10;

/// Unlocks a teacher may grant on one ledger before HOD escalation.
pub const DEFAULT_TEACHER_UNLOCK_QUOTA: i32 = 3;

/// Unlocks a HOD may grant on one ledger before dean escalation.
pub const DEFAULT_HOD_UNLOCK_QUOTA: i32 = 3;

/// How many times a ledger write is re-read and re-applied after losing a
/// compare-and-swap before `ConcurrentModification` is surfaced.
pub const LEDGER_CAS_RETRIES: usize = 3;

/// Violations matching any of these are client-side permission failures,
/// not misconduct, and never count towards the penalty.
pub const DEFAULT_BENIGN_VIOLATION_PATTERNS: &[&str] = &[
    r"(?i)fullscreen.*(permission|not allowed|denied|check failed)",
    r"(?i)permission (check )?(failed|denied)",
    r"(?i)NotAllowedError",
];

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: String,
    pub benign_violation_patterns: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set".to_string())?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let benign_violation_patterns = match env::var("BENIGN_VIOLATION_PATTERNS") {
            Ok(raw) => raw
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => default_benign_patterns(),
        };

        Ok(Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            benign_violation_patterns,
        })
    }
}

pub fn default_benign_patterns() -> Vec<String> {
    DEFAULT_BENIGN_VIOLATION_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}
