// src/integrity/scoring.rs

use regex::RegexSet;

use crate::{
    config::{
        DEFAULT_MAX_PENALTY, DEFAULT_PASS_THRESHOLD, DEFAULT_PER_VIOLATION_PENALTY,
        DEFAULT_TAB_SWITCH_PENALTY, DEFAULT_TAB_SWITCH_THRESHOLD, default_benign_patterns,
    },
    integrity::{IntegrityError, IntegrityResult},
    models::attempt::{QuizAttemptResult, SecurityReport, Violation},
};

/// Recognizes violations that are client permission failures rather than
/// misconduct (e.g. "fullscreen permission check failed").
#[derive(Debug, Clone)]
pub struct ViolationFilter {
    benign: RegexSet,
}

impl ViolationFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            benign: RegexSet::new(patterns)?,
        })
    }

    /// Matches against both the category and the free-text message.
    pub fn is_benign(&self, violation: &Violation) -> bool {
        self.benign.is_match(&violation.kind) || self.benign.is_match(&violation.message)
    }
}

impl Default for ViolationFilter {
    fn default() -> Self {
        Self {
            benign: RegexSet::empty(),
        }
    }
}

/// Numeric policy applied by [`score`]. Built per quiz from its definition.
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    pub pass_threshold: f64,
    pub max_penalty: u32,
    pub per_violation_penalty: u32,
    pub tab_switch_threshold: u32,
    pub tab_switch_penalty: u32,
    pub lock_on_auto_submit: bool,
    pub benign_violations: ViolationFilter,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            pass_threshold: f64::from(DEFAULT_PASS_THRESHOLD),
            max_penalty: DEFAULT_MAX_PENALTY as u32,
            per_violation_penalty: DEFAULT_PER_VIOLATION_PENALTY as u32,
            tab_switch_threshold: DEFAULT_TAB_SWITCH_THRESHOLD as u32,
            tab_switch_penalty: DEFAULT_TAB_SWITCH_PENALTY as u32,
            lock_on_auto_submit: true,
            benign_violations: ViolationFilter::new(default_benign_patterns())
                .unwrap_or_default(),
        }
    }
}

/// Splits violations into (counted, excluded).
fn count_violations(violations: &[Violation], filter: &ViolationFilter) -> (u32, u32) {
    let excluded = violations.iter().filter(|v| filter.is_benign(v)).count();
    let counted = violations.len() - excluded;
    (saturating_u32(counted), saturating_u32(excluded))
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Computes the integrity-adjusted result of one quiz attempt.
///
/// Pure: identical inputs always yield identical output, so a persisted result
/// can be re-derived for audit.
///
/// * `penalty = min(max_penalty, counted * per_violation + tab_penalty)`
/// * `tab_penalty` applies once `tab_switch_count` exceeds the threshold.
/// * `final_percentage = max(0, raw_percentage - penalty)`
pub fn score(
    raw_score: i64,
    max_score: i64,
    report: &SecurityReport,
    policy: &ScoringPolicy,
) -> IntegrityResult<QuizAttemptResult> {
    if max_score <= 0 {
        return Err(IntegrityError::InvalidInput(format!(
            "max_score must be positive, got {}",
            max_score
        )));
    }
    if raw_score < 0 || raw_score > max_score {
        return Err(IntegrityError::InvalidInput(format!(
            "raw_score {} is outside [0, {}]",
            raw_score, max_score
        )));
    }
    if report.tab_switch_count < 0 {
        return Err(IntegrityError::InvalidInput(
            "tab_switch_count cannot be negative".to_string(),
        ));
    }

    let (counted_violations, excluded_violations) =
        count_violations(&report.violations, &policy.benign_violations);

    let tab_penalty = if report.tab_switch_count > i64::from(policy.tab_switch_threshold) {
        u64::from(policy.tab_switch_penalty)
    } else {
        0
    };
    let uncapped =
        u64::from(counted_violations) * u64::from(policy.per_violation_penalty) + tab_penalty;
    let penalty_percent = uncapped.min(u64::from(policy.max_penalty)) as u32;

    let raw_percentage = raw_score as f64 * 100.0 / max_score as f64;
    let final_percentage = (raw_percentage - f64::from(penalty_percent)).max(0.0);
    let final_score = (final_percentage / 100.0 * max_score as f64).round() as i64;
    let passed = final_percentage >= policy.pass_threshold;

    Ok(QuizAttemptResult {
        raw_score,
        max_score,
        raw_percentage,
        counted_violations,
        excluded_violations,
        penalty_percent,
        final_percentage,
        final_score,
        passed,
        security_report: report.clone(),
    })
}
