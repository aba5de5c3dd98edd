// src/integrity/maintenance.rs

//! Administrative sweeps over every stored ledger.

use crate::{
    integrity::{
        IntegrityResult,
        authority::{QuotaCache, modify_ledger},
        ledger::UnlockQuotas,
    },
    models::ledger::{MaintenanceReport, UnlockLedger},
    store::{LedgerStore, QuizDirectory},
};

async fn sweep<F>(
    ledgers: &dyn LedgerStore,
    quizzes: &dyn QuizDirectory,
    task: &str,
    fix: F,
) -> IntegrityResult<MaintenanceReport>
where
    F: Fn(&mut UnlockLedger, &UnlockQuotas) -> bool + Send + Sync,
{
    let all = ledgers.all_ledgers().await?;
    let mut quotas = QuotaCache::new(quizzes);
    let mut report = MaintenanceReport {
        scanned: all.len(),
        ..MaintenanceReport::default()
    };

    for ledger in all {
        let q = quotas.quotas(ledger.quiz_id).await?;
        match modify_ledger(ledgers, ledger.id, |l| Ok(fix(l, &q))).await {
            Ok((_, true)) => report.corrected += 1,
            Ok((_, false)) => {}
            Err(e) => {
                tracing::error!(ledger_id = ledger.id, "{} failed: {}", task, e);
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        corrected = report.corrected,
        failed = report.failed,
        "{} finished",
        task
    );
    Ok(report)
}

/// Recomputes every ledger's authorization level from its counters.
pub async fn heal_levels(
    ledgers: &dyn LedgerStore,
    quizzes: &dyn QuizDirectory,
) -> IntegrityResult<MaintenanceReport> {
    sweep(ledgers, quizzes, "Level heal", |ledger, quotas| {
        ledger.heal_level(quotas)
    })
    .await
}

/// Rebuilds unlock counters from each ledger's audit trail, then heals levels.
pub async fn reconcile_counters(
    ledgers: &dyn LedgerStore,
    quizzes: &dyn QuizDirectory,
) -> IntegrityResult<MaintenanceReport> {
    sweep(ledgers, quizzes, "Counter reconciliation", |ledger, quotas| {
        ledger.reconcile_counters(quotas)
    })
    .await
}
