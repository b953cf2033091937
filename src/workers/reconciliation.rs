//! Periodic ledger reconciliation
//!
//! Compares every profile's `credits_balance` with the sum of its ledger
//! rows. Nothing is repaired automatically; mismatches are logged at error
//! level for an operator to investigate.

use crate::config::WorkerConfig;
use crate::services::audit::{AuditService, ReconciliationReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub interval: Duration,
    pub batch: i64,
}

impl ReconciliationConfig {
    /// `None` when the interval is zero, which disables the worker
    pub fn from_worker_config(config: &WorkerConfig) -> Option<Self> {
        if config.reconciliation_interval == 0 {
            return None;
        }
        Some(Self {
            interval: Duration::from_secs(config.reconciliation_interval),
            batch: config.reconciliation_batch.max(1),
        })
    }
}

pub struct ReconciliationWorker {
    audit: Arc<AuditService>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(audit: Arc<AuditService>, config: ReconciliationConfig) -> Self {
        Self { audit, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch = self.config.batch,
            "ledger reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("ledger reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.audit.reconcile(self.config.batch).await {
                        Ok(report) => log_report(&report),
                        Err(e) => warn!(error = %e, "reconciliation cycle failed"),
                    }
                }
            }
        }

        info!("ledger reconciliation worker stopped");
    }
}

fn log_report(report: &ReconciliationReport) {
    if report.is_clean() {
        info!(checked_at = %report.checked_at, "ledger reconciliation clean");
        return;
    }
    for mismatch in &report.mismatches {
        error!(
            user_id = %mismatch.user_id,
            credits_balance = mismatch.credits_balance,
            ledger_total = mismatch.ledger_total,
            drift = mismatch.drift(),
            "balance does not match ledger"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_disables_worker() {
        let config = WorkerConfig {
            reconciliation_interval: 0,
            reconciliation_batch: 100,
        };
        assert!(ReconciliationConfig::from_worker_config(&config).is_none());
    }

    #[test]
    fn test_batch_is_at_least_one() {
        let config = WorkerConfig {
            reconciliation_interval: 60,
            reconciliation_batch: 0,
        };
        let rc = ReconciliationConfig::from_worker_config(&config).unwrap();
        assert_eq!(rc.interval, Duration::from_secs(60));
        assert_eq!(rc.batch, 1);
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let worker = ReconciliationWorker::new(
            Arc::new(AuditService::new(pool)),
            ReconciliationConfig {
                interval: Duration::from_secs(3600),
                batch: 10,
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
