//! Expiry reconciliation: neutralizes expired, unconsumed grants.
//!
//! The sweep runs out of band, never inline with user requests. It
//! processes expired grants in small batches so no transaction holds
//! locks long enough to contend with live traffic, and each grant is
//! reversed at most once (keyed by the source entry id), making the
//! sweep idempotent across repeated and overlapping invocations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::CreditService;
use crate::domain::SweepReport;
use crate::error::CreditError;

impl CreditService {
    /// Runs one full expiry sweep over all users.
    ///
    /// Safe to invoke from an external scheduler at any frequency.
    /// Failed reversals are logged and left for the next run.
    ///
    /// # Errors
    ///
    /// Returns [`CreditError::StoreUnavailable`] only when the
    /// candidate scan itself fails; per-grant failures are reported in
    /// the [`SweepReport`] instead.
    pub async fn run_expiry_sweep(&self) -> Result<SweepReport, CreditError> {
        self.run_expiry_sweep_at(Utc::now()).await
    }

    /// Sweep implementation with an injectable clock, used directly by
    /// tests.
    pub(crate) async fn run_expiry_sweep_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, CreditError> {
        let mut report = SweepReport::default();

        loop {
            let batch = self
                .store()
                .expired_grants(now, self.sweep_batch_size())
                .await
                .map_err(|e| CreditError::StoreUnavailable(e.to_string()))?;
            if batch.is_empty() {
                break;
            }

            let mut progressed = false;
            for grant in &batch {
                report.scanned += 1;
                match self.store().reverse_expired_grant(grant).await {
                    Ok(Some(entry)) => {
                        progressed = true;
                        report.reversed += 1;
                        report.reclaimed += -entry.delta;
                        tracing::info!(
                            user_code = %grant.user_code,
                            grant_id = grant.id,
                            reclaimed = -entry.delta,
                            "expired grant reversed"
                        );
                    }
                    // Another sweep got there first; nothing to do.
                    Ok(None) => progressed = true,
                    Err(e) => {
                        report.failures += 1;
                        tracing::warn!(
                            user_code = %grant.user_code,
                            grant_id = grant.id,
                            error = %e,
                            "expiry reversal failed; left for next sweep"
                        );
                    }
                }
            }

            // Every remaining candidate failed this round; stop rather
            // than spin on a broken store.
            if !progressed {
                break;
            }
        }

        Ok(report)
    }
}

/// Spawns the periodic expiry sweeper.
///
/// Ticks immediately on startup and then every `every` interval.
/// Sweep failures are logged and retried on the next tick, so the task
/// never exits on its own.
pub fn spawn_sweeper(service: Arc<CreditService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.run_expiry_sweep().await {
                Ok(report) => tracing::info!(
                    scanned = report.scanned,
                    reversed = report.reversed,
                    reclaimed = report.reclaimed,
                    failures = report.failures,
                    "expiry sweep complete"
                ),
                Err(e) => tracing::warn!(error = %e, "expiry sweep failed; retrying next interval"),
            }
        }
    })
}
