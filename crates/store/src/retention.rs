use std::time::Duration;

use chrono::{DateTime, Utc};
use duckdb::params;
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::time::{to_chrono, to_unix_nanos};

use crate::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeReport {
    pub metrics: usize,
    pub spans: usize,
    pub logs: usize,
}

impl Store {
    /// Deletes records whose primary timestamp is strictly older than
    /// `now - retention`.
    pub fn purge_older_than(&self, retention: Duration) -> Result<PurgeReport> {
        let cutoff = Utc::now() - to_chrono(retention)?;
        self.purge_before(cutoff)
    }

    /// Each kind is deleted under its own short writer lock. Every kind is
    /// attempted even if an earlier one fails; the first failure is returned.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let cutoff = to_unix_nanos(&cutoff)?;

        let metrics = self.purge_metrics(cutoff);
        let spans = self.purge_table("DELETE FROM spans WHERE start_unix_nano < ?", cutoff, "spans");
        let logs = self.purge_table("DELETE FROM logs WHERE ts_unix_nano < ?", cutoff, "logs");

        Ok(PurgeReport {
            metrics: metrics?,
            spans: spans?,
            logs: logs?,
        })
    }

    fn purge_table(&self, sql: &str, cutoff: i64, table: &str) -> Result<usize> {
        let conn = self.writer()?;
        conn.execute(sql, params![cutoff])
            .map_err(|e| TelemorphError::Store(format!("retention {table} delete failed: {e}")))
    }

    fn purge_metrics(&self, cutoff: i64) -> Result<usize> {
        let mut conn = self.writer()?;
        let tx = conn
            .transaction()
            .map_err(|e| TelemorphError::Store(format!("begin tx failed: {e}")))?;
        tx.execute(
            "DELETE FROM metric_series_labels
             WHERE metric_id IN (SELECT id FROM metrics WHERE ts_unix_nano < ?)",
            params![cutoff],
        )
        .map_err(|e| TelemorphError::Store(format!("retention metric labels delete failed: {e}")))?;
        let deleted = tx
            .execute("DELETE FROM metrics WHERE ts_unix_nano < ?", params![cutoff])
            .map_err(|e| TelemorphError::Store(format!("retention metrics delete failed: {e}")))?;
        tx.commit()
            .map_err(|e| TelemorphError::Store(format!("commit retention failed: {e}")))?;
        Ok(deleted)
    }
}

/// Sweeps on a fixed cadence until the task is dropped. Failures are logged
/// and retried on the next tick.
pub async fn run_retention_loop(
    store: Store,
    retention: Duration,
    every: Duration,
    span: tracing::Span,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.purge_older_than(retention)).await {
            Ok(Ok(report)) => tracing::debug!(
                parent: &span,
                metrics = report.metrics,
                spans = report.spans,
                logs = report.logs,
                "retention sweep complete"
            ),
            Ok(Err(err)) => tracing::warn!(parent: &span, error = ?err, "retention sweep failed"),
            Err(err) => tracing::warn!(parent: &span, error = ?err, "retention sweep task failed"),
        }
    }
}
