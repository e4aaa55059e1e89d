use telemorph_core::config::Config;
use telemorph_core::error::{Result, TelemorphError};
use telemorph_store::Store;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::otlp::decode::WriteUnit;

/// Single-writer path into the store shared by every ingest adapter.
#[derive(Clone)]
pub struct Pipeline {
    tx: mpsc::Sender<WriteRequest>,
}

pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 8192,
            batch_size: 1000,
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            channel_capacity: cfg.write_channel_capacity,
            batch_size: cfg.write_batch_size,
        }
    }
}

struct WriteRequest {
    units: Vec<WriteUnit>,
    /// Number of units that could not be written.
    reply: oneshot::Sender<usize>,
}

impl Pipeline {
    /// Spawns the writer task; it exits once every `Pipeline` clone is dropped.
    pub fn new(store: Store, cfg: PipelineConfig, span: tracing::Span) -> Self {
        let (tx, rx) = mpsc::channel(cfg.channel_capacity.max(1));
        tokio::spawn(run_writer(store, rx, cfg.batch_size.max(1), span));
        Self { tx }
    }

    /// Queues `units` and waits for the writer. Returns how many units failed.
    pub async fn submit(&self, units: Vec<WriteUnit>) -> Result<usize> {
        if units.is_empty() {
            return Ok(0);
        }
        let (reply, ack) = oneshot::channel();
        self.tx
            .send(WriteRequest { units, reply })
            .await
            .map_err(|_| TelemorphError::Internal("write pipeline closed".to_string()))?;
        ack.await
            .map_err(|_| TelemorphError::Internal("write pipeline dropped request".to_string()))
    }
}

async fn run_writer(
    store: Store,
    mut rx: mpsc::Receiver<WriteRequest>,
    batch_size: usize,
    span: tracing::Span,
) {
    while let Some(first) = rx.recv().await {
        let mut pending = first.units.len();
        let mut requests = vec![first];
        while pending < batch_size {
            match rx.try_recv() {
                Ok(next) => {
                    pending += next.units.len();
                    requests.push(next);
                }
                Err(_) => break,
            }
        }

        let store = store.clone();
        let write_span = span.clone();
        let (replies, batches): (Vec<_>, Vec<_>) =
            requests.into_iter().map(|r| (r.reply, r.units)).unzip();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        let outcome = tokio::task::spawn_blocking(move || {
            write_batch(&store, &batches, &write_span)
        })
        .await;
        let failed = failed_counts(outcome, sizes, &span);
        for (reply, failed) in replies.into_iter().zip(failed) {
            let _ = reply.send(failed);
        }
    }
    debug!(parent: &span, "write pipeline stopped");
}

/// A write task that died leaves the batch in an unknown state; every unit
/// in it is reported as failed.
fn failed_counts(
    outcome: std::result::Result<Vec<usize>, JoinError>,
    sizes: Vec<usize>,
    span: &tracing::Span,
) -> Vec<usize> {
    match outcome {
        Ok(failed) => failed,
        Err(err) => {
            let units: usize = sizes.iter().sum();
            warn!(parent: span, error = ?err, units, "write task failed");
            sizes
        }
    }
}

/// Writes every request's units in one transaction, falling back to one
/// transaction per unit when that fails. Returns the failed count per request.
fn write_batch(store: &Store, batches: &[Vec<WriteUnit>], span: &tracing::Span) -> Vec<usize> {
    let all: Vec<_> = batches.iter().flatten().flatten().cloned().collect();
    match store.insert_all(&all) {
        Ok(()) => {
            debug!(parent: span, records = all.len(), "batch written");
            return vec![0; batches.len()];
        }
        Err(err) => {
            debug!(parent: span, error = %err, "batch write failed; retrying per unit");
        }
    }

    batches
        .iter()
        .map(|units| {
            units
                .iter()
                .filter(|unit| match store.insert_all(unit) {
                    Ok(()) => false,
                    Err(err) => {
                        let record = unit.first().map(|r| r.describe()).unwrap_or_default();
                        warn!(parent: span, error = %err, record = %record, "dropping record");
                        true
                    }
                })
                .count()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use telemorph_core::model::{Record, RecordKind};
    use telemorph_core::query::Page;
    use telemorph_testkit::{sample_log, sample_metric, sample_span};

    use super::*;

    fn pipeline(store: &Store, batch_size: usize) -> Pipeline {
        Pipeline::new(
            store.clone(),
            PipelineConfig {
                channel_capacity: 8,
                batch_size,
            },
            tracing::Span::none(),
        )
    }

    #[tokio::test]
    async fn submitted_units_are_written_before_ack() {
        let store = Store::open_in_memory().unwrap();
        let pipeline = pipeline(&store, 16);

        let failed = pipeline
            .submit(vec![
                vec![Record::Log(sample_log("boom"))],
                vec![
                    Record::Metric(sample_metric("latency_count", &[], 0, 3.0)),
                    Record::Metric(sample_metric("latency_sum", &[], 0, 1.5)),
                ],
            ])
            .await
            .unwrap();

        assert_eq!(failed, 0);
        let counts = store.counts().unwrap();
        assert_eq!(counts.logs, 1);
        assert_eq!(counts.metrics, 2);
    }

    #[tokio::test]
    async fn crashed_write_task_fails_every_unit() {
        let crashed = tokio::task::spawn_blocking(|| -> Vec<usize> { panic!("writer crashed") })
            .await;
        assert!(crashed.is_err());
        assert_eq!(
            failed_counts(crashed, vec![2, 3], &tracing::Span::none()),
            vec![2, 3]
        );
        assert_eq!(
            failed_counts(Ok(vec![0, 1]), vec![2, 3], &tracing::Span::none()),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn bad_unit_only_loses_itself() {
        let store = Store::open_in_memory().unwrap();
        let pipeline = pipeline(&store, 16);
        let mut broken = sample_span("b1", None);
        broken.duration_nanos = -5;

        let failed = pipeline
            .submit(vec![
                vec![Record::Span(sample_span("a1", None))],
                vec![Record::Span(broken)],
                vec![Record::Log(sample_log("kept"))],
            ])
            .await
            .unwrap();

        assert_eq!(failed, 1);
        let spans = store.list(RecordKind::Traces, Page::default()).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(store.counts().unwrap().logs, 1);
    }

    #[tokio::test]
    async fn concurrent_submitters_get_their_own_counts() {
        let store = Store::open_in_memory().unwrap();
        let pipeline = pipeline(&store, 2);
        let mut broken = sample_span("b1", None);
        broken.duration_nanos = -1;

        let good = pipeline.submit(vec![vec![Record::Log(sample_log("one"))]]);
        let bad = pipeline.submit(vec![vec![Record::Span(broken)]]);
        let (good, bad) = tokio::join!(good, bad);

        assert_eq!(good.unwrap(), 0);
        assert_eq!(bad.unwrap(), 1);
        assert_eq!(store.counts().unwrap().logs, 1);
    }

    #[tokio::test]
    async fn empty_submit_skips_the_writer() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(pipeline(&store, 4).submit(Vec::new()).await.unwrap(), 0);
    }
}
