use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::model::series::{MetricSeries, QueryResult, ResultKind, SeriesPoint, series_key};
use telemorph_core::query::{MetricFetch, MetricRow};
use telemorph_core::time::to_chrono;
use telemorph_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ast::Query;
use crate::functions;

/// Read access the evaluator needs from storage.
pub trait SeriesSource: Send + Sync {
    fn fetch_metric_rows(
        &self,
        fetch: &MetricFetch,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricRow>>;
}

impl SeriesSource for Store {
    fn fetch_metric_rows(
        &self,
        fetch: &MetricFetch,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricRow>> {
        Store::fetch_metric_rows(self, fetch, cancel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EvalWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(TelemorphError::InvalidArgument(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The `lookback` before `end`.
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Result<Self> {
        Self::new(end - to_chrono(lookback)?, end)
    }
}

/// Runs parsed queries against a [`SeriesSource`]. Holds no per-query state.
#[derive(Clone)]
pub struct Evaluator {
    source: Arc<dyn SeriesSource>,
    span: tracing::Span,
}

impl Evaluator {
    pub fn new(source: Arc<dyn SeriesSource>, span: tracing::Span) -> Self {
        Self { source, span }
    }

    pub fn evaluate(
        &self,
        query: &Query,
        window: EvalWindow,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        if query.function.as_deref() == Some("time") && query.aggregation.is_none() {
            return Ok(QueryResult {
                result_kind: ResultKind::Scalar,
                series: vec![functions::time_series(window.end)],
            });
        }

        if let Some(name) = &query.function {
            functions::ensure_function(name)?;
        }
        if let Some(aggregation) = &query.aggregation {
            functions::ensure_aggregation(&aggregation.operation)?;
        }

        let range = query.range.map(to_chrono).transpose()?;
        let mut series = self.fetch(query, window, cancel)?;
        if let Some(name) = &query.function {
            series = functions::apply(name, series, range, window.end)?;
        }
        if let Some(aggregation) = &query.aggregation {
            series = functions::aggregate(aggregation, series, window.end)?;
        }
        if cancel.is_cancelled() {
            return Err(TelemorphError::Cancelled);
        }

        let result_kind =
            if query.range.is_some() && query.function.is_none() && query.aggregation.is_none() {
                ResultKind::Matrix
            } else {
                ResultKind::Vector
            };
        debug!(
            parent: &self.span,
            metric = %query.metric_name,
            series = series.len(),
            kind = result_kind.as_str(),
            "query evaluated"
        );
        Ok(QueryResult {
            result_kind,
            series,
        })
    }

    fn fetch(
        &self,
        query: &Query,
        window: EvalWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricSeries>> {
        let start = match (&query.function, query.range) {
            (None, Some(range)) => window.start.max(window.end - to_chrono(range)?),
            _ => window.start,
        };
        let fetch = MetricFetch {
            metric_name: query.metric_name.clone(),
            start,
            end: window.end,
            labels: query.labels.clone(),
        };
        let rows = self
            .source
            .fetch_metric_rows(&fetch, cancel)
            .map_err(|e| match e {
                TelemorphError::Cancelled => TelemorphError::Cancelled,
                other => TelemorphError::Evaluation(format!(
                    "fetch {} failed: {other}",
                    query.metric_name
                )),
            })?;
        Ok(group_rows(rows))
    }
}

/// Groups rows into series by label set, ordered by series key, points ascending.
pub fn group_rows(rows: Vec<MetricRow>) -> Vec<MetricSeries> {
    let mut grouped: BTreeMap<String, MetricSeries> = BTreeMap::new();
    for row in rows {
        let point = SeriesPoint {
            timestamp: row.timestamp,
            value: row.value,
        };
        grouped
            .entry(series_key(&row.labels))
            .or_insert_with(|| MetricSeries {
                metric_name: row.metric_name,
                labels: row.labels,
                points: Vec::new(),
            })
            .points
            .push(point);
    }
    grouped
        .into_values()
        .map(|mut series| {
            series.points.sort_by_key(|p| p.timestamp);
            series
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;
    use telemorph_core::attr::Attributes;

    use super::*;
    use crate::parser::parse;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn row(labels: &[(&str, &str)], secs: i64, value: f64) -> MetricRow {
        MetricRow {
            metric_name: "http_requests_total".into(),
            timestamp: t(secs),
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Serves fixed rows and records the last fetch.
    #[derive(Default)]
    struct FixedSource {
        rows: Vec<MetricRow>,
        fail: bool,
        seen: Mutex<Option<MetricFetch>>,
    }

    impl SeriesSource for FixedSource {
        fn fetch_metric_rows(
            &self,
            fetch: &MetricFetch,
            cancel: &CancellationToken,
        ) -> Result<Vec<MetricRow>> {
            if cancel.is_cancelled() {
                return Err(TelemorphError::Cancelled);
            }
            *self.seen.lock().unwrap() = Some(fetch.clone());
            if self.fail {
                return Err(TelemorphError::Store("disk on fire".into()));
            }
            Ok(self
                .rows
                .iter()
                .filter(|r| r.timestamp >= fetch.start && r.timestamp <= fetch.end)
                .cloned()
                .collect())
        }
    }

    fn evaluator(source: FixedSource) -> (Evaluator, Arc<FixedSource>) {
        let source = Arc::new(source);
        (
            Evaluator::new(source.clone(), tracing::Span::none()),
            source,
        )
    }

    fn window() -> EvalWindow {
        EvalWindow::new(t(0), t(600)).unwrap()
    }

    fn run(source: FixedSource, query: &str) -> Result<QueryResult> {
        let (evaluator, _) = evaluator(source);
        evaluator.evaluate(&parse(query)?, window(), &CancellationToken::new())
    }

    #[test]
    fn groups_rows_by_label_set_with_sorted_points() {
        let series = group_rows(vec![
            row(&[("service", "b")], 20, 2.0),
            row(&[("service", "a")], 10, 1.0),
            row(&[("service", "b")], 5, 0.5),
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].labels["service"], "a");
        let b: Vec<_> = series[1].points.iter().map(|p| p.value).collect();
        assert_eq!(b, vec![0.5, 2.0]);
    }

    #[test]
    fn plain_selector_is_a_vector_of_raw_points() {
        let result = run(
            FixedSource {
                rows: vec![row(&[], 10, 1.0), row(&[], 20, 2.0)],
                ..FixedSource::default()
            },
            "http_requests_total",
        )
        .unwrap();
        assert_eq!(result.result_kind, ResultKind::Vector);
        assert_eq!(result.series[0].points.len(), 2);
    }

    #[test]
    fn rate_over_fetched_rows() {
        let source = FixedSource {
            rows: vec![row(&[], 0, 10.0), row(&[], 10, 30.0)],
            ..FixedSource::default()
        };
        let result = run(source, "rate(http_requests_total[15s])").unwrap();
        assert_eq!(result.series[0].points.len(), 1);
        assert_eq!(result.series[0].points[0].value, 2.0);
    }

    #[test]
    fn sum_of_two_series() {
        let source = FixedSource {
            rows: vec![row(&[("host", "a")], 30, 3.0), row(&[("host", "b")], 30, 4.0)],
            ..FixedSource::default()
        };
        let result = run(source, "sum(http_requests_total)").unwrap();
        assert_eq!(result.series.len(), 1);
        assert!(result.series[0].labels.is_empty());
        assert_eq!(
            result.series[0].points,
            vec![SeriesPoint {
                timestamp: t(30),
                value: 7.0
            }]
        );
    }

    #[test]
    fn top_level_range_narrows_the_fetch() {
        let (evaluator, source) = evaluator(FixedSource {
            rows: vec![row(&[], 100, 1.0), row(&[], 590, 2.0)],
            ..FixedSource::default()
        });
        let result = evaluator
            .evaluate(
                &parse("http_requests_total[1m]").unwrap(),
                window(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(result.result_kind, ResultKind::Matrix);
        assert_eq!(result.series[0].points.len(), 1);
        let seen = source.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.start, t(540));
        assert_eq!(seen.end, t(600));
    }

    #[test]
    fn label_selector_reaches_the_fetch() {
        let (evaluator, source) = evaluator(FixedSource::default());
        evaluator
            .evaluate(
                &parse(r#"http_requests_total{service="api"}"#).unwrap(),
                window(),
                &CancellationToken::new(),
            )
            .unwrap();
        let seen = source.seen.lock().unwrap().clone().unwrap();
        let expected: Attributes = [("service".to_string(), "api".to_string())].into();
        assert_eq!(seen.labels, expected);
    }

    #[test]
    fn time_is_a_scalar_without_fetching() {
        let (evaluator, source) = evaluator(FixedSource::default());
        let result = evaluator
            .evaluate(&parse("time()").unwrap(), window(), &CancellationToken::new())
            .unwrap();
        assert_eq!(result.result_kind, ResultKind::Scalar);
        assert_eq!(result.series[0].points[0].value, t(600).timestamp() as f64);
        assert!(source.seen.lock().unwrap().is_none());
    }

    #[test]
    fn unknown_function_is_not_a_silent_no_op() {
        let err = run(FixedSource::default(), "bogus(x[1m])").unwrap_err();
        assert!(matches!(err, TelemorphError::UnsupportedOperation(_)));
    }

    #[test]
    fn unsupported_names_fail_before_fetching() {
        let (evaluator, source) = evaluator(FixedSource::default());
        let err = evaluator
            .evaluate(
                &parse("bogus(http_requests_total[1m])").unwrap(),
                window(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TelemorphError::UnsupportedOperation(_)));
        assert!(source.seen.lock().unwrap().is_none());

        let mut query = parse("sum(http_requests_total)").unwrap();
        if let Some(aggregation) = query.aggregation.as_mut() {
            aggregation.operation = "median".to_string();
        }
        let err = evaluator
            .evaluate(&query, window(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, TelemorphError::UnsupportedOperation(msg) if msg.contains("median")));
        assert!(source.seen.lock().unwrap().is_none());
    }

    #[test]
    fn storage_failures_become_evaluation_errors() {
        let source = FixedSource {
            fail: true,
            ..FixedSource::default()
        };
        let err = run(source, "http_requests_total").unwrap_err();
        assert!(matches!(err, TelemorphError::Evaluation(msg) if msg.contains("disk on fire")));
    }

    #[test]
    fn cancellation_is_an_error_not_a_partial_result() {
        let (evaluator, _) = evaluator(FixedSource {
            rows: vec![row(&[], 10, 1.0)],
            ..FixedSource::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = evaluator
            .evaluate(&parse("http_requests_total").unwrap(), window(), &cancel)
            .unwrap_err();
        assert!(matches!(err, TelemorphError::Cancelled));
    }

    #[test]
    fn inverted_window_is_rejected() {
        assert!(EvalWindow::new(t(10), t(0)).is_err());
        let w = EvalWindow::ending_at(t(3600), Duration::from_secs(3600)).unwrap();
        assert_eq!(w.start, t(0));
    }
}
