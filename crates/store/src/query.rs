use std::collections::BTreeMap;

use duckdb::types::Value;
use duckdb::{Connection, params, params_from_iter};
use serde::Serialize;
use telemorph_core::attr::Attributes;
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::model::log::LogRecord;
use telemorph_core::model::metric::{Metric, SERVICE_LABEL};
use telemorph_core::model::span::Span;
use telemorph_core::model::{RecordKind, Stored};
use telemorph_core::query::{LabelValues, MetricFetch, MetricRow, Page};
use telemorph_core::time::{from_unix_nanos, to_unix_nanos};
use tokio_util::sync::CancellationToken;

use crate::Store;
use crate::db::scalar_usize;

/// One page of records of a single kind, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Listing {
    Metrics(Vec<Stored<Metric>>),
    Traces(Vec<Stored<Span>>),
    Logs(Vec<Stored<LogRecord>>),
}

impl Listing {
    pub fn len(&self) -> usize {
        match self {
            Listing::Metrics(v) => v.len(),
            Listing::Traces(v) => v.len(),
            Listing::Logs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store {
    pub fn list(&self, kind: RecordKind, page: Page) -> Result<Listing> {
        Self::page_of(&self.reader()?, kind, page)
    }

    /// One page plus the row count of its kind, read from the same snapshot.
    pub fn list_with_total(&self, kind: RecordKind, page: Page) -> Result<(Listing, usize)> {
        let mut conn = self.reader()?;
        let tx = conn
            .transaction()
            .map_err(|e| TelemorphError::Store(format!("begin read failed: {e}")))?;
        let total = scalar_usize(&tx, count_sql(kind))?;
        let listing = Self::page_of(&tx, kind, page)?;
        tx.commit()
            .map_err(|e| TelemorphError::Store(format!("end read failed: {e}")))?;
        Ok((listing, total))
    }

    fn page_of(conn: &Connection, kind: RecordKind, page: Page) -> Result<Listing> {
        match kind {
            RecordKind::Metrics => Self::metrics_page(conn, page).map(Listing::Metrics),
            RecordKind::Traces => Self::spans_page(conn, page).map(Listing::Traces),
            RecordKind::Logs => Self::logs_page(conn, page).map(Listing::Logs),
        }
    }

    pub fn list_metrics(&self, page: Page) -> Result<Vec<Stored<Metric>>> {
        Self::metrics_page(&self.reader()?, page)
    }

    pub fn list_spans(&self, page: Page) -> Result<Vec<Stored<Span>>> {
        Self::spans_page(&self.reader()?, page)
    }

    pub fn list_logs(&self, page: Page) -> Result<Vec<Stored<LogRecord>>> {
        Self::logs_page(&self.reader()?, page)
    }

    fn metrics_page(conn: &Connection, page: Page) -> Result<Vec<Stored<Metric>>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at_unix_nano, ts_unix_nano, metric_name, value, labels_json, service_name
                 FROM metrics ORDER BY ts_unix_nano DESC, id DESC LIMIT ? OFFSET ?",
            )
            .map_err(|e| TelemorphError::Store(format!("prepare list metrics failed: {e}")))?;
        let rows = stmt
            .query_map(params![page.limit.max(0), page.offset.max(0)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|e| TelemorphError::Store(format!("list metrics failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, created_at, ts, metric_name, value, labels_json, service_name) =
                row.map_err(|e| TelemorphError::Store(format!("metric row decode failed: {e}")))?;
            out.push(Stored {
                id,
                created_at: from_unix_nanos(created_at),
                record: Metric {
                    timestamp: from_unix_nanos(ts),
                    metric_name,
                    value,
                    labels: parse_attributes(&labels_json)?,
                    service_name,
                },
            });
        }
        Ok(out)
    }

    fn spans_page(conn: &Connection, page: Page) -> Result<Vec<Stored<Span>>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at_unix_nano, trace_id, span_id, parent_span_id, service_name, operation_name,
                        start_unix_nano, duration_nanos, status_code, attributes_json
                 FROM spans ORDER BY start_unix_nano DESC, id DESC LIMIT ? OFFSET ?",
            )
            .map_err(|e| TelemorphError::Store(format!("prepare list spans failed: {e}")))?;
        let rows = stmt
            .query_map(params![page.limit.max(0), page.offset.max(0)], |row| {
                Ok(SpanRow {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    trace_id: row.get(2)?,
                    span_id: row.get(3)?,
                    parent_span_id: row.get(4)?,
                    service_name: row.get(5)?,
                    operation_name: row.get(6)?,
                    start: row.get(7)?,
                    duration_nanos: row.get(8)?,
                    status_code: row.get(9)?,
                    attributes_json: row.get(10)?,
                })
            })
            .map_err(|e| TelemorphError::Store(format!("list spans failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let row =
                row.map_err(|e| TelemorphError::Store(format!("span row decode failed: {e}")))?;
            out.push(row.into_stored()?);
        }
        Ok(out)
    }

    fn logs_page(conn: &Connection, page: Page) -> Result<Vec<Stored<LogRecord>>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at_unix_nano, ts_unix_nano, service_name, level, message, attributes_json, trace_id, span_id
                 FROM logs ORDER BY ts_unix_nano DESC, id DESC LIMIT ? OFFSET ?",
            )
            .map_err(|e| TelemorphError::Store(format!("prepare list logs failed: {e}")))?;
        let rows = stmt
            .query_map(params![page.limit.max(0), page.offset.max(0)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })
            .map_err(|e| TelemorphError::Store(format!("list logs failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, created_at, ts, service_name, level, message, attrs, trace_id, span_id) =
                row.map_err(|e| TelemorphError::Store(format!("log row decode failed: {e}")))?;
            out.push(Stored {
                id,
                created_at: from_unix_nanos(created_at),
                record: LogRecord {
                    timestamp: from_unix_nanos(ts),
                    service_name,
                    level,
                    message,
                    attributes: parse_attributes(&attrs)?,
                    trace_id,
                    span_id,
                },
            });
        }
        Ok(out)
    }

    pub fn distinct_service_names(&self) -> Result<Vec<String>> {
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT service_name FROM metrics WHERE service_name <> ''
                 UNION SELECT service_name FROM spans WHERE service_name <> ''
                 UNION SELECT service_name FROM logs WHERE service_name <> ''
                 ORDER BY 1",
            )
            .map_err(|e| TelemorphError::Store(format!("prepare services query failed: {e}")))?;
        collect_strings(&mut stmt, "services")
    }

    pub fn distinct_metric_names(&self) -> Result<Vec<String>> {
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT metric_name FROM metrics ORDER BY metric_name")
            .map_err(|e| TelemorphError::Store(format!("prepare metric names failed: {e}")))?;
        collect_strings(&mut stmt, "metric names")
    }

    /// Series label keys seen on a metric, each with its sorted distinct values.
    pub fn metric_label_values(&self, metric_name: &str) -> Result<LabelValues> {
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT l.key, l.value
                 FROM metric_series_labels l JOIN metrics m ON m.id = l.metric_id
                 WHERE m.metric_name = ?
                 ORDER BY l.key, l.value",
            )
            .map_err(|e| TelemorphError::Store(format!("prepare label values failed: {e}")))?;
        let rows = stmt
            .query_map(params![metric_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| TelemorphError::Store(format!("label values query failed: {e}")))?;

        let mut out = LabelValues::new();
        for row in rows {
            let (key, value) =
                row.map_err(|e| TelemorphError::Store(format!("label row decode failed: {e}")))?;
            out.entry(key).or_default().push(value);
        }
        Ok(out)
    }

    /// Raw rows for one metric over an inclusive time range, ascending by time.
    ///
    /// Label constraints are matched against the side table with bind
    /// parameters only. The token is checked before the query runs and while
    /// rows are read; cancellation discards everything read so far.
    pub fn fetch_metric_rows(
        &self,
        fetch: &MetricFetch,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricRow>> {
        if cancel.is_cancelled() {
            return Err(TelemorphError::Cancelled);
        }

        let mut sql = String::from(
            "SELECT m.ts_unix_nano, m.value, m.labels_json, m.service_name FROM metrics m
             WHERE m.metric_name = ? AND m.ts_unix_nano >= ? AND m.ts_unix_nano <= ?",
        );
        let mut binds = vec![
            Value::Text(fetch.metric_name.clone()),
            Value::BigInt(to_unix_nanos(&fetch.start)?),
            Value::BigInt(to_unix_nanos(&fetch.end)?),
        ];
        for (key, value) in &fetch.labels {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM metric_series_labels l
                   WHERE l.metric_id = m.id AND l.key = ? AND l.value = ?)",
            );
            binds.push(Value::Text(key.clone()));
            binds.push(Value::Text(value.clone()));
        }
        sql.push_str(" ORDER BY m.ts_unix_nano ASC, m.id ASC");

        let conn = self.reader()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TelemorphError::Store(format!("prepare metric fetch failed: {e}")))?;
        let rows = stmt
            .query_map(params_from_iter(binds), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| TelemorphError::Store(format!("metric fetch failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            if cancel.is_cancelled() {
                return Err(TelemorphError::Cancelled);
            }
            let (ts, value, labels_json, service_name) =
                row.map_err(|e| TelemorphError::Store(format!("metric row decode failed: {e}")))?;
            let mut labels = parse_attributes(&labels_json)?;
            labels
                .entry(SERVICE_LABEL.to_string())
                .or_insert(service_name);
            out.push(MetricRow {
                metric_name: fetch.metric_name.clone(),
                timestamp: from_unix_nanos(ts),
                value,
                labels,
            });
        }
        Ok(out)
    }
}

struct SpanRow {
    id: i64,
    created_at: i64,
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    service_name: String,
    operation_name: String,
    start: i64,
    duration_nanos: i64,
    status_code: String,
    attributes_json: String,
}

impl SpanRow {
    fn into_stored(self) -> Result<Stored<Span>> {
        Ok(Stored {
            id: self.id,
            created_at: from_unix_nanos(self.created_at),
            record: Span {
                trace_id: self.trace_id,
                span_id: self.span_id,
                parent_span_id: self.parent_span_id,
                service_name: self.service_name,
                operation_name: self.operation_name,
                start_time: from_unix_nanos(self.start),
                duration_nanos: self.duration_nanos,
                status_code: self
                    .status_code
                    .parse()
                    .map_err(|e| TelemorphError::Store(format!("bad stored status: {e}")))?,
                attributes: parse_attributes(&self.attributes_json)?,
            },
        })
    }
}

fn count_sql(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Metrics => "SELECT COUNT(*) FROM metrics",
        RecordKind::Traces => "SELECT COUNT(*) FROM spans",
        RecordKind::Logs => "SELECT COUNT(*) FROM logs",
    }
}

fn parse_attributes(raw: &str) -> Result<Attributes> {
    serde_json::from_str::<BTreeMap<String, String>>(raw)
        .map_err(|e| TelemorphError::Store(format!("stored attributes are not valid json: {e}")))
}

fn collect_strings(stmt: &mut duckdb::Statement<'_>, what: &str) -> Result<Vec<String>> {
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| TelemorphError::Store(format!("{what} query failed: {e}")))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| TelemorphError::Store(format!("{what} row decode failed: {e}")))?);
    }
    Ok(out)
}
