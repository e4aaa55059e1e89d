use chrono::Utc;
use duckdb::{Connection, params};
use telemorph_core::attr::Attributes;
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::model::Record;
use telemorph_core::model::log::LogRecord;
use telemorph_core::model::metric::Metric;
use telemorph_core::model::span::Span;
use telemorph_core::time::to_unix_nanos;

use crate::Store;

impl Store {
    pub fn insert(&self, record: &Record) -> Result<()> {
        self.insert_all(std::slice::from_ref(record))
    }

    /// Inserts every record in one transaction; on error nothing is written.
    pub fn insert_all(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let created_at = to_unix_nanos(&Utc::now())?;
        let mut conn = self.writer()?;
        let tx = conn
            .transaction()
            .map_err(|e| TelemorphError::Store(format!("begin tx failed: {e}")))?;

        for record in records {
            match record {
                Record::Metric(metric) => insert_metric(&tx, metric, created_at)?,
                Record::Span(span) => insert_span(&tx, span, created_at)?,
                Record::Log(log) => insert_log(&tx, log, created_at)?,
            }
        }

        tx.commit()
            .map_err(|e| TelemorphError::Store(format!("commit failed: {e}")))
    }
}

fn attributes_json(attrs: &Attributes) -> Result<String> {
    serde_json::to_string(attrs)
        .map_err(|e| TelemorphError::Internal(format!("attribute encoding failed: {e}")))
}

fn next_id(conn: &Connection, sequence: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT nextval('{sequence}')"), [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|e| TelemorphError::Store(format!("{sequence} nextval failed: {e}")))
}

fn insert_metric(conn: &Connection, metric: &Metric, created_at: i64) -> Result<()> {
    let id = next_id(conn, "metrics_id_seq")?;
    conn.execute(
        "INSERT INTO metrics (id, ts_unix_nano, metric_name, value, labels_json, service_name, created_at_unix_nano)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            to_unix_nanos(&metric.timestamp)?,
            metric.metric_name,
            metric.value,
            attributes_json(&metric.labels)?,
            metric.service_name,
            created_at,
        ],
    )
    .map_err(|e| TelemorphError::Store(format!("insert metric failed: {e}")))?;

    let mut stmt = conn
        .prepare(
            "INSERT INTO metric_series_labels (metric_id, key, value) VALUES (?, ?, ?)",
        )
        .map_err(|e| TelemorphError::Store(format!("prepare insert labels failed: {e}")))?;
    for (key, value) in metric.series_labels() {
        stmt.execute(params![id, key, value])
            .map_err(|e| TelemorphError::Store(format!("insert metric label failed: {e}")))?;
    }
    Ok(())
}

fn insert_span(conn: &Connection, span: &Span, created_at: i64) -> Result<()> {
    let id = next_id(conn, "spans_id_seq")?;
    conn.execute(
        "INSERT INTO spans
         (id, trace_id, span_id, parent_span_id, service_name, operation_name, start_unix_nano,
          duration_nanos, status_code, attributes_json, created_at_unix_nano)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            span.trace_id,
            span.span_id,
            span.parent_span_id,
            span.service_name,
            span.operation_name,
            to_unix_nanos(&span.start_time)?,
            span.duration_nanos,
            span.status_code.as_str().to_string(),
            attributes_json(&span.attributes)?,
            created_at,
        ],
    )
    .map_err(|e| TelemorphError::Store(format!("insert span failed: {e}")))?;
    Ok(())
}

fn insert_log(conn: &Connection, log: &LogRecord, created_at: i64) -> Result<()> {
    let id = next_id(conn, "logs_id_seq")?;
    conn.execute(
        "INSERT INTO logs
         (id, ts_unix_nano, service_name, level, message, attributes_json, trace_id, span_id, created_at_unix_nano)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            to_unix_nanos(&log.timestamp)?,
            log.service_name,
            log.level,
            log.message,
            attributes_json(&log.attributes)?,
            log.trace_id,
            log.span_id,
            created_at,
        ],
    )
    .map_err(|e| TelemorphError::Store(format!("insert log failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use telemorph_core::model::span::StatusCode;

    use super::*;

    fn span(duration_nanos: i64) -> Span {
        Span {
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
            span_id: "00f067aa0ba902b7".into(),
            parent_span_id: None,
            service_name: "api".into(),
            operation_name: "GET /orders".into(),
            start_time: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            duration_nanos,
            status_code: StatusCode::Ok,
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn insert_writes_metric_label_rows() {
        let store = Store::open_in_memory().unwrap();
        let metric = Metric {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            metric_name: "http_requests_total".into(),
            value: 3.0,
            labels: [("route".to_string(), "/".to_string())].into(),
            service_name: "api".into(),
        };
        store.insert(&Record::Metric(metric)).unwrap();

        let conn = store.reader().unwrap();
        let labels = crate::db::scalar_usize(&conn, "SELECT COUNT(*) FROM metric_series_labels")
            .unwrap();
        assert_eq!(labels, 2);
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .insert_all(&[Record::Span(span(10)), Record::Span(span(-1))])
            .unwrap_err();
        assert!(matches!(err, TelemorphError::Store(_)));
        assert_eq!(store.counts().unwrap().traces, 0);

        store.insert(&Record::Span(span(10))).unwrap();
        assert_eq!(store.counts().unwrap().traces, 1);
    }

    #[test]
    fn empty_parent_span_id_is_a_constraint_error() {
        let store = Store::open_in_memory().unwrap();
        let mut bad = span(5);
        bad.parent_span_id = Some(String::new());
        assert!(store.insert(&Record::Span(bad)).is_err());
    }
}
