pub const SCHEMA_SQL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS metrics_id_seq;
CREATE SEQUENCE IF NOT EXISTS spans_id_seq;
CREATE SEQUENCE IF NOT EXISTS logs_id_seq;

CREATE TABLE IF NOT EXISTS metrics (
  id BIGINT PRIMARY KEY,
  ts_unix_nano BIGINT NOT NULL,
  metric_name TEXT NOT NULL,
  value DOUBLE NOT NULL,
  labels_json TEXT NOT NULL,
  service_name TEXT NOT NULL,
  created_at_unix_nano BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS metric_series_labels (
  metric_id BIGINT NOT NULL,
  key TEXT NOT NULL,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS spans (
  id BIGINT PRIMARY KEY,
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  parent_span_id TEXT CHECK (parent_span_id IS NULL OR parent_span_id <> ''),
  service_name TEXT NOT NULL,
  operation_name TEXT NOT NULL,
  start_unix_nano BIGINT NOT NULL,
  duration_nanos BIGINT NOT NULL CHECK (duration_nanos >= 0),
  status_code TEXT NOT NULL,
  attributes_json TEXT NOT NULL,
  created_at_unix_nano BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS logs (
  id BIGINT PRIMARY KEY,
  ts_unix_nano BIGINT NOT NULL,
  service_name TEXT NOT NULL,
  level TEXT NOT NULL,
  message TEXT NOT NULL,
  attributes_json TEXT NOT NULL,
  trace_id TEXT,
  span_id TEXT,
  created_at_unix_nano BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_ts ON metrics(ts_unix_nano);
CREATE INDEX IF NOT EXISTS idx_metrics_service ON metrics(service_name);
CREATE INDEX IF NOT EXISTS idx_metrics_name_ts ON metrics(metric_name, ts_unix_nano);
CREATE INDEX IF NOT EXISTS idx_metric_labels_metric ON metric_series_labels(metric_id);
CREATE INDEX IF NOT EXISTS idx_metric_labels_kv ON metric_series_labels(key, value);

CREATE INDEX IF NOT EXISTS idx_spans_start ON spans(start_unix_nano);
CREATE INDEX IF NOT EXISTS idx_spans_service ON spans(service_name);
CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);

CREATE INDEX IF NOT EXISTS idx_logs_ts ON logs(ts_unix_nano);
CREATE INDEX IF NOT EXISTS idx_logs_service ON logs(service_name);
CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
"#;
