pub mod log;
pub mod metric;
pub mod series;
pub mod span;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use self::log::LogRecord;
use self::metric::Metric;
use self::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Metrics,
    Traces,
    Logs,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Traces => "traces",
            Self::Logs => "logs",
        }
    }
}

/// A canonical record of any kind, as produced by the normalization layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    Metric(Metric),
    Span(Span),
    Log(LogRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Metric(_) => RecordKind::Metrics,
            Record::Span(_) => RecordKind::Traces,
            Record::Log(_) => RecordKind::Logs,
        }
    }

    /// Short identifying text for log lines about this record.
    pub fn describe(&self) -> String {
        match self {
            Record::Metric(m) => format!("metric {} at {}", m.metric_name, m.timestamp),
            Record::Span(s) => format!("span trace_id={} span_id={}", s.trace_id, s.span_id),
            Record::Log(l) => match &l.trace_id {
                Some(trace_id) => format!("log at {} trace_id={trace_id}", l.timestamp),
                None => format!("log at {}", l.timestamp),
            },
        }
    }
}

impl From<Metric> for Record {
    fn from(value: Metric) -> Self {
        Record::Metric(value)
    }
}

impl From<Span> for Record {
    fn from(value: Span) -> Self {
        Record::Span(value)
    }
}

impl From<LogRecord> for Record {
    fn from(value: LogRecord) -> Self {
        Record::Log(value)
    }
}

/// A persisted record with its storage-assigned id and insertion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: T,
}
