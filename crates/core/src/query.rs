use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attr::Attributes;

pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Range + label constrained fetch of raw metric rows.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFetch {
    pub metric_name: String,
    /// Inclusive.
    pub start: DateTime<Utc>,
    /// Inclusive.
    pub end: DateTime<Utc>,
    /// Exact-match constraints on series labels.
    pub labels: Attributes,
}

/// One stored metric row as seen by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Series labels, including the implicit `service` label.
    pub labels: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Negative values clamp to zero.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIST_LIMIT).max(0),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RecordCounts {
    pub metrics: usize,
    pub traces: usize,
    pub logs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicesResponse {
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Promql,
    Metrics,
    Traces,
    Logs,
    Logql,
    Traceql,
}

/// Body of `POST /api/v1/query`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default, rename = "timeRange", alias = "time_range")]
    pub time_range: Option<String>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

/// Body of `POST /api/v1/query/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsQueryRequest {
    pub query: String,
    #[serde(default, alias = "start")]
    pub start_time: Option<String>,
    #[serde(default, alias = "end")]
    pub end_time: Option<String>,
    #[serde(default, alias = "timeRange")]
    pub time_range: Option<String>,
    #[serde(default)]
    pub step: Option<String>,
}

/// Label key to its sorted distinct values.
pub type LabelValues = BTreeMap<String, Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamps_negative_values() {
        let page = Page::new(Some(-5), Some(-1));
        assert_eq!(page, Page { limit: 0, offset: 0 });
        assert_eq!(Page::default().limit, DEFAULT_LIST_LIMIT);
    }

    #[test]
    fn query_request_accepts_camel_case_range() {
        let req: QueryRequest = serde_json::from_str(
            r#"{"type":"promql","query":"up","timeRange":"15m","step":"30s"}"#,
        )
        .unwrap();
        assert_eq!(req.query_type, QueryType::Promql);
        assert_eq!(req.time_range.as_deref(), Some("15m"));
        assert_eq!(req.limit, None);
    }

    #[test]
    fn query_request_rejects_unknown_type() {
        let res = serde_json::from_str::<QueryRequest>(r#"{"type":"sql"}"#);
        assert!(res.is_err());
    }
}
