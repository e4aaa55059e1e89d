use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attr::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric_name: String,
    pub labels: Attributes,
    /// Ascending by timestamp.
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Vector,
    Matrix,
    Scalar,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Matrix => "matrix",
            Self::Scalar => "scalar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub result_kind: ResultKind,
    pub series: Vec<MetricSeries>,
}

/// Identity of a label set: the `key=value` pairs sorted lexicographically and
/// joined with commas.
pub fn series_key(labels: &Attributes) -> String {
    let mut pairs = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>();
    pairs.sort();
    pairs.join(",")
}
