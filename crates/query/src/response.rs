use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use telemorph_core::error::TelemorphError;
use telemorph_core::model::series::{QueryResult, ResultKind};
use telemorph_core::time::unix_seconds;

pub const NAME_LABEL: &str = "__name__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Prometheus-compatible query response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PromData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromData {
    #[serde(rename = "resultType")]
    pub result_type: ResultKind,
    pub result: Vec<PromSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromSeries {
    pub metric: BTreeMap<String, String>,
    /// `[unix_seconds, value]` pairs.
    pub values: Vec<(f64, f64)>,
}

impl PromResponse {
    pub fn success(result: &QueryResult) -> Self {
        let result_series = result
            .series
            .iter()
            .map(|series| {
                let mut metric = series.labels.clone();
                metric.insert(NAME_LABEL.to_string(), series.metric_name.clone());
                PromSeries {
                    metric,
                    values: series
                        .points
                        .iter()
                        .map(|p| (unix_seconds(&p.timestamp), p.value))
                        .collect(),
                }
            })
            .collect();
        Self {
            status: Status::Success,
            data: Some(PromData {
                result_type: result.result_kind,
                result: result_series,
            }),
            error: None,
        }
    }

    pub fn error(err: &TelemorphError) -> Self {
        Self::error_message(err.to_string())
    }

    pub fn error_message(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use telemorph_core::model::series::{MetricSeries, SeriesPoint};

    use super::*;

    #[test]
    fn success_shape() {
        let result = QueryResult {
            result_kind: ResultKind::Vector,
            series: vec![MetricSeries {
                metric_name: "http_requests_total".into(),
                labels: [("service".to_string(), "api".to_string())].into(),
                points: vec![SeriesPoint {
                    timestamp: Utc.timestamp_millis_opt(1_700_000_000_500).unwrap(),
                    value: 7.0,
                }],
            }],
        };
        let body = serde_json::to_value(PromResponse::success(&result)).unwrap();
        assert_eq!(
            body,
            json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [{
                        "metric": {"__name__": "http_requests_total", "service": "api"},
                        "values": [[1_700_000_000.5, 7.0]]
                    }]
                }
            })
        );
    }

    #[test]
    fn error_shape() {
        let body = serde_json::to_value(PromResponse::error(
            &TelemorphError::UnsupportedFunction("bogus".into()),
        ))
        .unwrap();
        assert_eq!(
            body,
            json!({"status": "error", "error": "unsupported function: bogus"})
        );
    }
}
