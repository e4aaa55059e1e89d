//! Fixtures shared by the workspace's tests: OTLP request builders and
//! canonical record samples.

use chrono::{DateTime, TimeZone, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::logs::v1::{LogRecord as OtlpLogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{
    Gauge, Histogram, HistogramDataPoint, Metric as OtlpMetric, NumberDataPoint, ResourceMetrics,
    ScopeMetrics, Sum, metric, number_data_point,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as OtlpSpan, Status};
use telemorph_core::attr::Attributes;
use telemorph_core::model::log::LogRecord;
use telemorph_core::model::metric::Metric;
use telemorph_core::model::span::{Span, StatusCode};

pub const TRACE_ID: [u8; 16] = [
    0x4b, 0xf9, 0x2f, 0x35, 0x77, 0xb3, 0x4d, 0xa6, 0xa3, 0xce, 0x92, 0x9d, 0x0e, 0x0e, 0x47, 0x36,
];
pub const TRACE_ID_HEX: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
pub const SPAN_ID: [u8; 8] = [0x00, 0xf0, 0x67, 0xaa, 0x0b, 0xa9, 0x02, 0xb7];
pub const SPAN_ID_HEX: &str = "00f067aa0ba902b7";

/// 2026-02-01T00:00:00Z in unix nanoseconds.
pub const BASE_NANOS: u64 = 1_769_904_000_000_000_000;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

pub fn labels(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// Wire-side builders.

pub fn kv(key: &str, value: Value) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue { value: Some(value) }),
    }
}

pub fn kv_str(key: &str, value: &str) -> KeyValue {
    kv(key, Value::StringValue(value.to_string()))
}

pub fn resource(service: &str) -> Resource {
    Resource {
        attributes: vec![kv_str("service.name", service)],
        ..Default::default()
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: "telemorph-testkit".into(),
        ..Default::default()
    }
}

pub fn otlp_span(name: &str, start_nanos: u64, end_nanos: u64) -> OtlpSpan {
    OtlpSpan {
        trace_id: TRACE_ID.to_vec(),
        span_id: SPAN_ID.to_vec(),
        name: name.to_string(),
        start_time_unix_nano: start_nanos,
        end_time_unix_nano: end_nanos,
        attributes: vec![kv_str("http.route", "/orders"), kv("http.status_code", Value::IntValue(200))],
        status: Some(Status {
            code: 1,
            message: String::new(),
        }),
        ..Default::default()
    }
}

pub fn traces_request(service: &str, spans: Vec<OtlpSpan>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource(service)),
            scope_spans: vec![ScopeSpans {
                scope: Some(scope()),
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

pub fn number_point(time_nanos: u64, value: f64, attributes: Vec<KeyValue>) -> NumberDataPoint {
    NumberDataPoint {
        attributes,
        time_unix_nano: time_nanos,
        value: Some(number_data_point::Value::AsDouble(value)),
        ..Default::default()
    }
}

pub fn gauge(name: &str, points: Vec<NumberDataPoint>) -> OtlpMetric {
    OtlpMetric {
        name: name.to_string(),
        data: Some(metric::Data::Gauge(Gauge {
            data_points: points,
        })),
        ..Default::default()
    }
}

pub fn sum(name: &str, points: Vec<NumberDataPoint>) -> OtlpMetric {
    OtlpMetric {
        name: name.to_string(),
        data: Some(metric::Data::Sum(Sum {
            data_points: points,
            aggregation_temporality: 2,
            is_monotonic: true,
        })),
        ..Default::default()
    }
}

pub fn histogram(name: &str, time_nanos: u64, bounds: &[f64], counts: &[u64], total: f64) -> OtlpMetric {
    OtlpMetric {
        name: name.to_string(),
        data: Some(metric::Data::Histogram(Histogram {
            data_points: vec![HistogramDataPoint {
                time_unix_nano: time_nanos,
                count: counts.iter().sum(),
                sum: Some(total),
                bucket_counts: counts.to_vec(),
                explicit_bounds: bounds.to_vec(),
                ..Default::default()
            }],
            aggregation_temporality: 2,
        })),
        ..Default::default()
    }
}

pub fn metrics_request(service: &str, metrics: Vec<OtlpMetric>) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(resource(service)),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(scope()),
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

pub fn otlp_log(time_nanos: u64, severity_text: &str, body: &str) -> OtlpLogRecord {
    OtlpLogRecord {
        time_unix_nano: time_nanos,
        severity_text: severity_text.to_string(),
        body: Some(AnyValue {
            value: Some(Value::StringValue(body.to_string())),
        }),
        attributes: vec![kv_str("peer", "redis:6379")],
        trace_id: TRACE_ID.to_vec(),
        span_id: SPAN_ID.to_vec(),
        ..Default::default()
    }
}

pub fn logs_request(service: &str, records: Vec<OtlpLogRecord>) -> ExportLogsServiceRequest {
    ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            resource: Some(resource(service)),
            scope_logs: vec![ScopeLogs {
                scope: Some(scope()),
                log_records: records,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

// Canonical samples.

pub fn sample_metric(name: &str, pairs: &[(&str, &str)], offset_secs: i64, value: f64) -> Metric {
    Metric {
        timestamp: base_time() + chrono::Duration::seconds(offset_secs),
        metric_name: name.to_string(),
        value,
        labels: labels(pairs),
        service_name: "api".to_string(),
    }
}

pub fn sample_span(span_id: &str, parent: Option<&str>) -> Span {
    Span {
        trace_id: TRACE_ID_HEX.to_string(),
        span_id: span_id.to_string(),
        parent_span_id: parent.map(str::to_string),
        service_name: "api".to_string(),
        operation_name: "GET /orders".to_string(),
        start_time: base_time(),
        duration_nanos: 1_800_000_000,
        status_code: StatusCode::Error,
        attributes: labels(&[("http.route", "/orders")]),
    }
}

pub fn sample_log(message: &str) -> LogRecord {
    LogRecord {
        timestamp: base_time(),
        service_name: "api".to_string(),
        level: "ERROR".to_string(),
        message: message.to_string(),
        attributes: labels(&[("peer", "redis:6379")]),
        trace_id: Some(TRACE_ID_HEX.to_string()),
        span_id: Some(SPAN_ID_HEX.to_string()),
    }
}
