//! OTLP/JSON envelopes decoded into the protobuf message types.
//!
//! The envelope must parse as a whole; each span, metric data point and log
//! record inside it is converted on its own so a malformed one only rejects
//! itself. Resource and scope attributes that fail to convert are dropped
//! and counted in [`Partial::dropped_attributes`].

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{
    AnyValue, ArrayValue, InstrumentationScope, KeyValue, KeyValueList,
};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs, SeverityNumber};
use opentelemetry_proto::tonic::metrics::v1::{
    AggregationTemporality, ExponentialHistogram, ExponentialHistogramDataPoint, Gauge,
    Histogram, HistogramDataPoint, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
    Summary, SummaryDataPoint, metric, number_data_point, summary_data_point,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, Status, status};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer};
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::ids::decode_hex;

/// A converted request plus the sub-records that could not be converted.
#[derive(Debug, Default)]
pub struct Partial<T> {
    pub request: T,
    pub rejected: usize,
    pub first_error: Option<String>,
    pub dropped_attributes: usize,
}

impl<T> Partial<T> {
    fn reject(&mut self, count: usize, err: TelemorphError) {
        self.rejected += count;
        self.first_error.get_or_insert(err.to_string());
    }

    fn resource(&mut self, resource: Option<ResourceJson>) -> Option<Resource> {
        resource.map(|r| Resource {
            attributes: self.lenient_key_values(r.attributes),
            dropped_attributes_count: r.dropped_attributes_count,
            ..Default::default()
        })
    }

    fn scope(&mut self, scope: Option<ScopeJson>) -> Option<InstrumentationScope> {
        scope.map(|s| InstrumentationScope {
            name: s.name,
            version: s.version,
            attributes: self.lenient_key_values(s.attributes),
            ..Default::default()
        })
    }

    /// Keeps the attributes that convert; the rest are only counted.
    fn lenient_key_values(&mut self, kvs: Vec<KeyValueJson>) -> Vec<KeyValue> {
        let mut out = Vec::with_capacity(kvs.len());
        for kv in kvs {
            match kv.value.map(AnyValueJson::into_proto).transpose() {
                Ok(value) => out.push(KeyValue { key: kv.key, value }),
                Err(_) => self.dropped_attributes += 1,
            }
        }
        out
    }

    fn take<R, U>(&mut self, raw: Vec<serde_json::Value>, convert: impl Fn(R) -> Result<U>) -> Vec<U>
    where
        R: DeserializeOwned,
    {
        let mut out = Vec::with_capacity(raw.len());
        for value in raw {
            let converted = serde_json::from_value::<R>(value)
                .map_err(|e| TelemorphError::Decode(format!("malformed record: {e}")))
                .and_then(&convert);
            match converted {
                Ok(item) => out.push(item),
                Err(e) => self.reject(1, e),
            }
        }
        out
    }
}

fn envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| TelemorphError::Decode(format!("invalid OTLP/JSON body: {e}")))
}

pub fn traces_from_json(body: &[u8]) -> Result<Partial<ExportTraceServiceRequest>> {
    let raw: TracesJson = envelope(body)?;
    let mut partial = Partial::<ExportTraceServiceRequest>::default();
    let mut resource_spans = Vec::with_capacity(raw.resource_spans.len());
    for rs in raw.resource_spans {
        let mut scope_spans = Vec::with_capacity(rs.scope_spans.len());
        for ss in rs.scope_spans {
            let spans = partial.take(ss.spans, SpanJson::into_proto);
            scope_spans.push(ScopeSpans {
                scope: partial.scope(ss.scope),
                spans,
                schema_url: ss.schema_url,
            });
        }
        resource_spans.push(ResourceSpans {
            resource: partial.resource(rs.resource),
            scope_spans,
            schema_url: rs.schema_url,
        });
    }
    partial.request = ExportTraceServiceRequest { resource_spans };
    Ok(partial)
}

pub fn metrics_from_json(body: &[u8]) -> Result<Partial<ExportMetricsServiceRequest>> {
    let raw: MetricsJson = envelope(body)?;
    let mut partial = Partial::<ExportMetricsServiceRequest>::default();
    let mut resource_metrics = Vec::with_capacity(raw.resource_metrics.len());
    for rm in raw.resource_metrics {
        let mut scope_metrics = Vec::with_capacity(rm.scope_metrics.len());
        for sm in rm.scope_metrics {
            let mut metrics = Vec::with_capacity(sm.metrics.len());
            for value in sm.metrics {
                match serde_json::from_value::<MetricJson>(value) {
                    Ok(m) => metrics.extend(m.into_proto(&mut partial)),
                    Err(e) => partial.reject(
                        1,
                        TelemorphError::Decode(format!("malformed metric: {e}")),
                    ),
                }
            }
            scope_metrics.push(ScopeMetrics {
                scope: partial.scope(sm.scope),
                metrics,
                schema_url: sm.schema_url,
            });
        }
        resource_metrics.push(ResourceMetrics {
            resource: partial.resource(rm.resource),
            scope_metrics,
            schema_url: rm.schema_url,
        });
    }
    partial.request = ExportMetricsServiceRequest { resource_metrics };
    Ok(partial)
}

pub fn logs_from_json(body: &[u8]) -> Result<Partial<ExportLogsServiceRequest>> {
    let raw: LogsJson = envelope(body)?;
    let mut partial = Partial::<ExportLogsServiceRequest>::default();
    let mut resource_logs = Vec::with_capacity(raw.resource_logs.len());
    for rl in raw.resource_logs {
        let mut scope_logs = Vec::with_capacity(rl.scope_logs.len());
        for sl in rl.scope_logs {
            let log_records = partial.take(sl.log_records, LogRecordJson::into_proto);
            scope_logs.push(ScopeLogs {
                scope: partial.scope(sl.scope),
                log_records,
                schema_url: sl.schema_url,
            });
        }
        resource_logs.push(ResourceLogs {
            resource: partial.resource(rl.resource),
            scope_logs,
            schema_url: rl.schema_url,
        });
    }
    partial.request = ExportLogsServiceRequest { resource_logs };
    Ok(partial)
}

// Envelopes.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TracesJson {
    #[serde(default)]
    resource_spans: Vec<ResourceSpansJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSpansJson {
    #[serde(default)]
    resource: Option<ResourceJson>,
    #[serde(default)]
    scope_spans: Vec<ScopeSpansJson>,
    #[serde(default)]
    schema_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeSpansJson {
    #[serde(default)]
    scope: Option<ScopeJson>,
    #[serde(default)]
    spans: Vec<serde_json::Value>,
    #[serde(default)]
    schema_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricsJson {
    #[serde(default)]
    resource_metrics: Vec<ResourceMetricsJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceMetricsJson {
    #[serde(default)]
    resource: Option<ResourceJson>,
    #[serde(default)]
    scope_metrics: Vec<ScopeMetricsJson>,
    #[serde(default)]
    schema_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeMetricsJson {
    #[serde(default)]
    scope: Option<ScopeJson>,
    #[serde(default)]
    metrics: Vec<serde_json::Value>,
    #[serde(default)]
    schema_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogsJson {
    #[serde(default)]
    resource_logs: Vec<ResourceLogsJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLogsJson {
    #[serde(default)]
    resource: Option<ResourceJson>,
    #[serde(default)]
    scope_logs: Vec<ScopeLogsJson>,
    #[serde(default)]
    schema_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeLogsJson {
    #[serde(default)]
    scope: Option<ScopeJson>,
    #[serde(default)]
    log_records: Vec<serde_json::Value>,
    #[serde(default)]
    schema_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceJson {
    #[serde(default)]
    attributes: Vec<KeyValueJson>,
    #[serde(default)]
    dropped_attributes_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeJson {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    attributes: Vec<KeyValueJson>,
}

// Attribute values.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyValueJson {
    key: String,
    #[serde(default)]
    value: Option<AnyValueJson>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnyValueJson {
    string_value: Option<String>,
    bool_value: Option<bool>,
    int_value: Option<JsonInt<i64>>,
    double_value: Option<f64>,
    array_value: Option<ArrayValueJson>,
    kvlist_value: Option<KeyValueListJson>,
    bytes_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArrayValueJson {
    #[serde(default)]
    values: Vec<AnyValueJson>,
}

#[derive(Debug, Deserialize)]
struct KeyValueListJson {
    #[serde(default)]
    values: Vec<KeyValueJson>,
}

impl AnyValueJson {
    fn into_proto(self) -> Result<AnyValue> {
        let value = if let Some(s) = self.string_value {
            Some(Value::StringValue(s))
        } else if let Some(b) = self.bool_value {
            Some(Value::BoolValue(b))
        } else if let Some(JsonInt(i)) = self.int_value {
            Some(Value::IntValue(i))
        } else if let Some(d) = self.double_value {
            Some(Value::DoubleValue(d))
        } else if let Some(array) = self.array_value {
            Some(Value::ArrayValue(ArrayValue {
                values: array
                    .values
                    .into_iter()
                    .map(AnyValueJson::into_proto)
                    .collect::<Result<_>>()?,
            }))
        } else if let Some(list) = self.kvlist_value {
            Some(Value::KvlistValue(KeyValueList {
                values: key_values(list.values)?,
            }))
        } else if let Some(encoded) = self.bytes_value {
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| TelemorphError::Decode(format!("invalid bytesValue: {e}")))?;
            Some(Value::BytesValue(bytes))
        } else {
            None
        };
        Ok(AnyValue { value })
    }
}

fn key_values(kvs: Vec<KeyValueJson>) -> Result<Vec<KeyValue>> {
    kvs.into_iter()
        .map(|kv| {
            Ok(KeyValue {
                key: kv.key,
                value: kv.value.map(AnyValueJson::into_proto).transpose()?,
            })
        })
        .collect()
}

fn id_bytes(field: &str, hex: &str) -> Result<Vec<u8>> {
    decode_hex(hex).map_err(|e| TelemorphError::Decode(format!("{field}: {e}")))
}

// Scalars OTLP/JSON may encode as strings.

/// Integer sent either as a JSON number or as a decimal string.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct JsonInt<T>(T);

impl<'de, T> Deserialize<'de> for JsonInt<T>
where
    T: FromStr + TryFrom<u64> + TryFrom<i64>,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IntVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for IntVisitor<T>
        where
            T: FromStr + TryFrom<u64> + TryFrom<i64>,
        {
            type Value = JsonInt<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an integer or a string containing an integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                T::try_from(v)
                    .map(JsonInt)
                    .map_err(|_| E::custom(format!("integer out of range: {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                T::try_from(v)
                    .map(JsonInt)
                    .map_err(|_| E::custom(format!("integer out of range: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                v.parse::<T>()
                    .map(JsonInt)
                    .map_err(|_| E::custom(format!("invalid integer string: {v}")))
            }
        }

        deserializer.deserialize_any(IntVisitor(PhantomData))
    }
}

/// Enum sent either as its number or as its protobuf name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonEnum {
    Number(i32),
    Name(String),
}

impl Default for JsonEnum {
    fn default() -> Self {
        JsonEnum::Number(0)
    }
}

impl JsonEnum {
    fn resolve(&self, field: &str, lookup: impl Fn(&str) -> Option<i32>) -> Result<i32> {
        match self {
            JsonEnum::Number(n) => Ok(*n),
            JsonEnum::Name(name) => lookup(name).ok_or_else(|| {
                TelemorphError::Decode(format!("unknown {field} value: {name}"))
            }),
        }
    }
}

// Spans.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpanJson {
    #[serde(default)]
    trace_id: String,
    #[serde(default)]
    span_id: String,
    #[serde(default)]
    parent_span_id: String,
    #[serde(default)]
    trace_state: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: JsonEnum,
    #[serde(default)]
    start_time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    end_time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    attributes: Vec<KeyValueJson>,
    #[serde(default)]
    status: Option<StatusJson>,
    #[serde(default)]
    flags: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusJson {
    #[serde(default)]
    code: JsonEnum,
    #[serde(default)]
    message: String,
}

impl SpanJson {
    fn into_proto(self) -> Result<Span> {
        let status = match self.status {
            Some(s) => Some(Status {
                code: s.code.resolve("status code", |n| {
                    status::StatusCode::from_str_name(n).map(|c| c as i32)
                })?,
                message: s.message,
            }),
            None => None,
        };
        Ok(Span {
            trace_id: id_bytes("traceId", &self.trace_id)?,
            span_id: id_bytes("spanId", &self.span_id)?,
            parent_span_id: id_bytes("parentSpanId", &self.parent_span_id)?,
            trace_state: self.trace_state,
            name: self.name,
            kind: self.kind.resolve("span kind", |n| {
                opentelemetry_proto::tonic::trace::v1::span::SpanKind::from_str_name(n)
                    .map(|k| k as i32)
            })?,
            start_time_unix_nano: self.start_time_unix_nano.0,
            end_time_unix_nano: self.end_time_unix_nano.0,
            attributes: key_values(self.attributes)?,
            status,
            flags: self.flags,
            ..Default::default()
        })
    }
}

// Logs.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogRecordJson {
    #[serde(default)]
    time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    observed_time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    severity_number: JsonEnum,
    #[serde(default)]
    severity_text: String,
    #[serde(default)]
    body: Option<AnyValueJson>,
    #[serde(default)]
    attributes: Vec<KeyValueJson>,
    #[serde(default)]
    flags: u32,
    #[serde(default)]
    trace_id: String,
    #[serde(default)]
    span_id: String,
}

impl LogRecordJson {
    fn into_proto(self) -> Result<LogRecord> {
        Ok(LogRecord {
            time_unix_nano: self.time_unix_nano.0,
            observed_time_unix_nano: self.observed_time_unix_nano.0,
            severity_number: self.severity_number.resolve("severity number", |n| {
                SeverityNumber::from_str_name(n).map(|s| s as i32)
            })?,
            severity_text: self.severity_text,
            body: self.body.map(AnyValueJson::into_proto).transpose()?,
            attributes: key_values(self.attributes)?,
            flags: self.flags,
            trace_id: id_bytes("traceId", &self.trace_id)?,
            span_id: id_bytes("spanId", &self.span_id)?,
            ..Default::default()
        })
    }
}

// Metrics.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricJson {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    gauge: Option<PointsJson>,
    #[serde(default)]
    sum: Option<PointsJson>,
    #[serde(default)]
    histogram: Option<PointsJson>,
    #[serde(default)]
    exponential_histogram: Option<PointsJson>,
    #[serde(default)]
    summary: Option<PointsJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointsJson {
    #[serde(default)]
    data_points: Vec<serde_json::Value>,
    #[serde(default)]
    aggregation_temporality: JsonEnum,
    #[serde(default)]
    is_monotonic: bool,
}

impl PointsJson {
    fn temporality(&self) -> Result<i32> {
        self.aggregation_temporality
            .resolve("aggregation temporality", |n| {
                AggregationTemporality::from_str_name(n).map(|t| t as i32)
            })
    }
}

impl MetricJson {
    /// Points that fail to convert are counted on `partial` and left out. A
    /// metric whose temporality cannot be resolved is rejected with all of
    /// its points.
    fn into_proto(self, partial: &mut Partial<ExportMetricsServiceRequest>) -> Option<Metric> {
        let cumulative = match &self.gauge {
            Some(_) => None,
            None => [&self.sum, &self.histogram, &self.exponential_histogram]
                .into_iter()
                .flatten()
                .next(),
        };
        let resolved = cumulative.map(|p| (p.data_points.len(), p.temporality()));
        let aggregation_temporality = match resolved {
            Some((_, Ok(t))) => t,
            Some((points, Err(e))) => {
                partial.reject(points.max(1), e);
                return None;
            }
            None => 0,
        };

        let data = if let Some(points) = self.gauge {
            Some(metric::Data::Gauge(Gauge {
                data_points: partial.take(points.data_points, NumberPointJson::into_proto),
            }))
        } else if let Some(points) = self.sum {
            Some(metric::Data::Sum(Sum {
                data_points: partial.take(points.data_points, NumberPointJson::into_proto),
                aggregation_temporality,
                is_monotonic: points.is_monotonic,
            }))
        } else if let Some(points) = self.histogram {
            Some(metric::Data::Histogram(Histogram {
                data_points: partial.take(points.data_points, HistogramPointJson::into_proto),
                aggregation_temporality,
            }))
        } else if let Some(points) = self.exponential_histogram {
            Some(metric::Data::ExponentialHistogram(ExponentialHistogram {
                data_points: partial.take(
                    points.data_points,
                    ExponentialHistogramPointJson::into_proto,
                ),
                aggregation_temporality,
            }))
        } else {
            self.summary.map(|points| {
                metric::Data::Summary(Summary {
                    data_points: partial.take(points.data_points, SummaryPointJson::into_proto),
                })
            })
        };
        Some(Metric {
            name: self.name,
            description: self.description,
            unit: self.unit,
            data,
            ..Default::default()
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NumberPointJson {
    #[serde(default)]
    attributes: Vec<KeyValueJson>,
    #[serde(default)]
    start_time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    as_double: Option<f64>,
    #[serde(default)]
    as_int: Option<JsonInt<i64>>,
    #[serde(default)]
    flags: u32,
}

impl NumberPointJson {
    fn into_proto(self) -> Result<NumberDataPoint> {
        let value = match (self.as_double, self.as_int) {
            (Some(d), _) => Some(number_data_point::Value::AsDouble(d)),
            (None, Some(JsonInt(i))) => Some(number_data_point::Value::AsInt(i)),
            (None, None) => None,
        };
        Ok(NumberDataPoint {
            attributes: key_values(self.attributes)?,
            start_time_unix_nano: self.start_time_unix_nano.0,
            time_unix_nano: self.time_unix_nano.0,
            value,
            flags: self.flags,
            ..Default::default()
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistogramPointJson {
    #[serde(default)]
    attributes: Vec<KeyValueJson>,
    #[serde(default)]
    start_time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    count: JsonInt<u64>,
    #[serde(default)]
    sum: Option<f64>,
    #[serde(default)]
    bucket_counts: Vec<JsonInt<u64>>,
    #[serde(default)]
    explicit_bounds: Vec<f64>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl HistogramPointJson {
    fn into_proto(self) -> Result<HistogramDataPoint> {
        Ok(HistogramDataPoint {
            attributes: key_values(self.attributes)?,
            start_time_unix_nano: self.start_time_unix_nano.0,
            time_unix_nano: self.time_unix_nano.0,
            count: self.count.0,
            sum: self.sum,
            bucket_counts: self.bucket_counts.into_iter().map(|c| c.0).collect(),
            explicit_bounds: self.explicit_bounds,
            min: self.min,
            max: self.max,
            ..Default::default()
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExponentialHistogramPointJson {
    #[serde(default)]
    attributes: Vec<KeyValueJson>,
    #[serde(default)]
    start_time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    count: JsonInt<u64>,
    #[serde(default)]
    sum: Option<f64>,
    #[serde(default)]
    scale: i32,
    #[serde(default)]
    zero_count: JsonInt<u64>,
}

impl ExponentialHistogramPointJson {
    fn into_proto(self) -> Result<ExponentialHistogramDataPoint> {
        Ok(ExponentialHistogramDataPoint {
            attributes: key_values(self.attributes)?,
            start_time_unix_nano: self.start_time_unix_nano.0,
            time_unix_nano: self.time_unix_nano.0,
            count: self.count.0,
            sum: self.sum,
            scale: self.scale,
            zero_count: self.zero_count.0,
            ..Default::default()
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryPointJson {
    #[serde(default)]
    attributes: Vec<KeyValueJson>,
    #[serde(default)]
    start_time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    time_unix_nano: JsonInt<u64>,
    #[serde(default)]
    count: JsonInt<u64>,
    #[serde(default)]
    sum: f64,
    #[serde(default)]
    quantile_values: Vec<QuantileJson>,
}

#[derive(Debug, Deserialize)]
struct QuantileJson {
    #[serde(default)]
    quantile: f64,
    #[serde(default)]
    value: f64,
}

impl SummaryPointJson {
    fn into_proto(self) -> Result<SummaryDataPoint> {
        Ok(SummaryDataPoint {
            attributes: key_values(self.attributes)?,
            start_time_unix_nano: self.start_time_unix_nano.0,
            time_unix_nano: self.time_unix_nano.0,
            count: self.count.0,
            sum: self.sum,
            quantile_values: self
                .quantile_values
                .into_iter()
                .map(|q| summary_data_point::ValueAtQuantile {
                    quantile: q.quantile,
                    value: q.value,
                })
                .collect(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use prost::Message;
    use telemorph_testkit::{
        BASE_NANOS, SPAN_ID_HEX, TRACE_ID_HEX, gauge, histogram, kv_str, logs_request,
        metrics_request, number_point, otlp_log, otlp_span, traces_request,
    };

    use super::*;
    use crate::otlp::decode::Decoder;

    fn decoder() -> Decoder {
        Decoder::new(tracing::Span::none())
    }

    fn span_json(trace_id: &str, name: &str) -> serde_json::Value {
        serde_json::json!({
            "traceId": trace_id,
            "spanId": SPAN_ID_HEX,
            "name": name,
            "startTimeUnixNano": BASE_NANOS.to_string(),
            "endTimeUnixNano": BASE_NANOS + 1_500,
            "attributes": [
                {"key": "http.route", "value": {"stringValue": "/orders"}},
                {"key": "http.status_code", "value": {"intValue": "200"}}
            ],
            "status": {"code": "STATUS_CODE_OK"}
        })
    }

    fn traces_body(spans: Vec<serde_json::Value>) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "resourceSpans": [{
                "resource": {"attributes": [{"key": "service.name", "value": {"stringValue": "api"}}]},
                "scopeSpans": [{"scope": {"name": "telemorph-testkit"}, "spans": spans}]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn json_and_protobuf_spans_normalize_identically() {
        let from_json = traces_from_json(&traces_body(vec![span_json(TRACE_ID_HEX, "GET /orders")]))
            .unwrap();
        assert_eq!(from_json.rejected, 0);
        let from_proto = traces_request(
            "api",
            vec![otlp_span("GET /orders", BASE_NANOS, BASE_NANOS + 1_500)],
        );
        let proto = ExportTraceServiceRequest::decode(from_proto.encode_to_vec().as_slice()).unwrap();

        let json_records = decoder().traces(&from_json.request).units;
        let proto_records = decoder().traces(&proto).units;
        assert_eq!(json_records, proto_records);
    }

    #[test]
    fn malformed_span_is_rejected_alone() {
        let partial = traces_from_json(&traces_body(vec![
            span_json("not-hex!", "bad"),
            span_json(TRACE_ID_HEX, "good"),
        ]))
        .unwrap();
        assert_eq!(partial.rejected, 1);
        assert!(partial.first_error.unwrap().contains("traceId"));
        let spans = &partial.request.resource_spans[0].scope_spans[0].spans;
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "good");
    }

    #[test]
    fn unparseable_envelope_is_an_error() {
        assert!(matches!(
            traces_from_json(b"{not json"),
            Err(TelemorphError::Decode(_))
        ));
        assert!(logs_from_json(br#"{"resourceLogs": 5}"#).is_err());
    }

    #[test]
    fn json_logs_match_protobuf() {
        let body = serde_json::json!({
            "resourceLogs": [{
                "resource": {"attributes": [{"key": "service.name", "value": {"stringValue": "api"}}]},
                "scopeLogs": [{"logRecords": [{
                    "timeUnixNano": BASE_NANOS.to_string(),
                    "severityText": "error",
                    "body": {"stringValue": "boom"},
                    "attributes": [{"key": "peer", "value": {"stringValue": "redis:6379"}}],
                    "traceId": TRACE_ID_HEX,
                    "spanId": SPAN_ID_HEX
                }]}]
            }]
        });
        let partial = logs_from_json(&serde_json::to_vec(&body).unwrap()).unwrap();
        let received = Utc::now();
        let json_records = decoder().logs(&partial.request, received).units;
        let proto_records = decoder()
            .logs(&logs_request("api", vec![otlp_log(BASE_NANOS, "error", "boom")]), received)
            .units;
        assert_eq!(json_records, proto_records);
    }

    #[test]
    fn json_metrics_match_protobuf() {
        let body = serde_json::json!({
            "resourceMetrics": [{
                "resource": {"attributes": [{"key": "service.name", "value": {"stringValue": "api"}}]},
                "scopeMetrics": [{"metrics": [
                    {"name": "queue_depth", "gauge": {"dataPoints": [
                        {"timeUnixNano": BASE_NANOS.to_string(), "asDouble": 2.0,
                         "attributes": [{"key": "queue", "value": {"stringValue": "a"}}]}
                    ]}},
                    {"name": "latency", "histogram": {
                        "aggregationTemporality": "AGGREGATION_TEMPORALITY_CUMULATIVE",
                        "dataPoints": [{
                            "timeUnixNano": BASE_NANOS.to_string(),
                            "count": "10", "sum": 4.5,
                            "bucketCounts": ["3", "5", "2"], "explicitBounds": [0.1, 1.0]
                        }]
                    }}
                ]}]
            }]
        });
        let partial = metrics_from_json(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(partial.rejected, 0);
        let received = Utc::now();
        let json_records = decoder().metrics(&partial.request, received).units;
        let proto = metrics_request(
            "api",
            vec![
                gauge("queue_depth", vec![number_point(BASE_NANOS, 2.0, vec![kv_str("queue", "a")])]),
                histogram("latency", BASE_NANOS, &[0.1, 1.0], &[3, 5, 2], 4.5),
            ],
        );
        assert_eq!(json_records, decoder().metrics(&proto, received).units);
    }

    #[test]
    fn bad_data_point_is_rejected_alone() {
        let body = serde_json::json!({
            "resourceMetrics": [{"scopeMetrics": [{"metrics": [
                {"name": "g", "gauge": {"dataPoints": [
                    {"timeUnixNano": "soon", "asDouble": 1.0},
                    {"timeUnixNano": BASE_NANOS, "asInt": "7"}
                ]}}
            ]}]}]
        });
        let partial = metrics_from_json(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(partial.rejected, 1);
        let metric = &partial.request.resource_metrics[0].scope_metrics[0].metrics[0];
        let Some(metric::Data::Gauge(gauge)) = &metric.data else {
            panic!("expected gauge");
        };
        assert_eq!(gauge.data_points.len(), 1);
        assert_eq!(gauge.data_points[0].value, Some(number_data_point::Value::AsInt(7)));
    }

    #[test]
    fn bad_resource_attribute_keeps_the_batch() {
        let body = serde_json::json!({
            "resourceSpans": [{
                "resource": {"attributes": [
                    {"key": "service.name", "value": {"stringValue": "api"}},
                    {"key": "blob", "value": {"bytesValue": "!!not base64!!"}}
                ]},
                "scopeSpans": [{
                    "scope": {"name": "s", "attributes": [
                        {"key": "blob", "value": {"bytesValue": "%%"}}
                    ]},
                    "spans": [span_json(TRACE_ID_HEX, "GET /orders")]
                }]
            }]
        });
        let partial = traces_from_json(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(partial.rejected, 0);
        assert_eq!(partial.first_error, None);
        assert_eq!(partial.dropped_attributes, 2);

        let rs = &partial.request.resource_spans[0];
        let resource = rs.resource.as_ref().unwrap();
        assert_eq!(resource.attributes.len(), 1);
        assert_eq!(resource.attributes[0].key, "service.name");
        assert_eq!(rs.scope_spans[0].spans.len(), 1);

        let units = decoder().traces(&partial.request).units;
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn unknown_temporality_rejects_the_metric_with_its_points() {
        let body = serde_json::json!({
            "resourceMetrics": [{"scopeMetrics": [{"metrics": [
                {"name": "requests", "sum": {
                    "aggregationTemporality": "BOGUS",
                    "dataPoints": [
                        {"timeUnixNano": BASE_NANOS.to_string(), "asDouble": 1.0},
                        {"timeUnixNano": BASE_NANOS.to_string(), "asDouble": 2.0}
                    ]
                }},
                {"name": "depth", "gauge": {"dataPoints": [
                    {"timeUnixNano": BASE_NANOS.to_string(), "asDouble": 3.0}
                ]}}
            ]}]}]
        });
        let partial = metrics_from_json(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(partial.rejected, 2);
        assert!(partial.first_error.unwrap().contains("BOGUS"));
        let metrics = &partial.request.resource_metrics[0].scope_metrics[0].metrics;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "depth");
    }

    #[test]
    fn bytes_values_are_base64() {
        let kv: KeyValueJson = serde_json::from_value(serde_json::json!({
            "key": "raw", "value": {"bytesValue": "AQI="}
        }))
        .unwrap();
        let proto = key_values(vec![kv]).unwrap();
        assert_eq!(
            proto[0].value.as_ref().unwrap().value,
            Some(Value::BytesValue(vec![1, 2]))
        );
    }

    #[test]
    fn numeric_strings_and_numbers_both_parse() {
        let n: JsonInt<u64> = serde_json::from_str("\"1769904000000000000\"").unwrap();
        assert_eq!(n.0, BASE_NANOS);
        let n: JsonInt<u64> = serde_json::from_str("42").unwrap();
        assert_eq!(n.0, 42);
        assert!(serde_json::from_str::<JsonInt<u64>>("-1").is_err());
        let i: JsonInt<i64> = serde_json::from_str("\"-5\"").unwrap();
        assert_eq!(i.0, -5);
    }
}
