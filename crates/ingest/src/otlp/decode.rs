use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::LogRecord as OtlpLogRecord;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use opentelemetry_proto::tonic::metrics::v1::{Metric as OtlpMetric, NumberDataPoint, number_data_point};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
use telemorph_core::attr::{AttrValue, Attributes, flatten};
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::ids::encode_hex;
use telemorph_core::model::Record;
use telemorph_core::model::log::{LogRecord, normalize_level};
use telemorph_core::model::metric::Metric;
use telemorph_core::model::span::{Span, StatusCode};
use telemorph_core::time::from_wire_nanos;
use tracing::warn;

pub const SERVICE_NAME_KEY: &str = "service.name";
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Records written together or not at all: one span, one log record, or
/// every row decomposed from one metric data point.
pub type WriteUnit = Vec<Record>;

/// Outcome of decoding one export request.
#[derive(Debug, Default)]
pub struct Decoded {
    pub units: Vec<WriteUnit>,
    pub rejected: usize,
    pub first_error: Option<String>,
}

impl Decoded {
    pub fn record_count(&self) -> usize {
        self.units.iter().map(Vec::len).sum()
    }

    pub fn reject(&mut self, message: String) {
        self.rejected += 1;
        self.first_error.get_or_insert(message);
    }

    fn accept(&mut self, unit: WriteUnit) {
        if !unit.is_empty() {
            self.units.push(unit);
        }
    }
}

/// Shared OTLP to canonical-record decoder used by both transports.
#[derive(Clone)]
pub struct Decoder {
    span: tracing::Span,
}

impl Decoder {
    pub fn new(span: tracing::Span) -> Self {
        Self { span }
    }

    pub fn traces(&self, req: &ExportTraceServiceRequest) -> Decoded {
        let mut out = Decoded::default();
        for rs in &req.resource_spans {
            let service = service_name(rs.resource.as_ref());
            for ss in &rs.scope_spans {
                for otlp in &ss.spans {
                    match self.span(&service, otlp) {
                        Ok(span) => out.accept(vec![Record::Span(span)]),
                        Err(e) => {
                            let span_id = encode_hex(&otlp.span_id).unwrap_or_default();
                            warn!(
                                parent: &self.span,
                                error = %e,
                                service = %service,
                                span_id = %span_id,
                                "dropping span"
                            );
                            out.reject(e.to_string());
                        }
                    }
                }
            }
        }
        out
    }

    pub fn metrics(&self, req: &ExportMetricsServiceRequest, received_at: DateTime<Utc>) -> Decoded {
        let mut out = Decoded::default();
        for rm in &req.resource_metrics {
            let service = service_name(rm.resource.as_ref());
            for sm in &rm.scope_metrics {
                for otlp in &sm.metrics {
                    for point in self.metric(&service, otlp, received_at) {
                        match point {
                            Ok(rows) => out.accept(rows.into_iter().map(Record::Metric).collect()),
                            Err(e) => {
                                warn!(
                                    parent: &self.span,
                                    error = %e,
                                    service = %service,
                                    metric = %otlp.name,
                                    "dropping metric data point"
                                );
                                out.reject(e.to_string());
                            }
                        }
                    }
                }
            }
        }
        out
    }

    pub fn logs(&self, req: &ExportLogsServiceRequest, received_at: DateTime<Utc>) -> Decoded {
        let mut out = Decoded::default();
        for rl in &req.resource_logs {
            let service = service_name(rl.resource.as_ref());
            for sl in &rl.scope_logs {
                for record in &sl.log_records {
                    match self.log(&service, record, received_at) {
                        Ok(log) => out.accept(vec![Record::Log(log)]),
                        Err(e) => {
                            warn!(
                                parent: &self.span,
                                error = %e,
                                service = %service,
                                "dropping log record"
                            );
                            out.reject(e.to_string());
                        }
                    }
                }
            }
        }
        out
    }

    pub fn span(&self, service: &str, span: &OtlpSpan) -> Result<Span> {
        let trace_id = encode_hex(&span.trace_id)
            .ok_or_else(|| TelemorphError::Decode("span has an empty trace id".to_string()))?;
        let span_id = encode_hex(&span.span_id)
            .ok_or_else(|| TelemorphError::Decode("span has an empty span id".to_string()))?;
        let start_time = from_wire_nanos(span.start_time_unix_nano)?;

        let raw = i128::from(span.end_time_unix_nano) - i128::from(span.start_time_unix_nano);
        if raw < 0 {
            warn!(
                parent: &self.span,
                trace_id = %trace_id,
                span_id = %span_id,
                duration_nanos = raw as i64,
                "span ends before it starts; clamping duration to 0"
            );
        }
        let duration_nanos = i64::try_from(raw.max(0)).unwrap_or(i64::MAX);

        Ok(Span {
            trace_id,
            span_id,
            parent_span_id: encode_hex(&span.parent_span_id),
            service_name: service.to_string(),
            operation_name: span.name.clone(),
            start_time,
            duration_nanos,
            status_code: span
                .status
                .as_ref()
                .map(|s| StatusCode::from_wire(s.code))
                .unwrap_or_default(),
            attributes: attributes(&span.attributes),
        })
    }

    pub fn log(
        &self,
        service: &str,
        record: &OtlpLogRecord,
        received_at: DateTime<Utc>,
    ) -> Result<LogRecord> {
        let timestamp = match (record.time_unix_nano, record.observed_time_unix_nano) {
            (0, 0) => received_at,
            (0, observed) => from_wire_nanos(observed)?,
            (ts, _) => from_wire_nanos(ts)?,
        };
        let message = record
            .body
            .as_ref()
            .and_then(any_value)
            .and_then(|v| v.to_label())
            .unwrap_or_default();

        Ok(LogRecord {
            timestamp,
            service_name: service.to_string(),
            level: normalize_level(&record.severity_text, record.severity_number),
            message,
            attributes: attributes(&record.attributes),
            trace_id: encode_hex(&record.trace_id),
            span_id: encode_hex(&record.span_id),
        })
    }

    /// One result per data point; histogram-like points expand to several rows.
    pub fn metric(
        &self,
        service: &str,
        metric: &OtlpMetric,
        received_at: DateTime<Utc>,
    ) -> Vec<Result<Vec<Metric>>> {
        if metric.name.is_empty() {
            return (0..point_count(metric.data.as_ref()).max(1))
                .map(|_| Err(TelemorphError::Decode("metric has an empty name".to_string())))
                .collect();
        }
        let name = metric.name.as_str();
        let Some(data) = &metric.data else {
            return vec![Err(TelemorphError::Decode(format!(
                "metric {name} has no data"
            )))];
        };

        match data {
            Data::Gauge(gauge) => gauge
                .data_points
                .iter()
                .map(|p| number_row(name, service, p, received_at))
                .collect(),
            Data::Sum(sum) => sum
                .data_points
                .iter()
                .map(|p| number_row(name, service, p, received_at))
                .collect(),
            Data::Histogram(histogram) => histogram
                .data_points
                .iter()
                .map(|p| {
                    let mut rows = PointRows::new(name, service, p.time_unix_nano, &p.attributes, received_at)?;
                    rows.push("_count", p.count as f64, None);
                    if let Some(total) = p.sum.filter(|s| *s != 0.0) {
                        rows.push("_sum", total, None);
                    }
                    for (bound, count) in p.explicit_bounds.iter().zip(&p.bucket_counts) {
                        rows.push("_bucket", *count as f64, Some(("le", bound.to_string())));
                    }
                    Ok(rows.finish())
                })
                .collect(),
            Data::ExponentialHistogram(histogram) => histogram
                .data_points
                .iter()
                .map(|p| {
                    let mut rows = PointRows::new(name, service, p.time_unix_nano, &p.attributes, received_at)?;
                    rows.push("_count", p.count as f64, None);
                    if let Some(total) = p.sum.filter(|s| *s != 0.0) {
                        rows.push("_sum", total, None);
                    }
                    Ok(rows.finish())
                })
                .collect(),
            Data::Summary(summary) => summary
                .data_points
                .iter()
                .map(|p| {
                    let mut rows = PointRows::new(name, service, p.time_unix_nano, &p.attributes, received_at)?;
                    rows.push("_count", p.count as f64, None);
                    if p.sum != 0.0 {
                        rows.push("_sum", p.sum, None);
                    }
                    for q in &p.quantile_values {
                        rows.push("_quantile", q.value, Some(("quantile", q.quantile.to_string())));
                    }
                    Ok(rows.finish())
                })
                .collect(),
        }
    }
}

fn number_row(
    name: &str,
    service: &str,
    point: &NumberDataPoint,
    received_at: DateTime<Utc>,
) -> Result<Vec<Metric>> {
    let value = match point.value {
        Some(number_data_point::Value::AsDouble(d)) => d,
        Some(number_data_point::Value::AsInt(i)) => i as f64,
        None => {
            return Err(TelemorphError::Decode(format!(
                "metric {name} data point has no value"
            )));
        }
    };
    let mut rows = PointRows::new(name, service, point.time_unix_nano, &point.attributes, received_at)?;
    rows.push("", value, None);
    Ok(rows.finish())
}

/// Rows sharing one data point's time, labels and service.
struct PointRows<'a> {
    name: &'a str,
    service: &'a str,
    timestamp: DateTime<Utc>,
    labels: Attributes,
    rows: Vec<Metric>,
}

impl<'a> PointRows<'a> {
    fn new(
        name: &'a str,
        service: &'a str,
        time_unix_nano: u64,
        attrs: &[KeyValue],
        received_at: DateTime<Utc>,
    ) -> Result<Self> {
        let timestamp = if time_unix_nano == 0 {
            received_at
        } else {
            from_wire_nanos(time_unix_nano)?
        };
        Ok(Self {
            name,
            service,
            timestamp,
            labels: attributes(attrs),
            rows: Vec::new(),
        })
    }

    fn push(&mut self, suffix: &str, value: f64, extra: Option<(&str, String)>) {
        let mut labels = self.labels.clone();
        if let Some((key, text)) = extra {
            labels.insert(key.to_string(), text);
        }
        self.rows.push(Metric {
            timestamp: self.timestamp,
            metric_name: format!("{}{suffix}", self.name),
            value,
            labels,
            service_name: self.service.to_string(),
        });
    }

    fn finish(self) -> Vec<Metric> {
        self.rows
    }
}

fn point_count(data: Option<&Data>) -> usize {
    match data {
        Some(Data::Gauge(g)) => g.data_points.len(),
        Some(Data::Sum(s)) => s.data_points.len(),
        Some(Data::Histogram(h)) => h.data_points.len(),
        Some(Data::ExponentialHistogram(h)) => h.data_points.len(),
        Some(Data::Summary(s)) => s.data_points.len(),
        None => 0,
    }
}

/// `service.name` from the resource, or `unknown` when missing or empty.
pub fn service_name(resource: Option<&Resource>) -> String {
    resource
        .into_iter()
        .flat_map(|r| &r.attributes)
        .find(|kv| kv.key == SERVICE_NAME_KEY)
        .and_then(|kv| kv.value.as_ref())
        .and_then(any_value)
        .and_then(|v| v.to_label())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

pub fn attributes(kvs: &[KeyValue]) -> Attributes {
    flatten(
        kvs.iter()
            .filter_map(|kv| Some((kv.key.as_str(), any_value(kv.value.as_ref()?)?))),
    )
}

/// Bytes values have no attribute form.
pub fn any_value(value: &AnyValue) -> Option<AttrValue> {
    Some(match value.value.as_ref()? {
        Value::StringValue(s) => AttrValue::String(s.clone()),
        Value::BoolValue(b) => AttrValue::Bool(*b),
        Value::IntValue(i) => AttrValue::Int(*i),
        Value::DoubleValue(d) => AttrValue::Float(*d),
        Value::ArrayValue(array) => AttrValue::Array(
            array
                .values
                .iter()
                .map(|v| any_value(v).unwrap_or(AttrValue::Null))
                .collect(),
        ),
        Value::KvlistValue(list) => AttrValue::Map(
            list.values
                .iter()
                .filter_map(|kv| Some((kv.key.clone(), any_value(kv.value.as_ref()?)?)))
                .collect(),
        ),
        _ => return None,
    })
}
