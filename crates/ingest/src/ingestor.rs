use chrono::Utc;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use telemorph_core::model::RecordKind;
use tracing::{debug, info_span, warn};

use crate::otlp::decode::{Decoded, Decoder};
use crate::pipeline::Pipeline;

/// Sub-records already rejected before protobuf decoding (JSON conversion).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rejections {
    pub count: usize,
    pub first_error: Option<String>,
}

/// What an export request reports back: how many sub-records were dropped
/// and why the first one was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub rejected: i64,
    pub error_message: String,
}

/// Decode then write, shared by the gRPC and HTTP adapters.
#[derive(Clone)]
pub struct Ingestor {
    decoder: Decoder,
    pipeline: Pipeline,
    span: tracing::Span,
}

impl Ingestor {
    pub fn new(pipeline: Pipeline, span: tracing::Span) -> Self {
        Self {
            decoder: Decoder::new(info_span!(parent: &span, "decoder")),
            pipeline,
            span,
        }
    }

    pub async fn traces(&self, req: &ExportTraceServiceRequest, prior: Rejections) -> IngestOutcome {
        let decoded = self.decoder.traces(req);
        self.commit(RecordKind::Traces, decoded, prior).await
    }

    pub async fn metrics(&self, req: &ExportMetricsServiceRequest, prior: Rejections) -> IngestOutcome {
        let decoded = self.decoder.metrics(req, Utc::now());
        self.commit(RecordKind::Metrics, decoded, prior).await
    }

    pub async fn logs(&self, req: &ExportLogsServiceRequest, prior: Rejections) -> IngestOutcome {
        let decoded = self.decoder.logs(req, Utc::now());
        self.commit(RecordKind::Logs, decoded, prior).await
    }

    async fn commit(&self, kind: RecordKind, decoded: Decoded, prior: Rejections) -> IngestOutcome {
        let records = decoded.record_count();
        let units = decoded.units.len();
        let mut rejected = prior.count + decoded.rejected;
        let mut first_error = prior.first_error.or(decoded.first_error);

        match self.pipeline.submit(decoded.units).await {
            Ok(0) => {}
            Ok(failed) => {
                rejected += failed;
                first_error.get_or_insert_with(|| format!("{failed} record(s) failed to store"));
            }
            Err(err) => {
                warn!(parent: &self.span, kind = kind.as_str(), error = %err, "write failed");
                rejected += units;
                first_error.get_or_insert(err.to_string());
            }
        }

        debug!(
            parent: &self.span,
            kind = kind.as_str(),
            records,
            rejected,
            "export processed"
        );
        IngestOutcome {
            rejected: i64::try_from(rejected).unwrap_or(i64::MAX),
            error_message: first_error.unwrap_or_default(),
        }
    }
}
