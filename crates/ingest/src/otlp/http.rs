use std::io::Read;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use flate2::read::GzDecoder;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;
use serde_json::json;
use telemorph_core::error::{Result, TelemorphError};
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::ingestor::{IngestOutcome, Ingestor, Rejections};
use crate::otlp::grpc::{logs_response, metrics_response, trace_response};
use crate::otlp::json::{Partial, logs_from_json, metrics_from_json, traces_from_json};

/// Upper bound for a request body, compressed or not.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

#[derive(Clone)]
pub struct HttpIngestState {
    pub ingestor: Ingestor,
}

pub fn router(ingestor: Ingestor) -> Router {
    Router::new()
        .route("/v1/logs", post(export_logs))
        .route("/v1/traces", post(export_traces))
        .route("/v1/metrics", post(export_metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(HttpIngestState { ingestor })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Protobuf,
    Json,
}

impl Format {
    fn of(headers: &HeaderMap) -> Self {
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().starts_with("application/json"));
        if is_json { Format::Json } else { Format::Protobuf }
    }
}

/// Request-level failure: the whole body is rejected.
struct Rejected {
    status: StatusCode,
    format: Format,
    message: String,
}

impl IntoResponse for Rejected {
    fn into_response(self) -> Response {
        tracing::warn!(status = %self.status, error = %self.message, "otlp http request rejected");
        match self.format {
            Format::Json => (
                self.status,
                Json(json!({"code": 3, "message": self.message})),
            )
                .into_response(),
            Format::Protobuf => (self.status, self.message).into_response(),
        }
    }
}

fn content_encoding(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
}

fn gunzip(body: &[u8]) -> Result<Bytes> {
    let mut out = Vec::new();
    GzDecoder::new(body)
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| TelemorphError::Decode(format!("invalid gzip body: {e}")))?;
    if out.len() > MAX_BODY_BYTES {
        return Err(TelemorphError::InvalidArgument(
            "decompressed body too large".to_string(),
        ));
    }
    Ok(Bytes::from(out))
}

/// Inflation runs on the blocking pool.
async fn decompress(encoding: Option<&str>, body: Bytes) -> Result<Bytes> {
    match encoding {
        None | Some("") | Some("identity") => Ok(body),
        Some("gzip") => tokio::task::spawn_blocking(move || gunzip(&body))
            .await
            .map_err(|e| TelemorphError::Internal(format!("gzip task failed: {e}")))?,
        Some(other) => Err(TelemorphError::UnsupportedOperation(format!(
            "content encoding {other}"
        ))),
    }
}

async fn decode_request<R: Message + Default>(
    headers: &HeaderMap,
    body: Bytes,
    from_json: fn(&[u8]) -> Result<Partial<R>>,
) -> std::result::Result<(Format, R, Rejections), Rejected> {
    let format = Format::of(headers);
    let reject = |status: StatusCode, err: TelemorphError| Rejected {
        status,
        format,
        message: err.to_string(),
    };
    let encoding = content_encoding(headers);
    let body = decompress(encoding.as_deref(), body)
        .await
        .map_err(|e| match e {
            TelemorphError::UnsupportedOperation(_) => {
                reject(StatusCode::UNSUPPORTED_MEDIA_TYPE, e)
            }
            TelemorphError::InvalidArgument(_) => reject(StatusCode::PAYLOAD_TOO_LARGE, e),
            TelemorphError::Internal(_) => reject(StatusCode::INTERNAL_SERVER_ERROR, e),
            _ => reject(StatusCode::BAD_REQUEST, e),
        })?;
    match format {
        Format::Json => {
            let partial = from_json(&body).map_err(|e| reject(StatusCode::BAD_REQUEST, e))?;
            if partial.dropped_attributes > 0 {
                tracing::warn!(
                    dropped = partial.dropped_attributes,
                    "dropped unconvertible resource or scope attributes"
                );
            }
            let prior = Rejections {
                count: partial.rejected,
                first_error: partial.first_error,
            };
            Ok((format, partial.request, prior))
        }
        Format::Protobuf => {
            let request = R::decode(body).map_err(|e| {
                reject(
                    StatusCode::BAD_REQUEST,
                    TelemorphError::Decode(format!("invalid protobuf body: {e}")),
                )
            })?;
            Ok((format, request, Rejections::default()))
        }
    }
}

fn respond<M: Message>(
    format: Format,
    outcome: IngestOutcome,
    rejected_field: &str,
    to_proto: fn(IngestOutcome) -> M,
) -> Response {
    match format {
        Format::Json => {
            let mut partial = serde_json::Map::new();
            partial.insert(rejected_field.to_string(), json!(outcome.rejected));
            if !outcome.error_message.is_empty() {
                partial.insert("errorMessage".to_string(), json!(outcome.error_message));
            }
            Json(json!({ "partialSuccess": partial })).into_response()
        }
        Format::Protobuf => (
            [(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE))],
            to_proto(outcome).encode_to_vec(),
        )
            .into_response(),
    }
}

async fn export_traces(
    State(state): State<HttpIngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, Rejected> {
    let (format, req, prior) =
        decode_request::<ExportTraceServiceRequest>(&headers, body, traces_from_json).await?;
    let outcome = state.ingestor.traces(&req, prior).await;
    Ok(respond(format, outcome, "rejectedSpans", trace_response))
}

async fn export_metrics(
    State(state): State<HttpIngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, Rejected> {
    let (format, req, prior) =
        decode_request::<ExportMetricsServiceRequest>(&headers, body, metrics_from_json).await?;
    let outcome = state.ingestor.metrics(&req, prior).await;
    Ok(respond(format, outcome, "rejectedDataPoints", metrics_response))
}

async fn export_logs(
    State(state): State<HttpIngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, Rejected> {
    let (format, req, prior) =
        decode_request::<ExportLogsServiceRequest>(&headers, body, logs_from_json).await?;
    let outcome = state.ingestor.logs(&req, prior).await;
    Ok(respond(format, outcome, "rejectedLogRecords", logs_response))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use axum::body::Body;
    use axum::http::Request;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceResponse;
    use telemorph_core::model::RecordKind;
    use telemorph_core::query::Page;
    use telemorph_store::Store;
    use telemorph_testkit::{BASE_NANOS, SPAN_ID_HEX, TRACE_ID_HEX, otlp_span, traces_request};
    use tower::ServiceExt;

    use super::*;
    use crate::pipeline::{Pipeline, PipelineConfig};

    fn app(store: &Store) -> Router {
        let pipeline = Pipeline::new(store.clone(), PipelineConfig::default(), tracing::Span::none());
        router(Ingestor::new(pipeline, tracing::Span::none()))
    }

    fn post(path: &str, content_type: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_bytes(resp: Response) -> Bytes {
        axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap()
    }

    fn json_traces(trace_ids: &[&str]) -> Vec<u8> {
        let spans: Vec<_> = trace_ids
            .iter()
            .map(|trace_id| {
                json!({
                    "traceId": trace_id,
                    "spanId": SPAN_ID_HEX,
                    "name": "GET /orders",
                    "startTimeUnixNano": BASE_NANOS.to_string(),
                    "endTimeUnixNano": (BASE_NANOS + 1_000).to_string()
                })
            })
            .collect();
        serde_json::to_vec(&json!({
            "resourceSpans": [{
                "resource": {"attributes": [{"key": "service.name", "value": {"stringValue": "api"}}]},
                "scopeSpans": [{"spans": spans}]
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn protobuf_traces_get_protobuf_response() {
        let store = Store::open_in_memory().unwrap();
        let req = traces_request("api", vec![otlp_span("GET /orders", BASE_NANOS, BASE_NANOS + 10)]);

        let resp = app(&store)
            .oneshot(post("/v1/traces", PROTOBUF_CONTENT_TYPE, req.encode_to_vec()))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], PROTOBUF_CONTENT_TYPE);
        let decoded = ExportTraceServiceResponse::decode(body_bytes(resp).await).unwrap();
        assert!(decoded.partial_success.is_none());
        assert_eq!(store.counts().unwrap().traces, 1);
    }

    #[tokio::test]
    async fn json_batch_with_one_malformed_span_is_partial_success() {
        let store = Store::open_in_memory().unwrap();

        let resp = app(&store)
            .oneshot(post(
                "/v1/traces",
                "application/json",
                json_traces(&["zz-not-hex", TRACE_ID_HEX]),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["partialSuccess"]["rejectedSpans"], 1);
        assert!(body["partialSuccess"]["errorMessage"].is_string());

        let listing = store.list(RecordKind::Traces, Page::default()).unwrap();
        assert_eq!(listing.len(), 1);
    }

    #[tokio::test]
    async fn gzip_json_is_accepted() {
        let store = Store::open_in_memory().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json_traces(&[TRACE_ID_HEX])).unwrap();
        let mut req = post("/v1/traces", "application/json", encoder.finish().unwrap());
        req.headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let resp = app(&store).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body, json!({"partialSuccess": {"rejectedSpans": 0}}));
        assert_eq!(store.counts().unwrap().traces, 1);
    }

    #[tokio::test]
    async fn unparseable_envelopes_are_bad_requests() {
        let store = Store::open_in_memory().unwrap();

        let json = app(&store)
            .oneshot(post("/v1/logs", "application/json", b"{\"resourceLogs\":".to_vec()))
            .await
            .unwrap();
        assert_eq!(json.status(), StatusCode::BAD_REQUEST);

        let proto = app(&store)
            .oneshot(post("/v1/metrics", PROTOBUF_CONTENT_TYPE, vec![0xff, 0xff, 0xff]))
            .await
            .unwrap();
        assert_eq!(proto.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn gunzip_refuses_bodies_over_the_limit() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&vec![b'a'; MAX_BODY_BYTES + 1]).unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(compressed.len() < MAX_BODY_BYTES);

        assert!(matches!(
            gunzip(&compressed),
            Err(TelemorphError::InvalidArgument(_))
        ));
        assert!(matches!(gunzip(b"plain"), Err(TelemorphError::Decode(_))));
    }

    #[tokio::test]
    async fn oversized_gzip_body_is_payload_too_large() {
        let store = Store::open_in_memory().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&vec![b' '; MAX_BODY_BYTES + 1]).unwrap();
        let mut req = post("/v1/traces", "application/json", encoder.finish().unwrap());
        req.headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let resp = app(&store).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(store.counts().unwrap().traces, 0);
    }

    #[tokio::test]
    async fn unknown_content_encoding_is_unsupported() {
        let store = Store::open_in_memory().unwrap();
        let mut req = post("/v1/traces", "application/json", json_traces(&[TRACE_ID_HEX]));
        req.headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("br"));

        let resp = app(&store).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(store.counts().unwrap().traces, 0);
    }
}
