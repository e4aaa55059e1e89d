use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use prost::Message;
use serde_json::json;
use telemorph_core::model::RecordKind;
use telemorph_core::query::Page;
use telemorph_ingest::otlp::http::router;
use telemorph_ingest::{Ingestor, Pipeline, PipelineConfig};
use telemorph_store::{Listing, Store};
use telemorph_testkit::{
    BASE_NANOS, SPAN_ID_HEX, TRACE_ID_HEX, logs_request, otlp_log, otlp_span, traces_request,
};
use tower::ServiceExt;

fn app(store: &Store) -> Router {
    let pipeline = Pipeline::new(store.clone(), PipelineConfig::default(), tracing::Span::none());
    router(Ingestor::new(pipeline, tracing::Span::none()))
}

async fn post(store: &Store, path: &str, content_type: &str, body: Vec<u8>) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", content_type)
        .body(Body::from(body))
        .unwrap();
    let resp = app(store).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

fn resource_json() -> serde_json::Value {
    json!({"attributes": [{"key": "service.name", "value": {"stringValue": "checkout"}}]})
}

#[tokio::test]
async fn spans_store_identically_from_either_wire_form() {
    let proto_store = Store::open_in_memory().unwrap();
    let json_store = Store::open_in_memory().unwrap();

    let proto = traces_request(
        "checkout",
        vec![otlp_span("GET /orders", BASE_NANOS, BASE_NANOS + 2_000_000)],
    );
    post(&proto_store, "/v1/traces", "application/x-protobuf", proto.encode_to_vec()).await;

    let body = json!({
        "resourceSpans": [{
            "resource": resource_json(),
            "scopeSpans": [{"spans": [{
                "traceId": TRACE_ID_HEX,
                "spanId": SPAN_ID_HEX,
                "name": "GET /orders",
                "startTimeUnixNano": BASE_NANOS.to_string(),
                "endTimeUnixNano": (BASE_NANOS + 2_000_000).to_string(),
                "attributes": [
                    {"key": "http.route", "value": {"stringValue": "/orders"}},
                    {"key": "http.status_code", "value": {"intValue": 200}}
                ],
                "status": {"code": 1}
            }]}]
        }]
    });
    post(&json_store, "/v1/traces", "application/json", serde_json::to_vec(&body).unwrap()).await;

    let Listing::Traces(from_proto) = proto_store.list(RecordKind::Traces, Page::default()).unwrap()
    else {
        panic!("expected spans");
    };
    let Listing::Traces(from_json) = json_store.list(RecordKind::Traces, Page::default()).unwrap()
    else {
        panic!("expected spans");
    };
    assert_eq!(from_proto.len(), 1);
    assert_eq!(from_proto[0].record, from_json[0].record);
    assert_eq!(from_proto[0].record.service_name, "checkout");
    assert_eq!(from_proto[0].record.duration_nanos, 2_000_000);
}

#[tokio::test]
async fn logs_store_identically_from_either_wire_form() {
    let proto_store = Store::open_in_memory().unwrap();
    let json_store = Store::open_in_memory().unwrap();

    let proto = logs_request("checkout", vec![otlp_log(BASE_NANOS, "warn", "slow query")]);
    post(&proto_store, "/v1/logs", "application/x-protobuf", proto.encode_to_vec()).await;

    let body = json!({
        "resourceLogs": [{
            "resource": resource_json(),
            "scopeLogs": [{"logRecords": [{
                "timeUnixNano": BASE_NANOS.to_string(),
                "severityText": "warn",
                "body": {"stringValue": "slow query"},
                "attributes": [{"key": "peer", "value": {"stringValue": "redis:6379"}}],
                "traceId": TRACE_ID_HEX,
                "spanId": SPAN_ID_HEX
            }]}]
        }]
    });
    post(&json_store, "/v1/logs", "application/json", serde_json::to_vec(&body).unwrap()).await;

    let Listing::Logs(from_proto) = proto_store.list(RecordKind::Logs, Page::default()).unwrap()
    else {
        panic!("expected logs");
    };
    let Listing::Logs(from_json) = json_store.list(RecordKind::Logs, Page::default()).unwrap()
    else {
        panic!("expected logs");
    };
    assert_eq!(from_proto[0].record, from_json[0].record);
    assert_eq!(from_proto[0].record.level, "WARN");
}
