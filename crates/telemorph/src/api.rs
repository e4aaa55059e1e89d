use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use telemorph_core::error::{Result, TelemorphError};
use telemorph_core::model::RecordKind;
use telemorph_core::query::{
    ListResponse, MetricsQueryRequest, Page, QueryRequest, QueryType, ServicesResponse,
};
use telemorph_query::{FunctionSpec, PromResponse, QueryEngine, WindowSpec};
use telemorph_store::{Listing, Store};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{Level, info_span};

#[derive(Clone)]
pub struct ApiState {
    store: Store,
    engine: QueryEngine,
    query_timeout: Duration,
}

impl ApiState {
    pub fn new(store: Store, query_timeout: Duration, span: &tracing::Span) -> Self {
        let engine = QueryEngine::new(
            Arc::new(store.clone()),
            info_span!(parent: span, "query"),
        );
        Self {
            store,
            engine,
            query_timeout,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/query", post(query))
        .route("/api/v1/query/metrics", post(query_metrics))
        .route("/api/v1/query/functions", get(functions))
        .route("/api/v1/query/metric_names", get(metric_names))
        .route("/api/v1/query/labels", get(labels))
        .route("/api/v1/metrics", get(list_metrics))
        .route("/api/v1/traces", get(list_traces))
        .route("/api/v1/logs", get(list_logs))
        .route("/api/v1/services", get(services))
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

pub struct ApiError(TelemorphError);

impl From<TelemorphError> for ApiError {
    fn from(value: TelemorphError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            TelemorphError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "api request failed");
        }
        (status, Json(PromResponse::error(&self.0))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// `{status: "success", data}` envelope for metadata endpoints.
#[derive(Debug, Serialize)]
struct DataResponse<T> {
    status: &'static str,
    data: T,
}

impl<T> DataResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            status: "success",
            data,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LabelsParams {
    metric: Option<String>,
}

/// Runs `work` on the blocking pool. The token it receives is cancelled when
/// the request is dropped or the query timeout elapses.
async fn run_blocking<T, F>(timeout: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let token = cancel.clone();
    let task = tokio::task::spawn_blocking(move || work(&token));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(TelemorphError::Internal(format!("query task failed: {err}"))),
        Err(_) => {
            cancel.cancel();
            Err(TelemorphError::Cancelled)
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn query(State(state): State<ApiState>, Json(req): Json<QueryRequest>) -> ApiResult<Response> {
    let page = Page::new(req.limit, req.offset);
    let kind = match req.query_type {
        QueryType::Promql => {
            let text = req
                .query
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .ok_or_else(|| TelemorphError::InvalidArgument("query is required".to_string()))?;
            let window = WindowSpec {
                start: req.start.as_deref(),
                end: req.end.as_deref(),
                time_range: req.time_range.as_deref(),
                step: req.step.as_deref(),
            };
            return evaluate(&state, text.to_string(), window).await.map(IntoResponse::into_response);
        }
        QueryType::Metrics => RecordKind::Metrics,
        QueryType::Traces => RecordKind::Traces,
        QueryType::Logs => RecordKind::Logs,
        QueryType::Logql => {
            return Err(TelemorphError::UnsupportedOperation("logql queries".to_string()).into());
        }
        QueryType::Traceql => {
            return Err(TelemorphError::UnsupportedOperation("traceql queries".to_string()).into());
        }
    };
    list(&state, kind, page).await
}

async fn query_metrics(
    State(state): State<ApiState>,
    Json(req): Json<MetricsQueryRequest>,
) -> ApiResult<Json<PromResponse>> {
    let window = WindowSpec {
        start: req.start_time.as_deref(),
        end: req.end_time.as_deref(),
        time_range: req.time_range.as_deref(),
        step: req.step.as_deref(),
    };
    evaluate(&state, req.query.clone(), window).await
}

async fn evaluate(state: &ApiState, text: String, window: WindowSpec<'_>) -> ApiResult<Json<PromResponse>> {
    let window = window.resolve(Utc::now())?;
    let engine = state.engine.clone();
    let result = run_blocking(state.query_timeout, move |cancel| {
        engine.execute(&text, window, cancel)
    })
    .await?;
    Ok(Json(PromResponse::success(&result)))
}

async fn list(state: &ApiState, kind: RecordKind, page: Page) -> ApiResult<Response> {
    let store = state.store.clone();
    let (listing, total) =
        run_blocking(state.query_timeout, move |_| store.list_with_total(kind, page)).await?;
    let response = match listing {
        Listing::Metrics(data) => Json(ListResponse {
            data,
            total,
            limit: page.limit,
            offset: page.offset,
        })
        .into_response(),
        Listing::Traces(data) => Json(ListResponse {
            data,
            total,
            limit: page.limit,
            offset: page.offset,
        })
        .into_response(),
        Listing::Logs(data) => Json(ListResponse {
            data,
            total,
            limit: page.limit,
            offset: page.offset,
        })
        .into_response(),
    };
    Ok(response)
}

async fn list_metrics(State(state): State<ApiState>, Query(params): Query<PageParams>) -> ApiResult<Response> {
    list(&state, RecordKind::Metrics, Page::new(params.limit, params.offset)).await
}

async fn list_traces(State(state): State<ApiState>, Query(params): Query<PageParams>) -> ApiResult<Response> {
    list(&state, RecordKind::Traces, Page::new(params.limit, params.offset)).await
}

async fn list_logs(State(state): State<ApiState>, Query(params): Query<PageParams>) -> ApiResult<Response> {
    list(&state, RecordKind::Logs, Page::new(params.limit, params.offset)).await
}

async fn services(State(state): State<ApiState>) -> ApiResult<Json<ServicesResponse>> {
    let store = state.store.clone();
    let services = run_blocking(state.query_timeout, move |_| store.distinct_service_names()).await?;
    Ok(Json(ServicesResponse { services }))
}

async fn functions(State(state): State<ApiState>) -> Json<DataResponse<Vec<FunctionSpec>>> {
    DataResponse::success(state.engine.registry().list())
}

async fn metric_names(State(state): State<ApiState>) -> ApiResult<Json<DataResponse<Vec<String>>>> {
    let store = state.store.clone();
    let names = run_blocking(state.query_timeout, move |_| store.distinct_metric_names()).await?;
    Ok(DataResponse::success(names))
}

async fn labels(
    State(state): State<ApiState>,
    Query(params): Query<LabelsParams>,
) -> ApiResult<Response> {
    let metric = params
        .metric
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| TelemorphError::InvalidArgument("metric is required".to_string()))?;
    let store = state.store.clone();
    let values = run_blocking(state.query_timeout, move |_| store.metric_label_values(&metric)).await?;
    Ok(DataResponse::success(values).into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use telemorph_core::model::Record;
    use telemorph_testkit::{base_time, sample_log, sample_metric, sample_span};
    use tower::ServiceExt;

    use super::*;

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_all(&[
                Record::Metric(sample_metric("http_requests_total", &[("route", "/a")], 0, 10.0)),
                Record::Metric(sample_metric("http_requests_total", &[("route", "/a")], 10, 30.0)),
                Record::Metric(sample_metric("http_requests_total", &[("route", "/b")], 10, 4.0)),
                Record::Span(sample_span("00f067aa0ba902b7", None)),
                Record::Log(sample_log("connection refused")),
            ])
            .unwrap();
        store
    }

    fn app(store: Store) -> Router {
        router(ApiState::new(store, Duration::from_secs(5), &tracing::Span::none()))
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn window() -> (String, String) {
        (
            (base_time() - chrono::Duration::minutes(5)).to_rfc3339(),
            (base_time() + chrono::Duration::minutes(5)).to_rfc3339(),
        )
    }

    #[tokio::test]
    async fn promql_sum_by_route() {
        let (start, end) = window();
        let (status, body) = call(
            app(seeded()),
            post_json(
                "/api/v1/query",
                json!({"type": "promql", "query": "sum(http_requests_total) by (route)", "start": start, "end": end}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["resultType"], "vector");
        let result = body["data"]["result"].as_array().unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0]["metric"]["route"], "/a");
        assert_eq!(result[0]["values"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn metrics_endpoint_computes_rate() {
        let (start, end) = window();
        let (status, body) = call(
            app(seeded()),
            post_json(
                "/api/v1/query/metrics",
                json!({"query": "rate(http_requests_total{route=\"/a\"}[15s])", "start_time": start, "end_time": end}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let values = &body["data"]["result"][0]["values"];
        assert_eq!(values[0][1], 2.0);
    }

    #[tokio::test]
    async fn client_errors_are_400_with_error_body() {
        for query in ["bogus(x[1m])", "sum(", "x{a!=\"b\"}"] {
            let (status, body) = call(
                app(seeded()),
                post_json("/api/v1/query", json!({"type": "promql", "query": query})),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{query}");
            assert_eq!(body["status"], "error");
            assert!(body["error"].is_string());
        }

        let (status, _) = call(app(seeded()), post_json("/api/v1/query", json!({"type": "logql", "query": "{}"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(app(seeded()), post_json("/api/v1/query", json!({"type": "promql"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listings_report_totals() {
        let (status, body) = call(app(seeded()), get("/api/v1/metrics?limit=2&offset=0")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["limit"], 2);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, body) = call(
            app(seeded()),
            post_json("/api/v1/query", json!({"type": "logs", "limit": 10})),
        )
        .await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"][0]["message"], "connection refused");

        let (_, body) = call(app(seeded()), get("/api/v1/traces?limit=-4")).await;
        assert_eq!(body["limit"], 0);
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn metadata_endpoints() {
        let (_, body) = call(app(seeded()), get("/api/v1/services")).await;
        assert_eq!(body, json!({"services": ["api"]}));

        let (_, body) = call(app(seeded()), get("/api/v1/query/metric_names")).await;
        assert_eq!(body, json!({"status": "success", "data": ["http_requests_total"]}));

        let (_, body) = call(app(seeded()), get("/api/v1/query/labels?metric=http_requests_total")).await;
        assert_eq!(body["data"]["route"], json!(["/a", "/b"]));

        let (status, _) = call(app(seeded()), get("/api/v1/query/labels")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(app(seeded()), get("/api/v1/query/functions")).await;
        let names: Vec<_> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"rate".to_string()));
        assert!(names.contains(&"time".to_string()));
    }

    #[tokio::test]
    async fn slow_work_times_out_as_cancelled() {
        let result = run_blocking(Duration::from_millis(10), |cancel| {
            let cancel = cancel.clone();
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(TelemorphError::Cancelled)));
    }
}
