use std::net::SocketAddr;

use telemorph_core::error::{Result, TelemorphError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, info_span};

use crate::ingestor::Ingestor;
use crate::otlp::grpc::GrpcIngest;
use crate::otlp::http;
use crate::pipeline::Pipeline;

/// Listen addresses; `None` disables that transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestAddrs {
    pub grpc: Option<SocketAddr>,
    pub http: Option<SocketAddr>,
}

/// Serves OTLP over gRPC and HTTP until `shutdown` fires or a server fails.
pub async fn run_ingest_servers(
    pipeline: Pipeline,
    addrs: IngestAddrs,
    span: tracing::Span,
    shutdown: CancellationToken,
) -> Result<()> {
    let ingestor = Ingestor::new(pipeline, info_span!(parent: &span, "ingestor"));
    let mut tasks = JoinSet::new();

    if let Some(grpc_addr) = addrs.grpc {
        let grpc = GrpcIngest::new(ingestor.clone());
        let shutdown = shutdown.clone();
        info!(parent: &span, addr = %grpc_addr, "otlp grpc listening");
        tasks.spawn(async move {
            Server::builder()
                .add_service(grpc.logs_service())
                .add_service(grpc.traces_service())
                .add_service(grpc.metrics_service())
                .serve_with_shutdown(grpc_addr, shutdown.cancelled_owned())
                .await
                .map_err(|e| TelemorphError::Io(format!("gRPC server failed: {e}")))
        });
    }

    if let Some(http_addr) = addrs.http {
        let http_router = http::router(ingestor.clone());
        let shutdown = shutdown.clone();
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| TelemorphError::Io(format!("failed to bind {http_addr}: {e}")))?;
        info!(parent: &span, addr = %http_addr, "otlp http listening");
        tasks.spawn(async move {
            axum::serve(listener, http_router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .map_err(|e| TelemorphError::Io(format!("HTTP server failed: {e}")))
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.map_err(|e| TelemorphError::Internal(format!("ingest task join failed: {e}")))??;
    }
    Ok(())
}
