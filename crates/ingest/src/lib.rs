pub mod ingestor;
pub mod otlp;
pub mod pipeline;
pub mod server;

pub use ingestor::{IngestOutcome, Ingestor, Rejections};
pub use pipeline::{Pipeline, PipelineConfig};
pub use server::{IngestAddrs, run_ingest_servers};
