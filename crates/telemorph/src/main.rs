mod api;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use telemorph_core::config::{Config, LogFormat};
use telemorph_ingest::{IngestAddrs, Pipeline, PipelineConfig, run_ingest_servers};
use telemorph_query::Registry;
use telemorph_store::{Store, run_retention_loop};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span};

#[derive(Parser, Debug)]
#[command(name = "telemorph")]
#[command(about = "OpenTelemetry ingest, storage and PromQL-style query service", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the OTLP ingest servers and the query API")]
    Run {
        #[arg(long, help = "Path to a TOML config file")]
        config: Option<PathBuf>,
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        otlp_grpc_addr: Option<String>,
        #[arg(long)]
        otlp_http_addr: Option<String>,
        #[arg(long)]
        api_addr: Option<String>,
        #[arg(long)]
        retention_days: Option<u32>,
        #[arg(long, help = "compact or json")]
        log_format: Option<LogFormat>,
    },
    #[command(about = "List the query functions the evaluator supports")]
    Functions {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            db_path,
            otlp_grpc_addr,
            otlp_http_addr,
            api_addr,
            retention_days,
            log_format,
        } => {
            let mut cfg = Config::load(config.as_deref()).context("load config")?;
            if let Some(v) = db_path {
                cfg.db_path = v;
            }
            if let Some(v) = otlp_grpc_addr {
                cfg.otlp_grpc_addr = v;
            }
            if let Some(v) = otlp_http_addr {
                cfg.otlp_http_addr = v;
            }
            if let Some(v) = api_addr {
                cfg.api_addr = v;
            }
            if let Some(v) = retention_days {
                cfg.retention_days = v;
            }
            if let Some(v) = log_format {
                cfg.log_format = v;
            }
            cfg.validate().context("invalid configuration")?;
            run_server(cfg).await
        }
        Commands::Functions { json } => print_functions(json),
    }
}

async fn run_server(cfg: Config) -> anyhow::Result<()> {
    let _telemetry = telemetry::init(cfg.log_format);
    let root = info_span!("telemorph");

    let store = Store::open(&cfg.db_path)
        .with_context(|| format!("open store at {}", cfg.db_path.display()))?;
    info!(
        parent: &root,
        db = %cfg.db_path.display(),
        retention_days = cfg.retention_days,
        "store opened"
    );

    let addrs = IngestAddrs {
        grpc: cfg
            .grpc_enabled
            .then(|| parse_addr("otlp_grpc_addr", &cfg.otlp_grpc_addr))
            .transpose()?,
        http: cfg
            .http_enabled
            .then(|| parse_addr("otlp_http_addr", &cfg.otlp_http_addr))
            .transpose()?,
    };
    let api_addr = parse_addr("api_addr", &cfg.api_addr)?;

    let shutdown = CancellationToken::new();
    let pipeline = Pipeline::new(
        store.clone(),
        PipelineConfig::from(&cfg),
        info_span!(parent: &root, "pipeline"),
    );

    let ingest_task = tokio::spawn(run_ingest_servers(
        pipeline,
        addrs,
        info_span!(parent: &root, "ingest"),
        shutdown.clone(),
    ));

    let api_state = api::ApiState::new(store.clone(), cfg.query_timeout, &root);
    let listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("bind query api on {api_addr}"))?;
    info!(parent: &root, addr = %api_addr, "query api listening");
    let api_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, api::router(api_state))
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
    });

    let retention_task = tokio::spawn(run_retention_loop(
        store,
        cfg.retention(),
        cfg.retention_interval,
        info_span!(parent: &root, "retention"),
    ));

    let outcome = tokio::select! {
        res = ingest_task => res.context("ingest task panicked")?.context("ingest servers failed"),
        res = api_task => res
            .context("query api task panicked")?
            .context("query api failed"),
        _ = tokio::signal::ctrl_c() => {
            info!(parent: &root, "received ctrl-c, shutting down");
            Ok(())
        }
    };

    shutdown.cancel();
    retention_task.abort();
    outcome
}

fn parse_addr(key: &str, value: &str) -> anyhow::Result<SocketAddr> {
    value
        .parse()
        .with_context(|| format!("invalid {key}: {value}"))
}

fn print_functions(json: bool) -> anyhow::Result<()> {
    let functions = Registry::builtin().list();
    if json {
        println!("{}", serde_json::to_string_pretty(&functions)?);
        return Ok(());
    }
    for f in functions {
        let args = f
            .args
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let kind = if f.aggregation { " [aggregation]" } else { "" };
        println!(
            "{:<10} ({args}) -> {}{kind}  {}",
            f.name,
            f.returns.as_str(),
            f.description
        );
    }
    Ok(())
}
