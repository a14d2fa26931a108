//! SpyGlass CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load the TOML pipeline configuration and
//!    validate it before anything else is constructed.
//! 2. **Wire observability**: configure `tracing-subscriber` with a JSON (or
//!    human) layer on stderr and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an
//!    OpenTelemetry OTLP exporter. All `tracing` spans and structured events
//!    emitted by every crate in the workspace flow through this layer.
//! 3. **Construct infrastructure**: create the chat-completions provider
//!    wrapped in its retry layer, plus the configured document stores, and
//!    inject them into `PipelineExecutor`.
//! 4. **Run once**: execute one pipeline for `--query`, write the run report
//!    as JSON, and exit non-zero unless the run succeeded. Ctrl-C cancels.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use document_store::{FanOutStore, HttpDocumentStore, JsonFileStore, DEFAULT_COLLECTION};
use llm::{ChatCompletionsProvider, RetryingGenerator};
use nodes::PipelineExecutor;
use opentelemetry::trace::TracerProvider as _;
use pipeline::{DocumentStore, GenerationPort, PipelineConfig, TrendCount};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "spyglass")]
#[command(about = "Market trend and startup opportunity analysis")]
#[command(version)]
struct Args {
    /// Market or topic to analyse.
    #[arg(short, long)]
    query: String,

    /// Number of trends to return (clamped to 1..=50; configured default when omitted).
    #[arg(short)]
    k: Option<i64>,

    /// Pipeline configuration file.
    #[arg(short, long, value_name = "PATH", default_value = "config/spyglass.toml")]
    config: PathBuf,

    /// Write the run report here instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Save the summary of a successful run as JSON in this directory.
    #[arg(long, value_name = "DIR")]
    results_dir: Option<PathBuf>,

    /// Base URL of a document indexing service for successful runs.
    #[arg(long, value_name = "URL")]
    index_url: Option<String>,

    /// Collection name used with `--index-url`.
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    collection: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let tracer_provider = init_tracing(args.log_format)?;

    let result = run(args).await;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }
    result
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args.config)?;

    let provider = ChatCompletionsProvider::from_env(&config.model)
        .context("failed to construct the generation provider")?;
    info!(model = %provider.model(), endpoint = provider.endpoint(), "generation provider ready");
    let port: Arc<dyn GenerationPort> =
        Arc::new(RetryingGenerator::from_settings(provider, &config.model));

    let mut executor = PipelineExecutor::new(config, port).context("invalid pipeline configuration")?;
    if let Some(store) = document_store(&args) {
        executor = executor.with_document_store(store);
    }

    let k = args.k.map(|requested| {
        let k = TrendCount::clamped(requested);
        if i64::from(k.as_u32()) != requested {
            warn!(requested, used = k.as_u32(), "k out of range, clamped");
        }
        k
    });

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        }
    });

    let outcome = executor.run(&args.query, k, cancel).await;
    executor.drain_hand_offs().await;

    let report = serde_json::to_string_pretty(&outcome.report())
        .context("failed to serialise run report")?;
    match &args.output {
        Some(path) => tokio::fs::write(path, report)
            .await
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{report}"),
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = PipelineConfig::from_toml_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}

/// Document stores selected on the command line, if any.
fn document_store(args: &Args) -> Option<Arc<dyn DocumentStore>> {
    let mut stores: Vec<Arc<dyn DocumentStore>> = Vec::new();
    if let Some(dir) = &args.results_dir {
        stores.push(Arc::new(JsonFileStore::new(dir)));
    }
    if let Some(url) = &args.index_url {
        stores.push(Arc::new(HttpDocumentStore::new(url, args.collection.clone())));
    }
    match stores.len() {
        0 => None,
        1 => stores.pop(),
        _ => Some(Arc::new(FanOutStore::new(stores))),
    }
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

/// Installs the global subscriber. Returns the OTLP tracer provider when one
/// was configured so it can be flushed on exit.
fn init_tracing(format: LogFormat) -> Result<Option<opentelemetry_sdk::trace::TracerProvider>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let tracer_provider = if std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_some() {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .build()
            .context("failed to build OTLP span exporter")?;
        Some(
            opentelemetry_sdk::trace::TracerProvider::builder()
                .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                .build(),
        )
    } else {
        None
    };
    let otel_layer = tracer_provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("spyglass")));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(tracer_provider)
}
