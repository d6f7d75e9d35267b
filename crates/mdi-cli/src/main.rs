use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mdi_client::{HtmlExtractor, HttpSession, OpenAiClient, SourceDiscoverer};
use mdi_core::annotate::{
    AnnotateConfig, AnnotationMachine, AnnotationRunner, CsvAnnotationSink, TracingReporter,
    load_documents, read_completed_ids,
};
use mdi_core::events::{event_windows, load_events};
use mdi_core::{CollectConfig, Collector, OutputFormat, RelevanceFilter, build_plans, write_records};

#[derive(Parser)]
#[command(
    name = "mdi",
    version,
    about = "Media Divergence Index: news collection and LLM stance annotation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect articles around rate decisions into a CSV or JSONL table
    Collect {
        /// Collection config (TOML)
        #[arg(short, long, env = "MDI_COLLECT_CONFIG")]
        config: PathBuf,

        /// Events table (CSV or spreadsheet with event_date_time, decision, new_rate)
        #[arg(short, long)]
        events: PathBuf,

        /// Output path; the extension selects the format (.csv, .jsonl or .parquet)
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Annotate documents with the LLM, resuming from existing output
    Annotate {
        /// Annotation config (TOML)
        #[arg(short, long, env = "MDI_ANNOTATE_CONFIG")]
        config: PathBuf,

        /// Override io.input_path
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Override io.output_path
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mdi=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            config,
            events,
            out,
        } => cmd_collect(&config, &events, &out).await,
        Commands::Annotate { config, input, out } => cmd_annotate(&config, input, out).await,
    }
}

async fn cmd_collect(config_path: &Path, events_path: &Path, out: &Path) -> Result<()> {
    // Reject an unsupported output type before any network work.
    OutputFormat::from_path(out)?;

    let config = CollectConfig::from_path(config_path)
        .with_context(|| format!("Failed to load collection config {}", config_path.display()))?;
    let relevance = RelevanceFilter::new(&config.relevance).context("Invalid relevance config")?;
    let plans = build_plans(&config).context("Invalid source config")?;

    let events = load_events(events_path)
        .with_context(|| format!("Failed to load events {}", events_path.display()))?;
    let windows = event_windows(&events, config.window_days);

    tracing::info!(
        events = events.len(),
        sources = plans.len(),
        "Starting collection"
    );

    let session = HttpSession::new(&config).context("Failed to create HTTP session")?;
    let collector = Collector::new(
        session.clone(),
        HtmlExtractor::new(),
        SourceDiscoverer::new(session),
        relevance,
        plans,
    );
    let records = collector.collect(&windows).await;

    write_records(out, &records)
        .with_context(|| format!("Failed to write records to {}", out.display()))?;

    tracing::info!(
        path = %out.display(),
        records = records.len(),
        relevant = records.iter().filter(|r| r.relevance).count(),
        "Collection complete"
    );
    Ok(())
}

async fn cmd_annotate(
    config_path: &Path,
    input: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut config = AnnotateConfig::from_path(config_path)
        .with_context(|| format!("Failed to load annotation config {}", config_path.display()))?;
    if let Some(input) = input {
        config.io.input_path = input;
    }
    if let Some(out) = out {
        config.io.output_path = out;
    }

    let llm = OpenAiClient::from_config(&config).context("Failed to create LLM client")?;
    let machine = AnnotationMachine::new(llm, config.request_policy(), config.max_retries)?;
    let runner = AnnotationRunner::new(machine, config.annotator_name.clone(), config.concurrency);

    let input_path = &config.io.input_path;
    let output_path = &config.io.output_path;
    let documents = load_documents(input_path, &config.io.columns, config.max_chars)
        .with_context(|| format!("Failed to load documents {}", input_path.display()))?;
    let completed = read_completed_ids(output_path)
        .with_context(|| format!("Failed to read existing output {}", output_path.display()))?;
    let mut sink = CsvAnnotationSink::open(output_path)
        .with_context(|| format!("Failed to open output {}", output_path.display()))?;

    tracing::info!(
        model = %config.model,
        documents = documents.len(),
        concurrency = config.concurrency,
        "Starting annotation"
    );

    let summary = runner
        .run(documents, &completed, &mut sink, &TracingReporter)
        .await
        .with_context(|| format!("Annotation aborted writing {}", output_path.display()))?;

    tracing::info!(
        total = summary.total,
        skipped = summary.skipped,
        ok = summary.ok,
        failed = summary.failed,
        crashed = summary.crashed,
        "Annotation complete"
    );
    Ok(())
}
