use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

mod catalog;
mod evaluation;
mod logging;
mod metrics;
mod models;
mod output;
mod provider;
mod runner;
mod store;

use crate::catalog::{matches_id_pattern, Catalog, TestCase};
use crate::models::Category;
use crate::output::OutputFormat;
use crate::provider::ProviderKind;
use crate::runner::Runner;
use crate::store::TranscriptStore;

/// Run LLM test campaigns against a generation provider and aggregate
/// the results into category metrics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML test case catalog
    #[arg(short, long)]
    catalog: Option<PathBuf>,

    /// Directory for transcripts and metrics summaries
    #[arg(short, long)]
    output: PathBuf,

    /// Generation provider to run against
    #[arg(short, long)]
    provider: Option<ProviderKind>,

    /// Path to the provider's JSON configuration file
    #[arg(long)]
    provider_config: Option<PathBuf>,

    /// Only run test cases whose ID matches this pattern (* and ? wildcards)
    #[arg(short, long)]
    filter: Option<String>,

    /// Only run test cases in this category
    #[arg(long)]
    category: Option<Category>,

    /// Only run test cases with this subcategory
    #[arg(long)]
    subcategory: Option<String>,

    /// Only run test cases carrying at least one of these tags
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Output format: plain or json
    #[arg(long, default_value = "plain")]
    format: OutputFormat,

    /// Verbose output - show progress for each generation request
    #[arg(short, long)]
    verbose: bool,

    /// Skip execution and recompute metrics from existing transcripts
    #[arg(long)]
    metrics_only: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match run(&args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("{} execution(s) failed", failed);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Execute the selected mode; returns the number of failed executions
async fn run(args: &Args) -> Result<usize> {
    if args.metrics_only {
        report_metrics(args)?;
        return Ok(0);
    }

    let catalog_path = args
        .catalog
        .as_ref()
        .context("--catalog is required unless --metrics-only is set")?;
    let provider_kind = args
        .provider
        .context("--provider is required unless --metrics-only is set")?;

    let catalog = Catalog::from_file(catalog_path)?;
    let selected = select_test_cases(&catalog, args);
    if selected.is_empty() {
        bail!("No test cases matched the given filters");
    }
    info!(
        test_cases = selected.len(),
        catalog = %catalog_path.display(),
        "starting test campaign"
    );

    let provider = provider::build_provider(provider_kind, args.provider_config.as_deref())?;
    let store = TranscriptStore::create(&args.output)?;
    let mut runner = Runner::new(provider, store);

    let config = catalog.execution_config.clone().unwrap_or_default();
    let summary = runner.run_test_cases(&selected, &config).await;

    info!(
        transcript = %runner.transcript_path().display(),
        total = summary.total_executions,
        successful = summary.successful,
        failed = summary.failed,
        "test campaign complete"
    );

    // Aggregate across every run in the output directory, this one included
    report_metrics(args)?;

    Ok(summary.failed)
}

/// Apply category, subcategory, tag, and ID pattern filters to the catalog
fn select_test_cases(catalog: &Catalog, args: &Args) -> Vec<TestCase> {
    let tags = if args.tags.is_empty() {
        None
    } else {
        Some(args.tags.as_slice())
    };

    catalog
        .filter(args.category, args.subcategory.as_deref(), tags)
        .into_iter()
        .filter(|tc| {
            args.filter
                .as_deref()
                .map_or(true, |pattern| matches_id_pattern(&tc.id, pattern))
        })
        .cloned()
        .collect()
}

/// Recompute metrics from all transcripts, persist the summary, and print it
fn report_metrics(args: &Args) -> Result<()> {
    let outcome = metrics::compute_from_dir(&args.output);
    let summary_path = store::write_metrics_summary(&outcome, &args.output)?;
    info!(summary = %summary_path.display(), "wrote metrics summary");
    output::print_metrics(&outcome, args.format);
    Ok(())
}
