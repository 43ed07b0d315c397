use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tumorboard::app::AppState;
use tumorboard::model::{BatchExitPolicy, Config, VariantRequest};
use tumorboard::service::CancellationToken;
use tumorboard::service::batch::{BatchSummary, load_batch_requests, write_artifact};
use tumorboard::service::report::{AssessmentReport, BatchReport, ValidationSummaryReport};
use tumorboard::service::validation::load_gold_standard;

const DEFAULT_BATCH_OUTPUT: &str = "batch_results.json";

#[derive(Debug, Parser)]
#[command(
    name = "tumorboard",
    version,
    about = "LLM-backed actionability assessment of cancer variants"
)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Model identifier, overrides configuration
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Assess a single variant
    Assess {
        /// Gene symbol (e.g., BRAF)
        gene: String,
        /// Variant notation (e.g., V600E)
        variant: String,
        /// Tumor type (e.g., Melanoma)
        #[arg(short, long)]
        tumor: String,
        /// Write the assessment record as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Assess every variant of a JSON input file
    Batch {
        /// JSON array of {gene, variant, tumor_type}
        input: PathBuf,
        #[arg(short, long, default_value = DEFAULT_BATCH_OUTPUT)]
        output: PathBuf,
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Fail unless every item was assessed
        #[arg(long)]
        strict: bool,
    },

    /// Assess a gold standard and report accuracy metrics
    Validate {
        /// Gold standard JSON file
        gold: PathBuf,
        /// Write the validation report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present (ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env();
    if let Some(model) = cli.model {
        config.model = model;
    }
    match &cli.command {
        Command::Batch {
            max_concurrent: Some(n),
            ..
        }
        | Command::Validate {
            max_concurrent: Some(n),
            ..
        } => config.max_concurrent = (*n).max(1),
        _ => {}
    }
    if let Command::Batch { strict: true, .. } = &cli.command {
        config.batch_exit_policy = BatchExitPolicy::AllSucceeded;
    }

    let state = AppState::new(config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling outstanding assessments");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Assess {
            gene,
            variant,
            tumor,
            output,
        } => assess(&state, VariantRequest::new(gene, variant, tumor), output, &cancel).await,
        Command::Batch { input, output, .. } => batch(&state, &input, &output, &cancel).await,
        Command::Validate { gold, output, .. } => {
            validate(&state, &gold, output.as_deref(), &cancel).await
        }
    }
}

async fn assess(
    state: &AppState,
    request: VariantRequest,
    output: Option<PathBuf>,
    cancel: &CancellationToken,
) -> anyhow::Result<ExitCode> {
    let result = tokio::select! {
        _ = cancel.cancelled() => {
            eprintln!("Assessment of {request} cancelled");
            return Ok(ExitCode::FAILURE);
        }
        result = state.orchestrator.assess(&request) => result,
    };

    let record = match result {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "Assessment failed");
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("{}", AssessmentReport(&record));

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nAssessment saved to {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}

async fn batch(
    state: &AppState,
    input: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<ExitCode> {
    let requests = load_batch_requests(input)?;
    let outcomes = state.batch_runner.run(requests, cancel).await;

    write_artifact(output, &outcomes)?;

    let summary = BatchSummary::from_outcomes(&outcomes);
    println!("{}", BatchReport(&summary));
    println!("\nResults saved to {}", output.display());

    if summary.is_success(state.config.batch_exit_policy) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn validate(
    state: &AppState,
    gold: &Path,
    output: Option<&Path>,
    cancel: &CancellationToken,
) -> anyhow::Result<ExitCode> {
    let cases = load_gold_standard(gold)?;
    let (report, _) = state.validation_engine.validate(&cases, cancel).await?;

    println!("{}", ValidationSummaryReport(&report));

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nValidation report saved to {}", path.display());
    }

    if cancel.is_cancelled() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
