use clap::{Parser, Subcommand};
use invoice_extract::config::{Config, LlmBackend};
use invoice_extract::error::ExtractionError;
use invoice_extract::events::OutcomeSummary;
use invoice_extract::prompt::Prompt;
use invoice_extract::store::VerdictStore;
use invoice_extract::{
    ChatClient, ExtractionRequest, FieldExtractor, HeuristicModel, LanguageModel,
    RetryOrchestrator, ValidationEngine, ValidationVerdict,
};
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "invoice-extract", version, about = "Validate LLM invoice extractions against a schema")]
struct Cli {
    /// TOML config file; defaults apply when it does not exist
    #[arg(long, env = "INVOICE_EXTRACT_CONFIG", default_value = "invoice_extract.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract an invoice from OCR text with retries, and print the verdict
    Run {
        /// OCR text file ("-" or omitted for stdin)
        input: Option<PathBuf>,
        /// Override the configured backend (ollama, remote, heuristics)
        #[arg(long)]
        backend: Option<LlmBackend>,
        /// Persist the outcome in the verdict store
        #[arg(long)]
        store: bool,
    },
    /// Validate a single model completion without calling a model
    Check {
        /// Completion file ("-" or omitted for stdin)
        input: Option<PathBuf>,
    },
    /// Print verdict store statistics as JSON
    Stats,
    /// Print the prompt that would be sent for an OCR text
    Prompt {
        input: Option<PathBuf>,
    },
}

/// Exit code for a rejected verdict.
const REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // init tracing; stdout carries the JSON results
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;

    match cli.command {
        Command::Run {
            input,
            backend,
            store,
        } => run(&cfg, input.as_deref(), backend, store).await,
        Command::Check { input } => check(&cfg, input.as_deref()),
        Command::Stats => stats(&cfg),
        Command::Prompt { input } => {
            let text = read_input(input.as_deref())?;
            let prompt = Prompt::initial(&cfg.schema(), &text, &cfg.policy().prompt);
            println!("{}\n\n{}", prompt.system, prompt.user_message());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    cfg: &Config,
    input: Option<&Path>,
    backend: Option<LlmBackend>,
    persist: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let text = read_input(input)?;
    let schema = cfg.schema();
    let policy = cfg.policy();

    let mut llm = cfg.llm.clone();
    if let Some(backend) = backend {
        llm.backend = backend;
    }
    let model: Box<dyn LanguageModel> = match llm.backend {
        LlmBackend::Heuristics => Box::new(HeuristicModel),
        _ => {
            let client = ChatClient::from_config(&llm)?;
            client.ensure_reachable().await?;
            Box::new(client)
        }
    };

    let store = if persist {
        Some(open_store(cfg)?)
    } else {
        None
    };

    let request = ExtractionRequest::new(text);
    info!(
        request_id = %request.request_id,
        chars = request.ocr_text.len(),
        backend = ?llm.backend,
        budget = policy.retry.retry_budget,
        "Starting extraction"
    );

    let orchestrator = RetryOrchestrator::new(model.as_ref(), &schema, &policy);
    match orchestrator.run(&request).await {
        Ok(outcome) => {
            if let Some(store) = &store {
                store.save_outcome(&outcome)?;
            }
            let summary = OutcomeSummary::from_outcome(&outcome);
            let output = json!({
                "summary": summary,
                "verdict": outcome.final_verdict(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(exit_code(outcome.final_verdict()))
        }
        Err(err) => {
            let ExtractionError::Collaborator {
                request_id,
                completed,
                ..
            } = &err;
            if let Some(store) = &store {
                store.save_failure(request_id, &err.to_string(), completed)?;
            }
            Err(err.into())
        }
    }
}

fn check(cfg: &Config, input: Option<&Path>) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let completion = read_input(input)?;
    let schema = cfg.schema();

    let record = FieldExtractor::new(&schema).extract(&completion);
    let verdict = ValidationEngine::new(&schema, cfg.policy().validation).validate(record);
    info!(
        status = %verdict.status,
        errors = verdict.errors().count(),
        warnings = verdict.warning_count(),
        "Completion checked"
    );

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(exit_code(&verdict))
}

fn stats(cfg: &Config) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let store = open_store(cfg)?;
    let counts = store.get_counts()?;
    info!(
        requests = counts.requests,
        accepted = counts.accepted,
        accepted_with_warnings = counts.accepted_with_warnings,
        rejected = counts.rejected,
        failed = counts.failed,
        attempts = counts.attempts,
        "Verdict store statistics"
    );
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(ExitCode::SUCCESS)
}

fn open_store(cfg: &Config) -> Result<VerdictStore, Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(&cfg.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(VerdictStore::new(&cfg.db_path)?)
}

fn exit_code(verdict: &ValidationVerdict) -> ExitCode {
    if verdict.is_rejected() {
        ExitCode::from(REJECTED)
    } else {
        ExitCode::SUCCESS
    }
}

fn read_input(path: Option<&Path>) -> std::io::Result<String> {
    match path {
        Some(p) if p != Path::new("-") => std::fs::read_to_string(p),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}
