use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use companyresearch_agents::Pipeline;
use companyresearch_core::{
    ConfigLoader, HandoffMessage, RunLogInput, RunLogSettings, TelemetryOptions, TraceEvent,
    init_telemetry, log_run_completion, metrics, persist_trace, render_trace,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "companyresearch",
    version,
    about = "Research a company and write a markdown report"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research one company and write its report.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Company to research (prompted for when omitted).
    #[arg(long)]
    company: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(long, env = "COMPANYRESEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory reports are written to (overrides `output.dir`).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Persist the handoff trace as JSON into this directory.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Session ID used for logs and traces (random UUID when omitted).
    #[arg(long)]
    session: Option<String>,
}

fn main() -> ExitCode {
    // A missing .env is fine; variables may come from the shell.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match execute(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<bool> {
    match cli.command {
        Command::Run(args) => run_command(args),
    }
}

fn run_command(args: RunArgs) -> Result<bool> {
    let mut config = ConfigLoader::load(args.config.clone())?;
    if let Some(dir) = args.output_dir.clone() {
        config.output.dir = dir;
    }

    init_telemetry(TelemetryOptions {
        default_level: config.logging.level.clone(),
        ..TelemetryOptions::default()
    })?;
    metrics::init_metrics_from_env("companyresearch-cli")?;

    let company = match args.company {
        Some(company) => company,
        None => prompt_company()?,
    };
    let session_id = args
        .session
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let pipeline = Pipeline::from_config(&config)?;

    info!(%session_id, company = %company.trim(), "starting company research");
    let rt = Runtime::new()?;
    let outcome = rt.block_on(pipeline.run(&company))?;

    let trace = trace_events(&outcome);
    let trace_path = match &args.trace_dir {
        Some(dir) => match persist_trace(dir, &session_id, &trace) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(error = %err, "failed to persist trace");
                None
            }
        },
        None => None,
    };

    let log_input = RunLogInput {
        session_id: session_id.clone(),
        company: company.trim().to_string(),
        status: outcome.status.to_string(),
        file_path: outcome
            .file_path
            .as_ref()
            .map(|path| path.display().to_string()),
        error: outcome.error.clone(),
        sources: research_sources(&outcome),
        trace_path: trace_path.map(|path| path.display().to_string()),
    };
    if let Err(err) = log_run_completion(&RunLogSettings::from_config(&config.logging), log_input)
    {
        warn!(error = %err, "failed to record run log");
    }

    if !outcome.is_completed() {
        println!("Workflow did not complete successfully.");
        if let Some(error) = &outcome.error {
            println!("Error: {error}");
        }
        eprint!("{}", render_trace(&trace));
        return Ok(false);
    }

    println!("Research report successfully created!");
    if let Some(path) = &outcome.file_path {
        println!("Report file: {}", path.display());
    }
    Ok(true)
}

fn prompt_company() -> Result<String> {
    print!("Enter a company name to research: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read company name from stdin")?;
    Ok(line.trim().to_string())
}

fn trace_events(message: &HandoffMessage) -> Vec<TraceEvent> {
    message
        .meta
        .get("trace")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

fn research_sources(message: &HandoffMessage) -> Vec<String> {
    message
        .payload_object("research")
        .and_then(|research| research.get("sources"))
        .and_then(|sources| serde_json::from_value(sources.clone()).ok())
        .unwrap_or_default()
}
