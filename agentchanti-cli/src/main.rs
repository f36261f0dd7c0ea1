//! # AgentChanti CLI
//!
//! Runs the plan -> code -> review -> test pipeline against a local model
//! server.
//!
//! Usage:
//!   agentchanti [OPTIONS] <task>...
//!
//! Examples:
//!   agentchanti "write a function that adds two numbers"
//!   agentchanti --provider lm_studio --model qwen2.5-coder-7b-instruct "parse a CSV file"
//!   agentchanti --max-retries 5 --test-command "pytest -q" "implement a stack class"
//!
//! Exit codes: 0 done, 1 retry budget exhausted, 2 aborted or bad
//! configuration, 130 interrupted.

mod settings;

use agentchanti_agent::{
    CancellationToken, CommandTestRunner, Orchestrator, OrchestratorConfig, RunReport, Task,
    Verdict,
};
use agentchanti_llm::{LocalProvider, ProviderConfig, ProviderKind, Result};
use clap::Parser;
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code for invalid configuration and fatal aborts
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "agentchanti")]
#[command(author, version, about = "AgentChanti - plan, code, review and test with local LLMs")]
struct Cli {
    /// Task description
    #[arg(trailing_var_arg = true, required = true)]
    task: Vec<String>,

    /// Model server: ollama or lm_studio
    #[arg(short, long, default_value = "ollama")]
    provider: String,

    /// Model name (default: $DEFAULT_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum Coder re-invocations after review/test failures
    #[arg(long)]
    max_retries: Option<usize>,

    /// Directory generated files are written to
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Command that runs the tests inside the workspace
    #[arg(long)]
    test_command: Option<String>,

    /// Do not ask the model for tests when the code ships none
    #[arg(long)]
    no_generate_tests: bool,

    /// Go straight from coding to testing
    #[arg(long)]
    skip_review: bool,

    /// Revise code through chunk edits instead of whole-file rewrites
    #[arg(long)]
    chunk_edits: bool,

    /// LLM request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors on stderr
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(report) => {
            let code = report.exit_code();
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        Err(err) => {
            eprintln!("error: {}", err);
            debug!("{:?}", err);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "agentchanti=debug"
    } else if quiet {
        "agentchanti=warn"
    } else {
        "agentchanti=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Build configuration, run the pipeline and print the outcome
async fn run(cli: Cli) -> Result<RunReport> {
    let settings = Settings::from_env()?;
    let task = Task::new(cli.task.join(" "))?;

    let provider_config = provider_config(&cli, &settings)?;
    let config = orchestrator_config(&cli, &settings);
    config.validate()?;

    debug!(
        provider = %provider_config.kind,
        base_url = %provider_config.base_url,
        model = %provider_config.model,
        workspace = %config.workspace_dir.display(),
        "configuration loaded"
    );

    let provider = LocalProvider::from_config(provider_config)?;
    let runner = CommandTestRunner::new(config.test_command.clone(), config.test_timeout);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current call is dropped");
            interrupt.cancel();
        }
    });

    let workspace = config.workspace_dir.clone();
    let mut orchestrator = Orchestrator::new(provider, runner, config).with_cancellation(cancel);
    let report = orchestrator.run(task).await;

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("error: failed to serialize report: {}", e),
        }
    } else {
        print_report(&report, &workspace);
    }

    Ok(report)
}

/// Flags over environment, validated
fn provider_config(cli: &Cli, settings: &Settings) -> Result<ProviderConfig> {
    let kind: ProviderKind = cli.provider.parse()?;
    let mut config = ProviderConfig::new(kind)
        .with_base_url(settings.base_url(kind))
        .with_model(cli.model.clone().unwrap_or_else(|| settings.model.clone()));
    if let Some(timeout) = cli.timeout.map(Duration::from_secs).or(settings.timeout) {
        config = config.with_timeout(timeout);
    }
    config.validate()?;
    Ok(config)
}

fn orchestrator_config(cli: &Cli, settings: &Settings) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    if let Some(max_retries) = cli.max_retries.or(settings.max_retries) {
        config = config.with_max_retries(max_retries);
    }
    if let Some(dir) = cli.workspace.clone().or_else(|| settings.workspace.clone()) {
        config = config.with_workspace_dir(dir);
    }
    if let Some(command) = cli.test_command.clone().or_else(|| settings.test_command.clone()) {
        config = config.with_test_command(command);
    }
    config
        .with_generate_tests(!cli.no_generate_tests)
        .with_skip_review(cli.skip_review)
        .with_chunk_edits(cli.chunk_edits)
}

fn print_report(report: &RunReport, workspace: &std::path::Path) {
    if let Some(plan) = &report.plan {
        println!("Plan:\n{}\n", plan.render());
    }

    if let Some(artifact) = &report.artifact {
        println!("Files (version {}) in {}:", artifact.version(), workspace.display());
        for name in artifact.file_names() {
            println!("  {}", name);
        }
        for name in &report.generated_tests {
            if artifact.get(name).is_none() {
                println!("  {} (generated test)", name);
            }
        }
        println!();
    }

    if let Some(review) = &report.review {
        match review.verdict {
            Verdict::Pass => println!("Review: pass"),
            Verdict::Fail => {
                println!("Review: fail ({} findings)", review.findings.len());
                for finding in &review.findings {
                    println!("  {} {}", finding.severity.marker(), finding.text);
                }
            }
        }
    }

    if let Some(test) = &report.test {
        match (test.verdict, test.timed_out) {
            (Verdict::Pass, _) => println!("Tests: pass"),
            (Verdict::Fail, true) => println!("Tests: timed out"),
            (Verdict::Fail, false) => println!(
                "Tests: fail (exit code {})",
                test.exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
            ),
        }
        if !test.verdict.is_pass() && !test.output.is_empty() {
            println!("{}", tail_lines(&test.output, 20));
        }
    }

    println!(
        "\nResult: {} after {} retr{} ({} LLM calls, {} tokens)",
        report.outcome,
        report.retries,
        if report.retries == 1 { "y" } else { "ies" },
        report.usage.total_calls,
        report.usage.total_tokens()
    );

    if let Some(failure) = &report.failure {
        let stage = failure.stage.as_deref().unwrap_or("-");
        match &failure.cause {
            Some(cause) => println!("Failure: {} in {}: {} ({})", failure.kind, stage, failure.message, cause),
            None => println!("Failure: {} in {}: {}", failure.kind, stage, failure.message),
        }
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
