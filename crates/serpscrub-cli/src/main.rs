use anyhow::{Context, Result};
use clap::Parser;
use serpscrub::{Pipeline, PipelineError, RunReport};
use serpscrub_local::{DecisionClient, ReasonerClient, SearxngResultSource, StdoutSink};
use std::io::{BufRead, Write};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "serpscrub")]
#[command(about = "Search, classify ads with a reasoning model, and scrub them from the result view", long_about = None)]
struct Cli {
    /// Run a single query and exit; without it, queries are read interactively.
    #[arg(short, long)]
    query: Option<String>,

    /// Maximum number of results to fetch per query (capped at 20).
    #[arg(long, default_value_t = 10)]
    max_results: usize,

    /// Override the reasoning model (default: SERPSCRUB_REASONER_MODEL or deepseek-reasoner).
    #[arg(long)]
    reasoner_model: Option<String>,

    /// Override the decision model (default: SERPSCRUB_DECISION_MODEL or deepseek-chat).
    #[arg(long)]
    decision_model: Option<String>,
}

type LocalPipeline = Pipeline<SearxngResultSource, ReasonerClient, DecisionClient, StdoutSink>;

fn print_report(pipeline: &LocalPipeline, report: &RunReport) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "removed {} of {} results",
        report.removed.len(),
        report.result_set.len()
    );
    for index in &report.removed {
        if let Some(r) = report.result_set.results.get(*index) {
            let _ = writeln!(out, "  - [{}] {}: {}", r.index, r.source, r.description);
        }
    }
    for f in &report.removal_failures {
        let _ = writeln!(out, "  ! [{}] not removed: {}", f.index, f.error);
    }
    let _ = writeln!(out, "\nremaining results:");
    for r in pipeline.source().surviving() {
        let _ = writeln!(out, "  [{}] {}: {}", r.index, r.source, r.description);
    }
    let _ = out.flush();
}

async fn run_query(
    pipeline: &LocalPipeline,
    query: &str,
) -> std::result::Result<(), PipelineError> {
    match pipeline.run(query).await {
        Ok(report) => {
            print_report(pipeline, &report);
            info!(
                removed = report.removed.len(),
                failed = report.removal_failures.len(),
                "run complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(stage = %e.stage, error = %e.source, "run failed");
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let http = reqwest::Client::builder()
        .user_agent(concat!("serpscrub/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("could not build HTTP client")?;

    let source = SearxngResultSource::from_env(http.clone())
        .context("search provider is not configured")?
        .with_max_results(cli.max_results);
    let reasoner = ReasonerClient::from_env(http.clone(), cli.reasoner_model.clone())
        .context("reasoning model is not configured")?;
    let decider = DecisionClient::from_env(http, cli.decision_model.clone())
        .context("decision model is not configured")?;
    let pipeline = Pipeline::new(source, reasoner, decider, StdoutSink::new());

    if let Some(query) = cli.query.as_deref() {
        // One-shot mode: a failed run must be visible in the exit status.
        run_query(&pipeline, query).await?;
        return Ok(());
    }

    // Interactive loop: one query per line, EOF or blank line exits.
    let stdin = std::io::stdin();
    loop {
        {
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "query> ");
            let _ = out.flush();
        }
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("stdin read failed")? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            break;
        }
        // Interactive mode: the failure is already logged; keep the loop alive.
        let _ = run_query(&pipeline, query).await;
    }
    Ok(())
}
