use anyhow::{Context, Result};
use clap::Parser;
use remedy::config::{ConfigOverrides, FixConfig, Provider, UserConfig};
use remedy::controller::{FixOutcome, FixStatus};
use remedy::generator::{ChatGenerator, Generator};
use remedy::issue::{filter_issues, load_issue_feed};
use remedy::outcome_log::OutcomeLog;
use remedy::run::{RunReport, Runner};
use remedy::storage::FsStorage;
use remedy::util::truncate;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "remedy",
    about = "Turn static-analysis findings into small, verified source fixes",
    version
)]
struct Args {
    /// Path to the repository (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Issue feed exported from the analyzer (JSON)
    #[arg(short, long)]
    issues: PathBuf,

    /// Validate fixes and print diffs without writing files
    #[arg(long)]
    dry_run: bool,

    /// Chat-completions provider (defaults to the one in your user config)
    #[arg(long, value_enum)]
    provider: Option<Provider>,

    /// Model name, overriding the configured one
    #[arg(long)]
    model: Option<String>,

    /// Attempts per issue
    #[arg(long)]
    max_retries: Option<usize>,

    /// Most changed lines allowed per file
    #[arg(long)]
    max_lines_changed: Option<usize>,

    /// Largest changed/original line ratio allowed per file
    #[arg(long)]
    max_change_ratio: Option<f64>,

    /// Only process the first N issues after filtering
    #[arg(short, long)]
    limit: Option<usize>,

    /// File-groups processed in parallel
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Seconds to wait for each generator call
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Commit each accepted fix with git
    #[arg(long)]
    git_commit: bool,

    /// Also attempt issues raised by external (imported) rules
    #[arg(long)]
    include_external: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("remedy=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let path = args
        .path
        .canonicalize()
        .with_context(|| format!("Repository not found: {}", args.path.display()))?;

    let mut config = FixConfig::load(&path)?;
    config.apply_overrides(&ConfigOverrides {
        max_retries: args.max_retries,
        max_lines_changed: args.max_lines_changed,
        max_change_ratio: args.max_change_ratio,
        dry_run: args.dry_run,
        generator_timeout_secs: args.timeout_secs,
        max_parallel_groups: args.jobs,
        git_commit: args.git_commit,
    });
    if args.include_external {
        config.exclude_external_rules = false;
    }
    config.validate().map_err(anyhow::Error::msg)?;
    if config.git_commit && !remedy::git_ops::is_repository(&path) {
        anyhow::bail!("--git-commit needs a git repository at {}", path.display());
    }

    let feed = load_issue_feed(&args.issues)?;
    let fetched = feed.issues.len();
    let issues = filter_issues(feed.issues, config.exclude_external_rules, args.limit);
    tracing::info!(fetched, selected = issues.len(), "loaded issue feed");
    if issues.is_empty() {
        eprintln!("No issues to fix.");
        return Ok(());
    }

    let user_config = UserConfig::load();
    let provider = args.provider.unwrap_or(user_config.provider);
    let generator = ChatGenerator::from_user_config(&user_config, provider, args.model.clone())?;
    tracing::info!(provider = generator.name(), model = generator.model(), "using generator");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing in-flight attempts");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let log = OutcomeLog::new(&path, Uuid::new_v4());
    let storage = Arc::new(FsStorage::new(path.clone()));
    let runner = Runner::with_shutdown(&config, Arc::new(generator), storage, path.clone(), shutdown)
        .with_outcome_log(log.clone());

    let report = runner.run(issues).await?;
    print_report(&report, config.dry_run);
    match log.load_run() {
        Ok(records) => eprintln!(
            "Run {}: {} outcome(s) logged to {}",
            log.run_id(),
            records.len(),
            log.path().display()
        ),
        Err(err) => tracing::warn!(error = %err, "could not read back the outcome log"),
    }
    Ok(())
}

fn status_marker(status: FixStatus) -> &'static str {
    match status {
        FixStatus::Accepted => "✓",
        FixStatus::Exhausted => "✗",
        FixStatus::Failed => "!",
        FixStatus::Skipped => "-",
    }
}

fn print_outcome(outcome: &FixOutcome, show_diff: bool) {
    let location = outcome.file.display().to_string();
    println!(
        "  {} {:<9} {:<14} {:<28} {} attempt(s)",
        status_marker(outcome.status),
        outcome.status.label(),
        truncate(&outcome.issue_key, 14),
        truncate(&location, 28),
        outcome.attempts
    );
    if let Some(message) = &outcome.message {
        println!("      {}", truncate(message, 100));
    }
    for warning in &outcome.warnings {
        println!("      warning: {}", truncate(warning, 100));
    }
    if show_diff && !outcome.diff.is_empty() {
        for line in outcome.diff.lines() {
            println!("      {}", line);
        }
    }
}

fn print_report(report: &RunReport, dry_run: bool) {
    let summary = &report.summary;

    println!();
    for outcome in &report.outcomes {
        print_outcome(outcome, dry_run && outcome.status == FixStatus::Accepted);
    }

    println!();
    println!("┌──────────────────────────────────────────┐");
    println!("│  {:<40}│", if dry_run { "remedy (dry run)" } else { "remedy" });
    println!("├──────────────────────────────────────────┤");
    println!("│  {:<12}{:>28}│", "total", summary.total);
    println!("│  {:<12}{:>28}│", "accepted", summary.accepted);
    println!("│  {:<12}{:>28}│", "exhausted", summary.exhausted);
    println!("│  {:<12}{:>28}│", "failed", summary.failed);
    println!("│  {:<12}{:>28}│", "skipped", summary.skipped);
    println!(
        "│  {:<12}{:>27.1}%│",
        "success",
        summary.success_rate * 100.0
    );
    println!("└──────────────────────────────────────────┘");
    println!();
}
