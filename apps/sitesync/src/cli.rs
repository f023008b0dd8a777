use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use sitesync_core::{Config, CrawlOptions, Orchestrator, RunReport};
use sitesync_store::{Store, TaskCounts};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "sitesync.toml";

#[derive(Parser, Debug)]
#[command(name = "sitesync")]
#[command(version)]
#[command(about = "Resumable website mirroring with versioned asset history")]
struct Cli {
    /// Path to a TOML configuration file (defaults to ./sitesync.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path from the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Suppress everything below error level
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl a configured source
    Crawl {
        /// Source profile name (defaults to the configured default source)
        #[arg(long)]
        source: Option<String>,

        /// Attach to the newest resumable run instead of starting fresh
        #[arg(long)]
        resume: bool,

        /// Seed URLs overriding the profile's start_urls (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,

        /// Override the profile's depth ceiling
        #[arg(long)]
        depth: Option<u32>,

        /// Override the worker count
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// Show the newest run of a source with task and exception counts
    Status {
        #[arg(long)]
        source: Option<String>,
    },
    /// List recent runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        source: Option<String>,
    },
    /// List configured sources and their last run
    Sources,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    setup_logging(&config.logging.level, cli.verbose, cli.quiet);

    let db_path = cli.db.clone().unwrap_or_else(|| config.storage.path.clone());
    let store = Store::open(&db_path)
        .with_context(|| format!("open database {}", db_path.display()))?;

    match cli.command {
        Command::Crawl {
            source,
            resume,
            urls,
            depth,
            parallel,
        } => {
            let options = CrawlOptions {
                source,
                resume,
                start_urls: urls,
                depth_override: depth,
                parallel_override: parallel,
            };
            let orchestrator = Orchestrator::new(config, store);
            let cancel = Arc::new(AtomicBool::new(false));
            let report = orchestrator.crawl(&options, cancel)?;
            print_report(&report);
        }
        Command::Status { source } => {
            let name = source.as_deref().unwrap_or(&config.default_source);
            print_status(&store, name)?;
        }
        Command::Runs { limit, source } => {
            for run in store.recent_runs(source.as_deref(), limit)? {
                println!(
                    "run {} | source={} | started={} | status={}",
                    run.id,
                    run.source_name,
                    format_ms(run.started_at),
                    run.status
                );
            }
        }
        Command::Sources => {
            for profile in &config.sources {
                let last = store.recent_runs(Some(&profile.name), 1)?;
                let summary = last
                    .first()
                    .map(|run| format!("last run {} ({})", run.id, run.status))
                    .unwrap_or_else(|| "never crawled".to_owned());
                println!(
                    "{} | {} seed url(s) | depth {} | {}",
                    profile.name,
                    profile.start_urls.len(),
                    profile.max_depth,
                    summary
                );
            }
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_PATH);
            if fallback.exists() {
                Ok(Config::load(fallback)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn setup_logging(configured_level: &str, verbose: u8, quiet: bool) {
    let directive = if quiet {
        "error".to_owned()
    } else {
        match verbose {
            0 => configured_level.to_owned(),
            1 => "debug".to_owned(),
            _ => "trace".to_owned(),
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn print_report(report: &RunReport) {
    println!(
        "Run {} ({}) {}{}",
        report.run_id,
        report.source_name,
        report.status,
        if report.resumed { " [resumed]" } else { "" }
    );
    print_counts(&report.counts);
    println!("  seeds queued: {}", report.queued_seeds);
    println!("  open exceptions: {}", report.open_exceptions);
    if report.missing_assets > 0 {
        println!("  missing assets flagged: {}", report.missing_assets);
    }
    if report.released_on_stop > 0 {
        println!("  tasks released on stop: {}", report.released_on_stop);
    }
    if !report.suggested_denies.is_empty() {
        println!("  suggested permanent deny rules:");
        for (host, patterns) in &report.suggested_denies {
            println!("    {}: {}", host, patterns.join(", "));
        }
    }
}

fn print_status(store: &Store, source: &str) -> Result<()> {
    let runs = store.recent_runs(Some(source), 1)?;
    let Some(run) = runs.first() else {
        println!("No runs recorded for source '{source}'.");
        return Ok(());
    };
    println!(
        "Source {} | run {} | status {} | started {}",
        source,
        run.id,
        run.status,
        format_ms(run.started_at)
    );
    print_counts(&store.task_counts(run.id)?);
    println!("  assets: {}", store.asset_count(source)?);
    println!("  open exceptions: {}", store.open_exception_count(run.id)?);
    Ok(())
}

fn print_counts(counts: &TaskCounts) {
    println!(
        "  tasks: pending={} in_progress={} finished={} errors={}",
        counts.pending, counts.in_progress, counts.finished, counts.error
    );
}

fn format_ms(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|when| when.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}
