//! Load test CLI for the bookstore API.

use anyhow::Context;
use bookstore_load::{bookstore, BookstoreProfile, LoadRunner, ResultsReport, ScenarioConfig, TestResults};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarm::RunConfig;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bookstore-load")]
#[command(about = "Load testing tool for the bookstore API", long_about = None)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test from a scenario file
    Run {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override target host
        #[arg(long, env = "LOAD_TEST_HOST")]
        host: Option<String>,

        /// Override number of users
        #[arg(short, long)]
        users: Option<usize>,

        /// Override spawn rate (users per second)
        #[arg(short = 'r', long)]
        spawn_rate: Option<f64>,

        /// Override run time in seconds
        #[arg(short = 't', long)]
        run_time: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run the built-in bookstore user
    Bookstore {
        /// Target host
        #[arg(long, env = "LOAD_TEST_HOST", default_value = bookstore::DEFAULT_HOST)]
        host: String,

        /// Number of concurrent users
        #[arg(short, long, default_value = "10")]
        users: usize,

        /// Users started per second
        #[arg(short = 'r', long, default_value = "1")]
        spawn_rate: f64,

        /// Run time in seconds (runs until Ctrl-C when omitted)
        #[arg(short = 't', long)]
        run_time: Option<u64>,

        /// Task set to run
        #[arg(short, long, value_enum, default_value_t = BookstoreProfile::Browse)]
        profile: BookstoreProfile,

        /// RNG seed for reproducible task and wait sequences
        #[arg(long)]
        seed: Option<u64>,

        /// Log every request to a JSON-lines file in the results directory
        #[arg(long)]
        log_requests: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List available scenarios
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    /// Also write CSV stats and failures with this path prefix
    #[arg(long)]
    csv_prefix: Option<PathBuf>,

    /// Directory for request logs
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Exit successfully even when requests failed
    #[arg(long)]
    allow_failures: bool,

    /// Disable the live progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Commands::Run {
            scenario,
            host,
            users,
            spawn_rate,
            run_time,
            output,
        } => {
            info!(path = %scenario.display(), "Loading scenario");

            // Load and validate configuration
            let mut config = ScenarioConfig::from_file(&scenario)?;

            config.apply_overrides(host, users, spawn_rate, run_time)?;
            config.validate()?;
            info!(
                name = %config.name,
                description = %config.description,
                user_classes = config.user_classes.len(),
                "Configuration loaded"
            );

            let runner = LoadRunner::from_scenario(&config, &output.results_dir)?
                .with_progress(!output.no_progress);
            let results = runner.run(shutdown_channel()).await?;
            finish(&results, &output)
        }
        Commands::Bookstore {
            host,
            users,
            spawn_rate,
            run_time,
            profile,
            seed,
            log_requests,
            output,
        } => {
            let run = RunConfig {
                host,
                users,
                spawn_rate,
                run_time: run_time.map(Duration::from_secs),
                seed,
                ..RunConfig::default()
            };
            run.validate()?;

            let request_log_dir = log_requests.then(|| output.results_dir.clone());
            let runner = LoadRunner::new("bookstore", run, vec![bookstore::user_profile(profile)])
                .with_request_log_dir(request_log_dir)
                .with_progress(!output.no_progress);
            let results = runner.run(shutdown_channel()).await?;
            finish(&results, &output)
        }
        Commands::List { dir } => {
            println!("Available scenarios in {}:", dir.display());
            println!();

            let scenarios = match list_scenarios(&dir) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error reading directory: {:#}", e);
                    eprintln!("Make sure the directory exists and is readable");
                    return Ok(());
                }
            };

            if scenarios.is_empty() {
                println!("No scenario files found");
            } else {
                for (filename, config) in scenarios {
                    println!("  {} - {}", filename, config.name);
                    println!("    {}", config.description);
                    println!();
                }
            }
            Ok(())
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Broadcast a shutdown to the runner on Ctrl+C.
fn shutdown_channel() -> broadcast::Receiver<()> {
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        tx.send(()).ok();
    });
    rx
}

fn finish(results: &TestResults, output: &OutputArgs) -> anyhow::Result<()> {
    match output.output {
        OutputFormat::Json => println!("{}", ResultsReport::format_json(results)?),
        OutputFormat::Csv => {
            println!("{}", ResultsReport::csv_header());
            println!("{}", ResultsReport::format_csv(results));
        }
        OutputFormat::Table => println!("{}", ResultsReport::format_table(results)),
    }

    if let Some(ref prefix) = output.csv_prefix {
        write_csv(prefix, results)?;
    }

    results.check_failures(output.allow_failures)
}

fn write_csv(prefix: &Path, results: &TestResults) -> anyhow::Result<()> {
    let stats_path = PathBuf::from(format!("{}_stats.csv", prefix.display()));
    let failures_path = PathBuf::from(format!("{}_failures.csv", prefix.display()));

    if let Some(parent) = stats_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let stats = format!(
        "{}\n{}\n",
        ResultsReport::csv_header(),
        ResultsReport::format_csv(results)
    );
    std::fs::write(&stats_path, stats)
        .with_context(|| format!("failed to write {}", stats_path.display()))?;
    std::fs::write(&failures_path, ResultsReport::format_failures_csv(results) + "\n")
        .with_context(|| format!("failed to write {}", failures_path.display()))?;

    info!(stats = %stats_path.display(), failures = %failures_path.display(), "Wrote CSV results");
    Ok(())
}

fn list_scenarios(dir: &Path) -> anyhow::Result<Vec<(String, ScenarioConfig)>> {
    let mut scenarios = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        );
        if !is_yaml {
            continue;
        }
        // Skip files that do not parse as scenarios
        match ScenarioConfig::from_file(&path) {
            Ok(config) => {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                scenarios.push((filename, config));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid scenario"),
        }
    }

    scenarios.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(scenarios)
}
