//! Coverage-driven mobile app explorer.
//!
//! `explorer run` plans an exploration of an iOS app, drives it through an
//! Appium session and stops once a coverage evaluator judges the plan
//! covered. The remaining commands inspect saved page sources offline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use explorer::core::clean::clean;
use explorer::core::diff::diff;
use explorer::core::query::query;
use explorer::core::types::AppConfig;
use explorer::exit_codes;
use explorer::io::appium::AppiumDriver;
use explorer::io::config::{DEFAULT_CONFIG_FILE, ExplorerConfig, load_config, write_config};
use explorer::io::executor::CodexExecutor;
use explorer::logging;
use explorer::orchestrator::{RunStop, run_exploration};

#[derive(Parser)]
#[command(
    name = "explorer",
    version,
    about = "Coverage-driven mobile app explorer"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Explore an app until coverage is complete or a limit is reached.
    Run {
        /// Human readable app name.
        #[arg(long)]
        name: String,
        /// Bundle id used to launch the app.
        #[arg(long)]
        bundle_id: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Write a default `explorer.toml`.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the cleaned tree of a saved page source as JSON.
    Clean { file: PathBuf },
    /// Print the textual diff of two saved page sources.
    Diff { previous: PathBuf, current: PathBuf },
    /// Print elements of a saved page source ranked by a query.
    Query {
        file: PathBuf,
        /// Empty prints the whole cleaned tree.
        #[arg(default_value = "")]
        query: String,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FATAL);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            name,
            bundle_id,
            description,
            config,
        } => {
            let app = AppConfig {
                name,
                bundle_id,
                description,
            };
            cmd_run(&app, &config).await
        }
        Command::Init { force } => cmd_init(force),
        Command::Clean { file } => cmd_clean(&file),
        Command::Diff { previous, current } => cmd_diff(&previous, &current),
        Command::Query { file, query } => cmd_query(&file, &query),
    }
}

async fn cmd_run(app: &AppConfig, config_path: &Path) -> Result<i32> {
    if app.name.trim().is_empty() || app.bundle_id.trim().is_empty() {
        bail!("--name and --bundle-id must not be empty");
    }
    let config = load_config(config_path)?;
    let mut driver = AppiumDriver::new(&config.appium)?;

    let outcome = run_exploration(&config, app, &CodexExecutor, &mut driver, |event| {
        println!("{event}");
    })
    .await?;

    let evaluation = &outcome.evaluation;
    println!(
        "run {}: {} after {} iterations ({:.0}% covered)",
        outcome.run_id,
        evaluation.score.as_str(),
        outcome.iterations,
        evaluation.completion_percentage
    );
    if !evaluation.missing_areas.is_empty() {
        println!("missing: {}", evaluation.missing_areas.join(", "));
    }
    println!(
        "artifacts: {} ({} screenshots)",
        outcome.manifest.app_dir.display(),
        outcome.manifest.screenshots.len()
    );

    Ok(match outcome.stop {
        RunStop::Complete => exit_codes::OK,
        RunStop::MaxIterations => exit_codes::INCOMPLETE,
        RunStop::DeadlineExceeded => exit_codes::DEADLINE,
    })
}

fn cmd_init(force: bool) -> Result<i32> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &ExplorerConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_clean(file: &Path) -> Result<i32> {
    let tree = clean(&read_page_source(file)?)
        .with_context(|| format!("clean {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(exit_codes::OK)
}

fn cmd_diff(previous: &Path, current: &Path) -> Result<i32> {
    let before = clean(&read_page_source(previous)?)
        .with_context(|| format!("clean {}", previous.display()))?;
    let after = clean(&read_page_source(current)?)
        .with_context(|| format!("clean {}", current.display()))?;
    print!("{}", diff(&before, &after).summary());
    Ok(exit_codes::OK)
}

fn cmd_query(file: &Path, text: &str) -> Result<i32> {
    let tree = clean(&read_page_source(file)?)
        .with_context(|| format!("clean {}", file.display()))?;
    print!("{}", query(&tree, text).render());
    Ok(exit_codes::OK)
}

fn read_page_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
